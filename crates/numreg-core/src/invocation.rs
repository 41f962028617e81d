//! Invocation building for the external program.
//!
//! The program receives its tunables as one composite argument in its own
//! `key=value; key=value` mini-syntax, e.g.
//! `--dft="maxiter=10; econv=3.e-5; localize=boys; prefix=madtestboys"`.
//! Keys keep their configured order and the separator is emitted exactly as
//! configured.
//!
//! # Escaping
//!
//! A value is emitted verbatim unless it is empty, contains `;`, `"`, `\` or
//! any non-whitespace character of the configured separator, or starts or
//! ends with whitespace. Such a value is wrapped in double quotes
//! and every `"` and `\` inside it is prefixed with `\`. Keys are never
//! quoted; [`validate_key`] rejects keys the syntax cannot carry.
//!
//! No shell is involved: each element of [`InvocationSpec::command_line`] is
//! passed to the child as one argv entry.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Suffix of every result document the external program writes.
pub const RESULT_SUFFIX: &str = "calc_info.json";

/// Suffix of every reference document supplied with a test.
pub const REFERENCE_SUFFIX: &str = "calc_info.ref.json";

/// Default separator between `key=value` pairs.
pub const DEFAULT_SEPARATOR: &str = "; ";

/// One named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Render as `key=value`, escaping the value against `separator`.
    pub fn render(&self, separator: &str) -> String {
        format!("{}={}", self.key, escape_value(&self.value, separator))
    }
}

/// Accepts either `{"key": "k", "value": "v"}` or the compact `"k=v"`.
impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Compact(String),
            Pair { key: String, value: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Pair { key, value } => Ok(Parameter { key, value }),
            Repr::Compact(raw) => match raw.split_once('=') {
                Some((key, value)) => Ok(Parameter::new(key.trim(), value.trim())),
                None => Err(serde::de::Error::custom(format!(
                    "parameter '{}' is not of the form key=value",
                    raw
                ))),
            },
        }
    }
}

/// Ordered parameter list. Keys are unique; insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterList(Vec<Parameter>);

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing in place or appending at the end.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(Parameter { key, value }),
        }
    }

    /// Builder form of [`ParameterList::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Merge `overrides` onto a copy of `self`.
    ///
    /// Keys already present keep their position and take the override value;
    /// new keys are appended in override order.
    pub fn merged(&self, overrides: &ParameterList) -> ParameterList {
        let mut merged = self.clone();
        for p in overrides.iter() {
            merged.set(p.key.clone(), p.value.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the composite parameter string.
    pub fn render(&self, separator: &str) -> String {
        self.0
            .iter()
            .map(|p| p.render(separator))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Quote a value if it carries characters significant to the mini-syntax.
pub fn escape_value(value: &str, separator: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.contains([';', '"', '\\'])
        || separator
            .chars()
            .any(|c| !c.is_whitespace() && value.contains(c))
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);

    if !needs_quoting {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Check that a parameter key can be carried by the mini-syntax.
pub fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("parameter key must not be empty".to_string());
    }
    if key
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '=' | ';' | '"' | '\\'))
    {
        return Err(format!(
            "parameter key '{}' contains whitespace or one of = ; \" \\",
            key
        ));
    }
    Ok(())
}

/// Check that a separator can delimit `key=value` pairs unambiguously.
pub fn validate_separator(separator: &str) -> std::result::Result<(), String> {
    if separator.trim().is_empty() {
        return Err("parameter separator must contain a non-whitespace character".to_string());
    }
    if separator.contains(['=', '"', '\\']) {
        return Err(format!(
            "parameter separator '{}' must not contain = \" or \\",
            separator
        ));
    }
    Ok(())
}

/// Everything needed to run the external program once.
///
/// Built once per variant and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationSpec {
    program: PathBuf,
    args: Vec<String>,
    parameter_flag: Option<String>,
    parameters: ParameterList,
    separator: String,
    working_dir: PathBuf,
    output_prefix: String,
    timeout_secs: u64,
}

impl InvocationSpec {
    /// Create an invocation that writes `<working_dir>/<output_prefix>.calc_info.json`.
    pub fn new(
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            parameter_flag: None,
            parameters: ParameterList::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
            working_dir: working_dir.into(),
            output_prefix: output_prefix.into(),
            timeout_secs: 0,
        }
    }

    /// Fixed leading arguments, passed before the composite parameter.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Composite parameter rendered as `--<flag>=<k=v; k=v>`.
    pub fn with_parameters(
        mut self,
        flag: impl Into<String>,
        parameters: ParameterList,
        separator: impl Into<String>,
    ) -> Self {
        self.parameter_flag = Some(flag.into());
        self.parameters = parameters;
        self.separator = separator.into();
        self
    }

    /// Bound the child wait; `0` waits indefinitely.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// The composite argument, if a parameter flag is configured.
    pub fn composite_argument(&self) -> Option<String> {
        self.parameter_flag
            .as_ref()
            .map(|flag| format!("--{}={}", flag, self.parameters.render(&self.separator)))
    }

    /// Full argv: program, fixed arguments, then the composite argument.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.to_string_lossy().into_owned());
        argv.extend(self.args.iter().cloned());
        argv.extend(self.composite_argument());
        argv
    }

    /// Where the program is expected to write its result document.
    pub fn output_path(&self) -> PathBuf {
        self.working_dir
            .join(format!("{}.{}", self.output_prefix, RESULT_SUFFIX))
    }

    /// SHA-256 over the argv elements and working directory.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for arg in self.command_line() {
            hasher.update(arg.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(self.working_dir.to_string_lossy().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Shell-like rendering for log lines. Not used to execute anything.
impl fmt::Display for InvocationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .command_line()
            .iter()
            .map(|arg| display_quote(arg))
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

fn display_quote(arg: &str) -> String {
    if !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | ';' | '$' | '`' | '\\'))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
