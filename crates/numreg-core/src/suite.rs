//! Suite configuration: one external program, a shared base parameter set,
//! and the variants to run against it.
//!
//! ```json
//! {
//!   "name": "test_localization",
//!   "program": "./moldft",
//!   "args": ["--geometry=h2o"],
//!   "parameter_flag": "dft",
//!   "base_parameters": ["maxiter=10", "econv=3.e-5", "k=8", "dconv=1.e-3"],
//!   "variant_key": "localize",
//!   "prefix_base": "madtest",
//!   "reference_dir": ".",
//!   "fields": ["return_energy"],
//!   "tolerance": 1e-4,
//!   "variants": [{ "name": "canon" }, { "name": "boys" }, { "name": "new" }]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compare::{ComparisonField, Tolerance};
use crate::error::{HarnessError, Result};
use crate::invocation::{
    validate_key, validate_separator, InvocationSpec, ParameterList, DEFAULT_SEPARATOR,
    REFERENCE_SUFFIX,
};

/// One configured scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    /// Variant tag; also appended to `prefix_base` to form the output prefix.
    pub name: String,

    /// Parameters merged onto the suite's base parameters.
    #[serde(default)]
    pub overrides: ParameterList,
}

impl VariantConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overrides: ParameterList::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: ParameterList) -> Self {
        self.overrides = overrides;
        self
    }
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_prefix_key() -> String {
    "prefix".to_string()
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

/// A complete regression test description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    pub name: String,

    /// Program to run. Relative paths with a directory component resolve
    /// against `working_dir`; bare names are looked up on `PATH`.
    pub program: PathBuf,

    /// Fixed arguments placed before the composite parameter.
    #[serde(default)]
    pub args: Vec<String>,

    /// Flag carrying the composite parameter (`dft` → `--dft=...`).
    #[serde(default)]
    pub parameter_flag: Option<String>,

    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default)]
    pub base_parameters: ParameterList,

    /// Parameter set to the variant name, if any.
    #[serde(default)]
    pub variant_key: Option<String>,

    /// Parameter carrying the output prefix to the program.
    #[serde(default = "default_prefix_key")]
    pub prefix_key: String,

    pub prefix_base: String,

    #[serde(default = "default_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_dir")]
    pub reference_dir: PathBuf,

    pub fields: Vec<ComparisonField>,

    pub tolerance: Tolerance,

    /// Child wait bound in seconds; 0 waits indefinitely.
    #[serde(default)]
    pub timeout_secs: u64,

    pub variants: Vec<VariantConfig>,
}

impl SuiteConfig {
    /// Load and validate a suite file.
    ///
    /// Relative `working_dir` and `reference_dir` are taken relative to the
    /// directory holding the suite file. A relative program path with a
    /// directory component is made absolute against the resolved
    /// `working_dir` here, once.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut suite: SuiteConfig = serde_json::from_str(&text)?;

        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = if base.is_absolute() {
            base
        } else {
            std::env::current_dir()?.join(base)
        };
        suite.working_dir = base.join(&suite.working_dir);
        suite.reference_dir = base.join(&suite.reference_dir);
        // Pin the program now so a later working_dir override cannot move it.
        suite.program = suite.resolve_program();

        suite.validate()?;
        Ok(suite)
    }

    /// Check the suite can be run as configured.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(HarnessError::InvalidConfig(msg));

        if self.program.as_os_str().is_empty() {
            return invalid("program must not be empty".to_string());
        }
        if self.variants.is_empty() {
            return invalid("at least one variant is required".to_string());
        }
        if self.fields.is_empty() {
            return invalid("at least one comparison field is required".to_string());
        }
        if let Some(field) = self.fields.iter().find(|f| f.name.is_empty()) {
            return invalid(format!("empty field name in {:?}", field));
        }
        if let Some(flag) = &self.parameter_flag {
            if flag.is_empty() || flag.contains('=') {
                return invalid(format!("invalid parameter flag '{}'", flag));
            }
        }

        validate_separator(&self.separator).map_err(HarnessError::InvalidConfig)?;
        validate_key(&self.prefix_key).map_err(HarnessError::InvalidConfig)?;
        if let Some(key) = &self.variant_key {
            validate_key(key).map_err(HarnessError::InvalidConfig)?;
        }
        validate_parameters("base_parameters", &self.base_parameters)?;

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.is_empty()
                || variant
                    .name
                    .chars()
                    .any(|c| matches!(c, '/' | '\\') || c.is_whitespace())
            {
                return invalid(format!(
                    "variant name '{}' must be non-empty and free of path separators and whitespace",
                    variant.name
                ));
            }
            if !seen.insert(variant.name.as_str()) {
                return invalid(format!("duplicate variant '{}'", variant.name));
            }
            validate_parameters(&format!("variant '{}'", variant.name), &variant.overrides)?;
        }
        Ok(())
    }

    /// Restrict the suite to the named variants, keeping configured order.
    pub fn select(&self, only: &[String]) -> Result<SuiteConfig> {
        if only.is_empty() {
            return Ok(self.clone());
        }
        if let Some(unknown) = only
            .iter()
            .find(|name| !self.variants.iter().any(|v| &v.name == *name))
        {
            return Err(HarnessError::InvalidConfig(format!(
                "unknown variant '{}'",
                unknown
            )));
        }
        let mut selected = self.clone();
        selected.variants.retain(|v| only.contains(&v.name));
        Ok(selected)
    }

    /// Output prefix of a variant: `prefix_base` followed by the variant name.
    pub fn prefix_for(&self, variant: &VariantConfig) -> String {
        format!("{}{}", self.prefix_base, variant.name)
    }

    /// `<reference_dir>/<prefix>.calc_info.ref.json`
    pub fn reference_path_for(&self, variant: &VariantConfig) -> PathBuf {
        self.reference_dir
            .join(format!("{}.{}", self.prefix_for(variant), REFERENCE_SUFFIX))
    }

    /// Build the invocation of one variant.
    ///
    /// Parameter order: base parameters, then the variant key, then variant
    /// overrides, then the prefix. Keys already present keep their slot.
    pub fn invocation_for(&self, variant: &VariantConfig) -> InvocationSpec {
        let prefix = self.prefix_for(variant);
        let mut parameters = self.base_parameters.clone();
        if let Some(key) = &self.variant_key {
            parameters.set(key.clone(), variant.name.clone());
        }
        let mut parameters = parameters.merged(&variant.overrides);
        parameters.set(self.prefix_key.clone(), prefix.clone());

        let mut spec = InvocationSpec::new(self.resolve_program(), &self.working_dir, prefix)
            .with_args(self.args.clone())
            .with_timeout(self.timeout_secs);
        if let Some(flag) = &self.parameter_flag {
            spec = spec.with_parameters(flag.clone(), parameters, self.separator.clone());
        }
        spec
    }

    fn resolve_program(&self) -> PathBuf {
        if self.program.is_relative() && self.program.components().count() > 1 {
            self.working_dir.join(&self.program)
        } else {
            self.program.clone()
        }
    }
}

fn validate_parameters(context: &str, parameters: &ParameterList) -> Result<()> {
    let mut keys = HashSet::new();
    for p in parameters.iter() {
        validate_key(&p.key).map_err(|e| HarnessError::InvalidConfig(format!("{}: {}", context, e)))?;
        if !keys.insert(p.key.as_str()) {
            return Err(HarnessError::InvalidConfig(format!(
                "{}: duplicate parameter '{}'",
                context, p.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn localization_suite() -> SuiteConfig {
        serde_json::from_value(json!({
            "name": "test_localization",
            "program": "./moldft",
            "args": ["--geometry=h2o"],
            "parameter_flag": "dft",
            "base_parameters": ["maxiter=10", "econv=3.e-5", "k=8", "localize=canon", "dconv=1.e-3"],
            "variant_key": "localize",
            "prefix_base": "madtest",
            "working_dir": "/work",
            "reference_dir": "/src/nemo",
            "fields": ["return_energy"],
            "tolerance": 1e-4,
            "variants": [{ "name": "canon" }, { "name": "boys" }, { "name": "new" }]
        }))
        .expect("parse suite")
    }

    #[test]
    fn test_localization_suite_is_valid() {
        let suite = localization_suite();
        suite.validate().expect("valid");
        assert_eq!(suite.separator, "; ");
        assert_eq!(suite.prefix_key, "prefix");
        assert_eq!(suite.timeout_secs, 0);
    }

    #[test]
    fn test_invocation_for_variant() {
        let suite = localization_suite();
        let spec = suite.invocation_for(&suite.variants[1]);

        assert_eq!(
            spec.command_line(),
            vec![
                "/work/./moldft".to_string(),
                "--geometry=h2o".to_string(),
                "--dft=maxiter=10; econv=3.e-5; k=8; localize=boys; dconv=1.e-3; prefix=madtestboys"
                    .to_string(),
            ]
        );
        assert_eq!(
            spec.output_path(),
            PathBuf::from("/work/madtestboys.calc_info.json")
        );
    }

    #[test]
    fn test_reference_path_for_variant() {
        let suite = localization_suite();
        assert_eq!(
            suite.reference_path_for(&suite.variants[0]),
            PathBuf::from("/src/nemo/madtestcanon.calc_info.ref.json")
        );
    }

    #[test]
    fn test_variant_overrides_merge_onto_base() {
        let mut suite = localization_suite();
        suite.variants[2] = VariantConfig::new("new")
            .with_overrides(ParameterList::new().with("k", "6").with("maxsub", "5"));

        let spec = suite.invocation_for(&suite.variants[2]);
        assert_eq!(spec.parameters().get("k"), Some("6"));
        assert_eq!(spec.parameters().get("maxsub"), Some("5"));
        assert_eq!(spec.parameters().get("localize"), Some("new"));
        assert_eq!(suite.base_parameters.get("k"), Some("8"));
    }

    #[test]
    fn test_bare_program_name_is_not_resolved() {
        let mut suite = localization_suite();
        suite.program = PathBuf::from("moldft");
        let spec = suite.invocation_for(&suite.variants[0]);
        assert_eq!(spec.program(), Path::new("moldft"));
    }

    #[test]
    fn test_validate_rejects_empty_variants_and_fields() {
        let mut suite = localization_suite();
        suite.variants.clear();
        assert!(matches!(
            suite.validate(),
            Err(HarnessError::InvalidConfig(_))
        ));

        let mut suite = localization_suite();
        suite.fields.clear();
        assert!(suite.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_and_unsafe_variant_names() {
        let mut suite = localization_suite();
        suite.variants.push(VariantConfig::new("boys"));
        assert!(suite.validate().unwrap_err().to_string().contains("duplicate"));

        let mut suite = localization_suite();
        suite.variants.push(VariantConfig::new("../escape"));
        assert!(suite.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_parameter_keys() {
        let mut suite = localization_suite();
        suite.variants[0] =
            VariantConfig::new("canon").with_overrides(ParameterList::new().with("bad key", "1"));
        assert!(suite.validate().is_err());

        let bad: std::result::Result<SuiteConfig, _> = serde_json::from_value(json!({
            "name": "x", "program": "p", "prefix_base": "x",
            "fields": ["e"], "tolerance": -1.0, "variants": [{ "name": "a" }]
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_select_filters_and_rejects_unknown() {
        let suite = localization_suite();

        let selected = suite.select(&["new".to_string(), "canon".to_string()]).expect("select");
        let names: Vec<_> = selected.variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["canon", "new"]);

        assert!(suite.select(&[]).expect("select").variants.len() == 3);
        assert!(suite.select(&["pm".to_string()]).is_err());
    }

    #[test]
    fn test_from_path_resolves_dirs_against_suite_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            json!({
                "name": "t", "program": "sh", "prefix_base": "run",
                "reference_dir": "refs",
                "fields": ["e"], "tolerance": 0.001,
                "variants": [{ "name": "a" }]
            })
            .to_string(),
        )
        .expect("write");

        let suite = SuiteConfig::from_path(&path).expect("load");
        assert_eq!(suite.reference_dir, dir.path().join("refs"));
        assert_eq!(suite.working_dir, dir.path().join("."));
    }

    #[test]
    fn test_working_dir_override_keeps_program_next_to_suite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            json!({
                "name": "t", "program": "./moldft", "prefix_base": "madtest",
                "parameter_flag": "dft",
                "fields": ["return_energy"], "tolerance": 1e-4,
                "variants": [{ "name": "canon" }]
            })
            .to_string(),
        )
        .expect("write");

        let mut suite = SuiteConfig::from_path(&path).expect("load");
        let pinned = dir.path().join(".").join("./moldft");
        assert_eq!(suite.program, pinned);

        suite.working_dir = PathBuf::from("/scratch");
        let spec = suite.invocation_for(&suite.variants[0]);

        assert_eq!(spec.program(), pinned.as_path());
        assert_eq!(spec.working_dir(), Path::new("/scratch"));
        assert_eq!(
            spec.output_path(),
            PathBuf::from("/scratch/madtestcanon.calc_info.json")
        );
    }

    #[test]
    fn test_validate_rejects_ambiguous_separators() {
        for bad in ["", " ", "=", "\"", "\\"] {
            let mut suite = localization_suite();
            suite.separator = bad.to_string();
            assert!(
                matches!(suite.validate(), Err(HarnessError::InvalidConfig(_))),
                "separator {:?} should be rejected",
                bad
            );
        }

        let mut suite = localization_suite();
        suite.separator = ",".to_string();
        suite.validate().expect("comma separator is valid");
    }

    #[test]
    fn test_from_path_surfaces_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("suite.json");
        std::fs::write(&path, "{ \"name\": ").expect("write");
        assert!(matches!(
            SuiteConfig::from_path(&path),
            Err(HarnessError::Serialization(_))
        ));
    }
}
