//! Tolerance-based comparison of JSON result documents.
//!
//! Numbers pass when `|actual - expected| <= tolerance`; the bound is
//! inclusive and absolute. Identical values always pass, whatever the
//! tolerance. Two integers are subtracted exactly before the bound is
//! applied. Any other JSON value must be exactly equal and ignores the
//! tolerance.
//!
//! Each field is judged on its own; a missing field becomes a failing
//! [`Verdict`] rather than an error, so the remaining fields are still
//! reported.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::DocumentLoadError;

/// Absolute tolerance. Always finite and non-negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Tolerance(f64);

impl Tolerance {
    pub fn absolute(bound: f64) -> Result<Self, String> {
        Self::try_from(bound)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Inclusive: a difference equal to the bound passes.
    pub fn admits(self, difference: f64) -> bool {
        difference <= self.0
    }
}

impl TryFrom<f64> for Tolerance {
    type Error = String;

    fn try_from(bound: f64) -> Result<Self, Self::Error> {
        if bound.is_finite() && bound >= 0.0 {
            Ok(Self(bound))
        } else {
            Err(format!(
                "tolerance must be finite and non-negative, got {}",
                bound
            ))
        }
    }
}

impl From<Tolerance> for f64 {
    fn from(t: Tolerance) -> f64 {
        t.0
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:e}", self.0)
    }
}

/// A field to check, optionally with its own tolerance.
///
/// `name` is a dotted path; numeric segments index into arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonField {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,
}

impl ComparisonField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tolerance: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

/// Accepts `"return_energy"` or `{"name": "return_energy", "tolerance": 1e-6}`.
impl<'de> Deserialize<'de> for ComparisonField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full {
                name: String,
                #[serde(default)]
                tolerance: Option<Tolerance>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => ComparisonField::new(name),
            Repr::Full { name, tolerance } => ComparisonField { name, tolerance },
        })
    }
}

/// Which document lacked a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSide {
    Actual,
    Reference,
    Both,
}

impl fmt::Display for DocumentSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSide::Actual => write!(f, "result document"),
            DocumentSide::Reference => write!(f, "reference document"),
            DocumentSide::Both => write!(f, "result and reference documents"),
        }
    }
}

/// Why a verdict failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictFailure {
    MissingField { side: DocumentSide },
    ToleranceExceeded { difference: f64, tolerance: f64 },
    ValueMismatch,
    TypeMismatch,
}

/// Judgement for one compared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub field: String,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
    pub within_tolerance: bool,
    /// `|actual - expected|` for numeric fields.
    pub difference: Option<f64>,
    /// Tolerance applied, for numeric fields.
    pub tolerance: Option<f64>,
    pub failure: Option<VerdictFailure>,
    pub detail: String,
}

impl Verdict {
    fn new(field: &str, actual: Option<&Value>, expected: Option<&Value>) -> Self {
        Self {
            field: field.to_string(),
            actual: actual.cloned(),
            expected: expected.cloned(),
            within_tolerance: false,
            difference: None,
            tolerance: None,
            failure: None,
            detail: String::new(),
        }
    }
}

/// Per-field verdicts plus their conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub verdicts: Vec<Verdict>,
    pub passed: bool,
}

impl Comparison {
    pub fn failed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.within_tolerance).count()
    }
}

/// Load a JSON document whose top level is an object.
pub fn load_document(path: &Path) -> Result<Value, DocumentLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| DocumentLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value =
        serde_json::from_str(&text).map_err(|source| DocumentLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if !document.is_object() {
        return Err(DocumentLoadError::NotAMapping {
            path: path.to_path_buf(),
        });
    }
    Ok(document)
}

/// Resolve `path` in `document`.
///
/// A top-level key equal to the whole path wins, so keys that themselves
/// contain dots stay reachable.
pub fn lookup_field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(path) {
        return Some(value);
    }
    path.split('.').try_fold(document, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Judge a single field.
pub fn evaluate_field(
    field: &ComparisonField,
    actual_doc: &Value,
    reference_doc: &Value,
    default_tolerance: Tolerance,
) -> Verdict {
    let actual = lookup_field(actual_doc, &field.name);
    let expected = lookup_field(reference_doc, &field.name);
    let mut verdict = Verdict::new(&field.name, actual, expected);

    let (actual, expected) = match (actual, expected) {
        (Some(a), Some(e)) => (a, e),
        (a, e) => {
            let side = match (a.is_none(), e.is_none()) {
                (true, true) => DocumentSide::Both,
                (true, false) => DocumentSide::Actual,
                _ => DocumentSide::Reference,
            };
            verdict.detail = format!("{}: missing from {} -> FAIL", field.name, side);
            verdict.failure = Some(VerdictFailure::MissingField { side });
            return verdict;
        }
    };

    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(e)) => {
            let tolerance = field.tolerance.unwrap_or(default_tolerance);
            // Integers beyond 2^53 collapse under f64, so compare them exactly.
            let (equal, difference) = match (as_integer(actual), as_integer(expected)) {
                (Some(ai), Some(ei)) => (ai == ei, (ai - ei).unsigned_abs() as f64),
                _ if a == e => (true, 0.0),
                _ => (false, (a - e).abs()),
            };
            verdict.difference = Some(difference);
            verdict.tolerance = Some(tolerance.value());
            verdict.within_tolerance = equal || tolerance.admits(difference);
            if !verdict.within_tolerance {
                verdict.failure = Some(VerdictFailure::ToleranceExceeded {
                    difference,
                    tolerance: tolerance.value(),
                });
            }
            verdict.detail = format!(
                "{}: actual {} expected {} |diff| {:e} tolerance {} -> {}",
                field.name,
                actual,
                expected,
                difference,
                tolerance,
                pass_label(verdict.within_tolerance)
            );
        }
        (None, None) => {
            verdict.within_tolerance = actual == expected;
            if !verdict.within_tolerance {
                verdict.failure = Some(VerdictFailure::ValueMismatch);
            }
            verdict.detail = format!(
                "{}: actual {} expected {} (exact) -> {}",
                field.name,
                actual,
                expected,
                pass_label(verdict.within_tolerance)
            );
        }
        _ => {
            verdict.failure = Some(VerdictFailure::TypeMismatch);
            verdict.detail = format!(
                "{}: actual {} expected {} (type mismatch) -> FAIL",
                field.name, actual, expected
            );
        }
    }

    verdict
}

/// Compare already-loaded documents. Neither document is modified.
pub fn compare_documents(
    actual_doc: &Value,
    reference_doc: &Value,
    fields: &[ComparisonField],
    tolerance: Tolerance,
) -> Comparison {
    let verdicts: Vec<Verdict> = fields
        .iter()
        .map(|field| evaluate_field(field, actual_doc, reference_doc, tolerance))
        .collect();
    let passed = verdicts.iter().all(|v| v.within_tolerance);
    Comparison { verdicts, passed }
}

/// Load both documents, compare `fields`, and log one line per field.
///
/// An unreadable or malformed document is a [`DocumentLoadError`]; field
/// level problems are failing verdicts.
pub fn compare(
    actual_path: &Path,
    reference_path: &Path,
    fields: &[ComparisonField],
    tolerance: Tolerance,
) -> Result<Comparison, DocumentLoadError> {
    let actual_doc = load_document(actual_path)?;
    let reference_doc = load_document(reference_path)?;

    let comparison = compare_documents(&actual_doc, &reference_doc, fields, tolerance);
    for verdict in &comparison.verdicts {
        if verdict.within_tolerance {
            info!(field = %verdict.field, "{}", verdict.detail);
        } else {
            warn!(field = %verdict.field, "{}", verdict.detail);
        }
    }
    Ok(comparison)
}

fn as_integer(value: &Value) -> Option<i128> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

fn pass_label(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tol(bound: f64) -> Tolerance {
        Tolerance::absolute(bound).expect("valid tolerance")
    }

    fn energy() -> Vec<ComparisonField> {
        vec![ComparisonField::new("return_energy")]
    }

    #[test]
    fn test_tolerance_rejects_negative_and_non_finite() {
        assert!(Tolerance::absolute(-1e-4).is_err());
        assert!(Tolerance::absolute(f64::NAN).is_err());
        assert!(Tolerance::absolute(f64::INFINITY).is_err());
        assert!(Tolerance::absolute(0.0).is_ok());
    }

    #[test]
    fn test_tolerance_deserialize_validates() {
        let ok: Tolerance = serde_json::from_str("1e-4").expect("parse");
        assert_eq!(ok.value(), 1e-4);
        assert!(serde_json::from_str::<Tolerance>("-0.5").is_err());
    }

    #[test]
    fn test_exceeding_tolerance_fails() {
        let comparison = compare_documents(
            &json!({ "return_energy": -76.00012 }),
            &json!({ "return_energy": -76.00000 }),
            &energy(),
            tol(1e-4),
        );

        assert!(!comparison.passed);
        let verdict = &comparison.verdicts[0];
        assert!(!verdict.within_tolerance);
        assert!(matches!(
            verdict.failure,
            Some(VerdictFailure::ToleranceExceeded { .. })
        ));
        assert!(verdict.difference.expect("difference") > 1e-4);
        assert!(verdict.detail.ends_with("FAIL"));
    }

    #[test]
    fn test_within_tolerance_passes() {
        let comparison = compare_documents(
            &json!({ "return_energy": -76.00005 }),
            &json!({ "return_energy": -76.00000 }),
            &energy(),
            tol(1e-4),
        );

        assert!(comparison.passed);
        assert!(comparison.verdicts[0].failure.is_none());
        assert!(comparison.verdicts[0].detail.ends_with("PASS"));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let comparison = compare_documents(
            &json!({ "x": 1.5 }),
            &json!({ "x": 1.0 }),
            &[ComparisonField::new("x")],
            tol(0.5),
        );
        assert!(comparison.passed);
        assert_eq!(comparison.verdicts[0].difference, Some(0.5));
    }

    #[test]
    fn test_equal_values_pass_with_zero_tolerance() {
        let comparison = compare_documents(
            &json!({ "return_energy": -76.4, "iterations": 7 }),
            &json!({ "return_energy": -76.4, "iterations": 7 }),
            &[
                ComparisonField::new("return_energy"),
                ComparisonField::new("iterations"),
            ],
            tol(0.0),
        );
        assert!(comparison.passed);
    }

    #[test]
    fn test_integer_and_float_compare_numerically() {
        let comparison = compare_documents(
            &json!({ "n": 10 }),
            &json!({ "n": 10.0 }),
            &[ComparisonField::new("n")],
            tol(0.0),
        );
        assert!(comparison.passed);
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let fields = vec![ComparisonField::new("grid_points")];

        let differing = compare_documents(
            &json!({ "grid_points": 9007199254740993u64 }),
            &json!({ "grid_points": 9007199254740992u64 }),
            &fields,
            tol(0.0),
        );
        assert!(!differing.passed);
        assert_eq!(differing.verdicts[0].difference, Some(1.0));

        let within = compare_documents(
            &json!({ "grid_points": 9007199254740993u64 }),
            &json!({ "grid_points": 9007199254740992u64 }),
            &fields,
            tol(1.0),
        );
        assert!(within.passed);

        let extremes = compare_documents(
            &json!({ "n": u64::MAX }),
            &json!({ "n": i64::MIN }),
            &[ComparisonField::new("n")],
            tol(0.0),
        );
        assert!(!extremes.passed);
    }

    #[test]
    fn test_per_field_tolerance_override() {
        let fields = vec![
            ComparisonField::new("return_energy").with_tolerance(tol(1e-3)),
            ComparisonField::new("dipole"),
        ];
        let comparison = compare_documents(
            &json!({ "return_energy": -76.0005, "dipole": 0.7305 }),
            &json!({ "return_energy": -76.0, "dipole": 0.73 }),
            &fields,
            tol(1e-4),
        );

        assert!(comparison.verdicts[0].within_tolerance);
        assert_eq!(comparison.verdicts[0].tolerance, Some(1e-3));
        assert!(!comparison.verdicts[1].within_tolerance);
        assert!(!comparison.passed);
    }

    #[test]
    fn test_missing_field_is_failing_verdict_and_others_still_evaluated() {
        let fields = vec![
            ComparisonField::new("return_energy"),
            ComparisonField::new("nuclear_repulsion"),
            ComparisonField::new("absent_everywhere"),
        ];
        let comparison = compare_documents(
            &json!({ "return_energy": -76.0 }),
            &json!({ "return_energy": -76.0, "nuclear_repulsion": 9.19 }),
            &fields,
            tol(1e-4),
        );

        assert_eq!(comparison.verdicts.len(), 3);
        assert!(comparison.verdicts[0].within_tolerance);
        assert_eq!(
            comparison.verdicts[1].failure,
            Some(VerdictFailure::MissingField {
                side: DocumentSide::Actual
            })
        );
        assert_eq!(
            comparison.verdicts[2].failure,
            Some(VerdictFailure::MissingField {
                side: DocumentSide::Both
            })
        );
        assert_eq!(comparison.failed_count(), 2);
        assert!(!comparison.passed);
    }

    #[test]
    fn test_missing_from_reference() {
        let comparison = compare_documents(
            &json!({ "return_energy": -76.0 }),
            &json!({}),
            &energy(),
            tol(1e-4),
        );
        assert_eq!(
            comparison.verdicts[0].failure,
            Some(VerdictFailure::MissingField {
                side: DocumentSide::Reference
            })
        );
        assert!(comparison.verdicts[0].detail.contains("reference document"));
    }

    #[test]
    fn test_non_numeric_fields_use_exact_equality() {
        let fields = vec![
            ComparisonField::new("localize"),
            ComparisonField::new("converged"),
        ];
        let comparison = compare_documents(
            &json!({ "localize": "boys", "converged": true }),
            &json!({ "localize": "Boys", "converged": true }),
            &fields,
            tol(1e9),
        );

        assert_eq!(
            comparison.verdicts[0].failure,
            Some(VerdictFailure::ValueMismatch)
        );
        assert!(comparison.verdicts[0].difference.is_none());
        assert!(comparison.verdicts[1].within_tolerance);
    }

    #[test]
    fn test_number_against_string_is_type_mismatch() {
        let comparison = compare_documents(
            &json!({ "return_energy": "-76.0" }),
            &json!({ "return_energy": -76.0 }),
            &energy(),
            tol(1.0),
        );
        assert_eq!(
            comparison.verdicts[0].failure,
            Some(VerdictFailure::TypeMismatch)
        );
    }

    #[test]
    fn test_nested_structures_compare_exactly() {
        let comparison = compare_documents(
            &json!({ "scf": { "orbitals": [1, 2] } }),
            &json!({ "scf": { "orbitals": [1, 2] } }),
            &[ComparisonField::new("scf")],
            tol(0.0),
        );
        assert!(comparison.passed);
    }

    #[test]
    fn test_lookup_dotted_paths_and_indices() {
        let doc = json!({
            "scf": { "energies": [-75.9, -76.0] },
            "a.b": 3,
        });

        assert_eq!(lookup_field(&doc, "scf.energies.1"), Some(&json!(-76.0)));
        assert_eq!(lookup_field(&doc, "a.b"), Some(&json!(3)));
        assert_eq!(lookup_field(&doc, "scf.energies.7"), None);
        assert_eq!(lookup_field(&doc, "scf.energies.x"), None);
        assert_eq!(lookup_field(&doc, "scf.missing"), None);
    }

    #[test]
    fn test_comparison_is_repeatable_and_leaves_documents_untouched() {
        let actual = json!({ "return_energy": -76.00012, "k": 8 });
        let reference = json!({ "return_energy": -76.0, "k": 8 });
        let before = (actual.clone(), reference.clone());
        let fields = vec![ComparisonField::new("return_energy"), ComparisonField::new("k")];

        let first = compare_documents(&actual, &reference, &fields, tol(1e-4));
        let second = compare_documents(&actual, &reference, &fields, tol(1e-4));

        assert_eq!(first, second);
        assert_eq!((actual, reference), before);
    }

    #[test]
    fn test_field_deserialize_both_forms() {
        let fields: Vec<ComparisonField> = serde_json::from_value(json!([
            "return_energy",
            { "name": "dipole", "tolerance": 1e-3 }
        ]))
        .expect("parse fields");

        assert_eq!(fields[0], ComparisonField::new("return_energy"));
        assert_eq!(fields[1].tolerance, Some(tol(1e-3)));
    }

    #[test]
    fn test_compare_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let actual = dir.path().join("madtestcanon.calc_info.json");
        let reference = dir.path().join("madtestcanon.calc_info.ref.json");
        std::fs::write(&actual, r#"{"return_energy": -76.00005}"#).expect("write");
        std::fs::write(&reference, r#"{"return_energy": -76.0}"#).expect("write");

        let comparison = compare(&actual, &reference, &energy(), tol(1e-4)).expect("compare");
        assert!(comparison.passed);

        let reference_text = std::fs::read_to_string(&reference).expect("read");
        assert_eq!(reference_text, r#"{"return_energy": -76.0}"#);
    }

    #[test]
    fn test_missing_reference_is_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let actual = dir.path().join("a.calc_info.json");
        std::fs::write(&actual, r#"{"return_energy": -76.0}"#).expect("write");

        let err = compare(
            &actual,
            &dir.path().join("absent.calc_info.ref.json"),
            &energy(),
            tol(1e-4),
        )
        .unwrap_err();
        assert!(matches!(err, DocumentLoadError::Read { .. }));
    }

    #[test]
    fn test_malformed_and_non_object_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = dir.path().join("broken.json");
        let list = dir.path().join("list.json");
        std::fs::write(&broken, "{ not json").expect("write");
        std::fs::write(&list, "[1, 2]").expect("write");

        assert!(matches!(
            load_document(&broken),
            Err(DocumentLoadError::Parse { .. })
        ));
        assert!(matches!(
            load_document(&list),
            Err(DocumentLoadError::NotAMapping { .. })
        ));
    }
}
