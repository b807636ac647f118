//! Contract schemas shared by the request path and the stream path
//!
//! ## Table of Contents
//! - **Validate**: Trait implemented by every contract type
//! - **Violations**: Collector that records every failed constraint
//! - **ValidationError**: All violations found in one input
//! - **parse / from_value**: Decode-then-validate entry points
//! - **merge_results**: Combine independent checks into one report
//!
//! Decoding is done by serde, tracked with `serde_path_to_error`. A missing or
//! mistyped field is recorded at its path, patched with a placeholder, and
//! decoding resumes, so every shape error is found in one pass. Numeric and
//! string constraints are then checked on the decoded value, skipping the
//! patched fields. A rejected input reports every offending field.

pub mod common;
pub mod frame;
pub mod pathogen;
pub mod run;
pub mod scenario;

pub use common::{Dataset, PaginatedResponse, ProblemError, Region};
pub use frame::{Frame, FramePerf, TimeSeriesPoint};
pub use pathogen::Pathogen;
pub use run::{Run, RunCreateRequest, RunStatus};
pub use scenario::{
    EngineCfg, EngineType, NpiDefinition, NpiTimelineEntry, Scenario, ScenarioCreateRequest,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A constraint that a field failed to satisfy
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// The input could not be decoded into the typed shape
    Decode(String),
    /// Value must be `>= 0`
    NonNegative,
    /// Value must be `> 0`
    Positive,
    /// Value must be a finite number
    Finite,
    /// Value must lie within `[min, max]`
    Range {
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
    },
    /// String must have at least this many characters
    MinLength(usize),
    /// String must be an absolute URI
    Uri,
    /// Value must be unique within its collection
    Unique,
    /// Value must reference an existing entry
    UnknownReference(String),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Decode(msg) => write!(f, "malformed input: {}", msg),
            Constraint::NonNegative => write!(f, "must be a non-negative number"),
            Constraint::Positive => write!(f, "must be a positive number"),
            Constraint::Finite => write!(f, "must be a finite number"),
            Constraint::Range { min, max } => write!(f, "must be within [{}, {}]", min, max),
            Constraint::MinLength(n) => write!(f, "must be at least {} character(s)", n),
            Constraint::Uri => write!(f, "must be a URI"),
            Constraint::Unique => write!(f, "must be unique"),
            Constraint::UnknownReference(id) => write!(f, "references unknown id `{}`", id),
        }
    }
}

/// One violated constraint at a field path (e.g. `series[0].S`)
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    /// Dotted/indexed path to the field, `$` for the whole input
    pub path: String,
    /// The constraint that failed
    pub constraint: Constraint,
}

/// Every violation found while validating one input
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render(.violations))]
pub struct ValidationError {
    /// Violations in the order they were found
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Build an error for an input that failed to decode
    pub fn decode(msg: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                path: "$".to_string(),
                constraint: Constraint::Decode(msg.into()),
            }],
        }
    }

    /// Paths of all violated fields
    pub fn paths(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.path.as_str()).collect()
    }

    /// Whether `path` is among the violations
    pub fn has_path(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }

    /// Append the violations of `other`
    pub fn merge(mut self, other: ValidationError) -> Self {
        self.violations.extend(other.violations);
        self
    }
}

/// Combine two validation outcomes, keeping every violation
pub fn merge_results(
    first: Result<(), ValidationError>,
    second: Result<(), ValidationError>,
) -> Result<(), ValidationError> {
    match (first, second) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(a), Err(b)) => Err(a.merge(b)),
    }
}

fn render(violations: &[FieldViolation]) -> String {
    let mut out = format!("{} violation(s)", violations.len());
    for (i, v) in violations.iter().enumerate() {
        let sep = if i == 0 { ": " } else { "; " };
        out.push_str(&format!("{}{} {}", sep, v.path, v.constraint));
    }
    out
}

/// Join a parent path and a field name
pub fn field_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

/// Join a parent path and a collection index
pub fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Collector for constraint failures
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<FieldViolation>,
}

impl Violations {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation
    pub fn push(&mut self, path: impl Into<String>, constraint: Constraint) {
        self.items.push(FieldViolation {
            path: path.into(),
            constraint,
        });
    }

    /// Require `value >= 0` (NaN fails)
    pub fn non_negative(&mut self, path: impl Into<String>, value: f64) {
        if !(value >= 0.0) || value.is_infinite() {
            self.push(path, Constraint::NonNegative);
        }
    }

    /// Optional variant of [`Violations::non_negative`]
    pub fn non_negative_opt(&mut self, path: impl Into<String>, value: Option<f64>) {
        if let Some(value) = value {
            self.non_negative(path, value);
        }
    }

    /// Require `value > 0` (NaN fails)
    pub fn positive(&mut self, path: impl Into<String>, value: f64) {
        if !(value > 0.0) || value.is_infinite() {
            self.push(path, Constraint::Positive);
        }
    }

    /// Require `min <= value <= max`
    pub fn within(&mut self, path: impl Into<String>, value: f64, min: f64, max: f64) {
        if !(value >= min && value <= max) {
            self.push(path, Constraint::Range { min, max });
        }
    }

    /// Require a finite number
    pub fn finite(&mut self, path: impl Into<String>, value: f64) {
        if !value.is_finite() {
            self.push(path, Constraint::Finite);
        }
    }

    /// Require at least `min` characters
    pub fn min_len(&mut self, path: impl Into<String>, value: &str, min: usize) {
        if value.chars().count() < min {
            self.push(path, Constraint::MinLength(min));
        }
    }

    /// Require an absolute URI
    pub fn uri(&mut self, path: impl Into<String>, value: &str) {
        if url::Url::parse(value).is_err() {
            self.push(path, Constraint::Uri);
        }
    }

    /// Number of violations recorded so far
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no violation has been recorded
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finish collecting
    pub fn finish(self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.items,
            })
        }
    }
}

/// Trait implemented by every contract type
pub trait Validate {
    /// Record every constraint failure under `path`
    fn check(&self, path: &str, violations: &mut Violations);

    /// Validate the whole value
    fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Violations::new();
        self.check("", &mut violations);
        violations.finish()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn check(&self, path: &str, violations: &mut Violations) {
        for (i, item) in self.iter().enumerate() {
            item.check(&index_path(path, i), violations);
        }
    }
}

const MAX_DECODE_PASSES: usize = 256;

const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

const EPOCH: &str = "1970-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Step {
    Key(String),
    Index(usize),
}

fn render_steps(steps: &[Step]) -> String {
    steps.iter().fold(String::new(), |acc, step| match step {
        Step::Key(key) => field_path(&acc, key),
        Step::Index(i) => index_path(&acc, *i),
    })
}

fn covers(patched: &[Step], path: &str) -> bool {
    let prefix = render_steps(patched);
    prefix.is_empty()
        || path == prefix
        || path.strip_prefix(prefix.as_str()).map_or(false, |rest| {
            rest.starts_with('.') || rest.starts_with('[')
        })
}

fn backticked<'a>(message: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &message[message.find(marker)? + marker.len()..];
    rest.split('`').next()
}

/// Location of a decode failure; a missing field is reported by serde at its parent
fn locate(path: &serde_path_to_error::Path, message: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for segment in path.iter() {
        match segment {
            serde_path_to_error::Segment::Seq { index } => steps.push(Step::Index(*index)),
            serde_path_to_error::Segment::Map { key } => steps.push(Step::Key(key.clone())),
            serde_path_to_error::Segment::Enum { .. } => {}
            _ => break,
        }
    }
    if let Some(field) = backticked(message, "missing field `") {
        steps.push(Step::Key(field.to_string()));
    }
    steps
}

/// Stand-in values tried in order until the field decodes
fn placeholders(message: &str) -> Vec<Value> {
    let mut values = Vec::new();
    if let Some(variant) = backticked(message, "expected one of `") {
        values.push(Value::String(variant.to_string()));
    }
    values.extend([
        Value::from(0),
        Value::from(NIL_UUID),
        Value::from(EPOCH),
        Value::Array(Vec::new()),
        Value::Object(serde_json::Map::new()),
        Value::Bool(false),
        Value::Null,
    ]);
    values
}

fn patch(value: &mut Value, steps: &[Step], placeholder: Value) -> bool {
    let Some((last, parents)) = steps.split_last() else {
        *value = placeholder;
        return true;
    };
    let mut target = value;
    for step in parents {
        target = match (step, target) {
            (Step::Key(key), Value::Object(map)) => match map.get_mut(key) {
                Some(next) => next,
                None => return false,
            },
            (Step::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                Some(next) => next,
                None => return false,
            },
            _ => return false,
        };
    }
    match (last, target) {
        (Step::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), placeholder);
            true
        }
        (Step::Index(i), Value::Array(items)) if *i < items.len() => {
            items[*i] = placeholder;
            true
        }
        _ => false,
    }
}

/// Decode JSON text and validate it
pub fn parse<T>(raw: &str) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ValidationError::decode(e.to_string()))?;
    from_value(value)
}

/// Decode an already-parsed JSON value and validate it
pub fn from_value<T>(mut value: Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let mut violations = Violations::new();
    let mut patched: Vec<Vec<Step>> = Vec::new();
    let mut tries: HashMap<Vec<Step>, usize> = HashMap::new();

    for _ in 0..MAX_DECODE_PASSES {
        let err = match serde_path_to_error::deserialize::<_, T>(&value) {
            Ok(decoded) => {
                let mut checked = Violations::new();
                decoded.check("", &mut checked);
                for item in checked.items {
                    if !patched.iter().any(|steps| covers(steps, &item.path)) {
                        violations.items.push(item);
                    }
                }
                return violations.finish().map(|()| decoded);
            }
            Err(err) => err,
        };

        let message = err.inner().to_string();
        let steps = locate(err.path(), &message);
        if !patched.iter().any(|p| steps.starts_with(p)) {
            let path = match render_steps(&steps) {
                p if p.is_empty() => "$".to_string(),
                p => p,
            };
            violations.push(path, Constraint::Decode(message.clone()));
            patched.push(steps.clone());
        }

        let attempt = tries.entry(steps.clone()).or_insert(0);
        let Some(placeholder) = placeholders(&message).into_iter().nth(*attempt) else {
            break;
        };
        *attempt += 1;
        if !patch(&mut value, &steps, placeholder) {
            break;
        }
    }

    if violations.is_empty() {
        violations.push("$", Constraint::Decode("input could not be decoded".to_string()));
    }
    Err(ValidationError {
        violations: violations.items,
    })
}

/// Accepts integers, including integral floats such as `3.0`
pub(crate) mod integral {
    use serde::de::{self, Deserializer, Unexpected, Visitor};
    use std::fmt;

    struct IntegralVisitor;

    impl<'de> Visitor<'de> for IntegralVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
                Ok(v as u64)
            } else {
                Err(E::invalid_value(Unexpected::Float(v), &self))
            }
        }
    }

    /// `deserialize_with` target for integer fields
    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
    {
        let n = deserializer.deserialize_any(IntegralVisitor)?;
        T::try_from(n).map_err(|_| {
            <D::Error as de::Error>::invalid_value(Unexpected::Unsigned(n), &"an integer in range")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(field_path("", "beta"), "beta");
        assert_eq!(field_path("pathogen", "beta"), "pathogen.beta");
        assert_eq!(index_path("series", 3), "series[3]");
    }

    #[test]
    fn test_collector_records_all() {
        let mut v = Violations::new();
        v.non_negative("a", -1.0);
        v.non_negative("b", f64::NAN);
        v.positive("c", 0.0);
        v.within("d", 1.5, 0.0, 1.0);
        v.min_len("e", "", 1);
        v.non_negative("ok", 0.0);
        v.positive("ok2", 0.1);

        let err = v.finish().unwrap_err();
        assert_eq!(err.paths(), vec!["a", "b", "c", "d", "e"]);
        assert!(err.to_string().starts_with("5 violation(s): a "));
    }

    const FRAME: &str = r#"{
        "runId": "6f1c2f7e-3b58-4f2b-9d3a-0c9a5b1e7d11",
        "t": 3.0,
        "status": "running",
        "series": [{
            "regionId": "0b5e6a3c-8d7f-4e21-a9b0-5c4d3e2f1a00",
            "S": 90, "E": 0, "I": 10, "R": 0, "D": 0
        }]
    }"#;

    #[test]
    fn test_integral_float_accepted() {
        let frame: Frame = parse(FRAME).unwrap();
        assert_eq!(frame.t, 3);

        let err = parse::<Frame>(&FRAME.replace("3.0", "3.5")).unwrap_err();
        assert_eq!(err.paths(), vec!["t"]);
        let err = parse::<Frame>(&FRAME.replace("3.0", "-1")).unwrap_err();
        assert_eq!(err.paths(), vec!["t"]);
    }

    #[test]
    fn test_mistyped_and_invalid_fields_together() {
        let raw = FRAME
            .replace(r#""S": 90"#, r#""S": "x""#)
            .replace(r#""I": 10"#, r#""I": -1"#);
        let err = parse::<Frame>(&raw).unwrap_err();
        assert_eq!(err.paths(), vec!["series[0].S", "series[0].I"]);
        assert!(matches!(err.violations[0].constraint, Constraint::Decode(_)));
        assert_eq!(err.violations[1].constraint, Constraint::NonNegative);
    }

    #[test]
    fn test_every_shape_error_found() {
        let raw = FRAME
            .replace(r#""status": "running""#, r#""status": "paused""#)
            .replace(r#""runId": "6f1c2f7e-3b58-4f2b-9d3a-0c9a5b1e7d11","#, "")
            .replace(r#""D": 0"#, r#""D": [1]"#);
        let err = parse::<Frame>(&raw).unwrap_err();
        let mut paths = err.paths();
        paths.sort();
        assert_eq!(paths, vec!["runId", "series[0].D", "status"]);
    }

    #[test]
    fn test_non_object_input_reported_at_root() {
        let err = parse::<Frame>("42").unwrap_err();
        assert_eq!(err.paths(), vec!["$"]);
    }

    #[test]
    fn test_merge_results_keeps_both() {
        let mut a = Violations::new();
        a.positive("a", 0.0);
        let mut b = Violations::new();
        b.positive("b", 0.0);
        let err = merge_results(a.finish(), b.finish()).unwrap_err();
        assert_eq!(err.paths(), vec!["a", "b"]);
        assert!(merge_results(Ok(()), Violations::new().finish()).is_ok());
    }

    #[test]
    fn test_decode_error_path() {
        let err = parse::<Pathogen>("not json").unwrap_err();
        assert!(err.has_path("$"));
        assert!(matches!(err.violations[0].constraint, Constraint::Decode(_)));
    }
}
