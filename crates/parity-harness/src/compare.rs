//! Semantic equivalence of response bodies
//!
//! Two bodies are compared under the rules of their declared content kind,
//! never byte-for-byte:
//! - `version`: both must look like a `subconverter vX backend` banner
//! - `json` / `yaml`: parsed and compared in canonical form (mapping keys
//!   sorted, sequence order kept)
//! - `text`: compared after line normalization

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const VERSION_PREFIX: &str = "subconverter v";
const VERSION_SUFFIX: &str = " backend";

/// Declared content kind of a case response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Version,
    Json,
    Yaml,
    Text,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Version => write!(f, "version"),
            ContentKind::Json => write!(f, "json"),
            ContentKind::Yaml => write!(f, "yaml"),
            ContentKind::Text => write!(f, "text"),
        }
    }
}

/// Comparison mode actually applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    Version,
    Json,
    Yaml,
    Text,
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::Version => write!(f, "version"),
            CompareMode::Json => write!(f, "json"),
            CompareMode::Yaml => write!(f, "yaml"),
            CompareMode::Text => write!(f, "text"),
        }
    }
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub equal: bool,
    pub mode: CompareMode,
}

/// A body could not be parsed, so equality is undefined
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Decide whether `left` and `right` are equivalent under `kind`
pub fn semantic_equal(
    kind: ContentKind,
    left: &str,
    right: &str,
) -> Result<Comparison, CompareError> {
    let (equal, mode) = match kind {
        ContentKind::Version => (
            is_version_banner(left) && is_version_banner(right),
            CompareMode::Version,
        ),
        ContentKind::Json => {
            let l: serde_json::Value = serde_json::from_str(left)?;
            let r: serde_json::Value = serde_json::from_str(right)?;
            (
                Canonical::from_json(&l) == Canonical::from_json(&r),
                CompareMode::Json,
            )
        }
        ContentKind::Yaml => {
            let mut l: serde_yaml::Value = serde_yaml::from_str(left)?;
            let mut r: serde_yaml::Value = serde_yaml::from_str(right)?;
            l.apply_merge()?;
            r.apply_merge()?;
            (
                Canonical::from_yaml(&l) == Canonical::from_yaml(&r),
                CompareMode::Yaml,
            )
        }
        ContentKind::Text => (normalize_text(left) == normalize_text(right), CompareMode::Text),
    };

    Ok(Comparison { equal, mode })
}

/// Unify line endings, strip trailing whitespace per line and drop
/// trailing blank lines. Leading whitespace and interior blank lines stay.
pub fn normalize_text(value: &str) -> String {
    let unified = value.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

// The version number itself is ignored: releases differ between builds.
fn is_version_banner(body: &str) -> bool {
    let normalized = normalize_text(body).to_lowercase();
    normalized.starts_with(VERSION_PREFIX) && normalized.ends_with(VERSION_SUFFIX)
}

/// Ordered, structurally comparable form of a parsed document.
///
/// Mapping entries are kept sorted by key, so two documents that differ
/// only in member order are equal. Integral floats collapse into `Int`.
#[derive(Debug, Clone)]
pub enum Canonical {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Seq(Vec<Canonical>),
    Map(Vec<(Canonical, Canonical)>),
}

impl Canonical {
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Canonical::Null,
            Value::Bool(b) => Canonical::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Canonical::Int(i as i128)
                } else if let Some(u) = n.as_u64() {
                    Canonical::Int(u as i128)
                } else {
                    Canonical::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Canonical::Str(s.clone()),
            Value::Array(items) => Canonical::Seq(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Canonical::map(
                map.iter()
                    .map(|(k, v)| (Canonical::Str(k.clone()), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        use serde_yaml::Value;
        match value {
            Value::Null => Canonical::Null,
            Value::Bool(b) => Canonical::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Canonical::Int(i as i128)
                } else if let Some(u) = n.as_u64() {
                    Canonical::Int(u as i128)
                } else {
                    Canonical::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Canonical::Str(s.clone()),
            Value::Sequence(items) => Canonical::Seq(items.iter().map(Self::from_yaml).collect()),
            Value::Mapping(map) => Canonical::map(
                map.iter()
                    .map(|(k, v)| (Self::from_yaml(k), Self::from_yaml(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    /// Render back to JSON; non-string keys are stringified
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Canonical::Null => Value::Null,
            Canonical::Bool(b) => Value::Bool(*b),
            Canonical::Int(i) => match i64::try_from(*i) {
                Ok(i) => Value::from(i),
                Err(_) => Value::from(*i as f64),
            },
            Canonical::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Canonical::Str(s) => Value::String(s.clone()),
            Canonical::Seq(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Canonical::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.key_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn float(f: f64) -> Self {
        // 2^127 is exact as f64; everything strictly inside fits an i128
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i128::MAX as f64 {
            Canonical::Int(f as i128)
        } else {
            Canonical::Float(f)
        }
    }

    fn map(mut entries: Vec<(Canonical, Canonical)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Canonical::Map(entries)
    }

    fn key_string(&self) -> String {
        match self {
            Canonical::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Canonical::Null => 0,
            Canonical::Bool(_) => 1,
            Canonical::Int(_) => 2,
            Canonical::Float(_) => 3,
            Canonical::Str(_) => 4,
            Canonical::Seq(_) => 5,
            Canonical::Map(_) => 6,
        }
    }
}

impl Ord for Canonical {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Canonical::Null, Canonical::Null) => Ordering::Equal,
            (Canonical::Bool(a), Canonical::Bool(b)) => a.cmp(b),
            (Canonical::Int(a), Canonical::Int(b)) => a.cmp(b),
            (Canonical::Float(a), Canonical::Float(b)) => a.total_cmp(b),
            (Canonical::Str(a), Canonical::Str(b)) => a.cmp(b),
            (Canonical::Seq(a), Canonical::Seq(b)) => a.cmp(b),
            (Canonical::Map(a), Canonical::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Canonical {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Canonical {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Canonical {}
