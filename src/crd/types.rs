//! Shared spec and status types for the kuberbac CRDs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Synchronization behavior of a source CR
///
/// `time` bounds the staleness of the produced targets: every interval the
/// source is reconciled again even without spec changes, so wildcard
/// expansions pick up CRDs installed since the last run.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationSpec {
    /// Resynchronization period as a Go-style duration string (e.g. "30s", "5m30s")
    pub time: String,
}

impl SynchronizationSpec {
    /// Parse the configured period into a [`Duration`]
    pub fn interval(&self) -> Result<Duration, Error> {
        parse_duration(&self.time)
    }
}

/// Parse a Go-style duration string ("300ms", "1.5h", "2h45m")
///
/// Implements the same grammar as Go's `time.ParseDuration`, restricted to
/// non-negative values: a sequence of decimal numbers each followed by a
/// unit suffix out of ns, us, ms, s, m, h.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = || Error::sync_time(format!("can not parse '{input}' as a duration"));

    let mut s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    while !s.is_empty() {
        // leading decimal number
        let value_end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        let value: f64 = s[..value_end].parse().map_err(|_| invalid())?;
        s = &s[value_end..];

        // unit suffix runs until the next digit
        let unit_end = s
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(s.len());
        let base = match &s[..unit_end] {
            "ns" => Duration::from_nanos(1),
            "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            _ => return Err(invalid()),
        };
        s = &s[unit_end..];

        total += base.mul_f64(value);
    }

    Ok(total)
}

/// Regular expression branch shared by the name and namespace selectors
///
/// `negative` inverts the match: a name is selected when it does NOT match
/// the expression.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchRegex {
    /// Regular expression evaluated against the object name
    pub expression: String,

    /// Invert the match semantics
    #[serde(default)]
    pub negative: bool,
}

/// Selects objects by name, either from a fixed list or by regex
///
/// Exactly one branch must be populated.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NameSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_list: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_regex: Option<MatchRegex>,
}

/// Selects objects by metadata, by labels or by annotations
///
/// Exactly one branch must be populated. Matching uses subset semantics:
/// every key in the selector must be present on the object with an equal
/// value.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_annotations: Option<BTreeMap<String, String>>,
}

/// Selects namespaces by labels, by a fixed name list, or by name regex
///
/// Exactly one branch must be populated when the selector is present.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_list: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_regex: Option<MatchRegex>,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. ResourceSynced)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned between statuses
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the source spec this condition was observed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Attach the source generation the condition was observed against
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Insert or update a condition by type
///
/// `lastTransitionTime` only moves when the status actually changes, so a
/// steadily-succeeding source keeps its original transition timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}
