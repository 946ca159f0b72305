//! Shared types for the Vigil anomaly distribution service.
//!
//! This crate provides the record model that every other Vigil crate
//! speaks: the classified event itself, its classification kind, the query
//! shape used to pull records from the event source, and the fixed-width
//! timestamp codec used for storage.
//!
//! No crate in the workspace depends on anything *except* `vigil-types` for
//! cross-cutting type definitions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length in bytes of a classified record's parameter value.
pub const MAX_PARAM_VALUE_LEN: usize = 1024;

/// Classification assigned to a record by the upstream pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationKind {
    /// A record matching a known anomaly pattern.
    Anomaly,
    /// A record the classifier could not place.
    Unidentified,
}

impl ClassificationKind {
    /// All kinds, in the order they are reported to the sink.
    pub const ALL: [ClassificationKind; 2] = [Self::Anomaly, Self::Unidentified];

    /// Returns the canonical string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Unidentified => "unidentified",
        }
    }
}

impl std::fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClassificationKind {
    type Err = ParseClassificationKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly" => Ok(Self::Anomaly),
            "unidentified" => Ok(Self::Unidentified),
            _ => Err(ParseClassificationKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown classification kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown classification type: {0} (expected anomaly or unidentified)")]
pub struct ParseClassificationKindError(pub String);

/// A record produced by the classification pipeline.
///
/// Immutable once created. Identifiers are assigned by the record store and
/// increase monotonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Store-assigned identifier.
    pub id: i64,
    /// When the record was classified.
    pub timestamp: DateTime<Utc>,
    /// Free-text parameter value extracted from the log line.
    pub param_value: String,
    /// Classification kind.
    pub classification_type: ClassificationKind,
}

/// Filter for pulling classified records from an event source.
///
/// Results are always ordered newest first and truncated at `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Restrict to one classification kind.
    pub kind: Option<ClassificationKind>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub until: Option<DateTime<Utc>>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            kind: None,
            since: None,
            until: None,
            offset: 0,
            limit: 100,
        }
    }
}

impl RecordQuery {
    /// Query for the newest `limit` records of one kind.
    pub fn newest(kind: ClassificationKind, limit: usize) -> Self {
        Self {
            kind: Some(kind),
            limit,
            ..Self::default()
        }
    }

    /// Restricts the query to records at or after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Restricts the query to records at or before `until`.
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

/// Error returned when a stored timestamp cannot be decoded.
#[derive(Debug, thiserror::Error)]
#[error("invalid stored timestamp {value:?}: {source}")]
pub struct TimestampError {
    /// The offending text.
    pub value: String,
    /// The underlying parse failure.
    pub source: chrono::ParseError,
}

/// Encodes a timestamp as fixed-width RFC 3339 UTC text.
///
/// Always emits microsecond precision and a `Z` suffix, so the lexicographic
/// order of encoded values matches chronological order.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decodes a timestamp produced by [`encode_timestamp`].
///
/// Any RFC 3339 value is accepted and normalised to UTC.
pub fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| TimestampError {
            value: value.to_string(),
            source,
        })
}
