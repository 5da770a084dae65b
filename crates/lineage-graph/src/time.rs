//! Timestamps are stored as RFC3339 strings on nodes and edges.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::client::GraphError;

/// The same text form serde gives `DateTime<Utc>`, so views from either store agree.
pub(crate) fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>, GraphError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GraphError::Serialization(format!("Bad timestamp in {field} ({raw:?}): {e}")))
}

/// Empty string (what `coalesce(x, '')` yields for null) maps to `None`.
pub(crate) fn parse_opt_ts(raw: &str, field: &str) -> Result<Option<DateTime<Utc>>, GraphError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_ts(raw, field).map(Some)
    }
}
