//! Listing query types: the active filter and the published result wrapper.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Result of a read against the diary source.
///
/// Serialized as `{"status": "success", "data": ...}` etc.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "camelCase")]
pub enum QueryResult<T> {
    Idle,
    Loading,
    Success(T),
    Error(String),
}

impl<T> QueryResult<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryResult::Loading)
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            QueryResult::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// The filter applied to the diary listing. At most one is active.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ViewFilter {
    #[default]
    None,
    ByDate(NaiveDate),
    ByText(String),
}
