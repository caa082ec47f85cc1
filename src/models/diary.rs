//! Diary entry model and the day-grouped projection used by every listing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single diary entry owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    /// Remote object paths, in display order.
    #[serde(default)]
    pub images: Vec<String>,
    pub date: DateTime<Utc>,
}

/// Entries grouped by calendar day, oldest day first.
pub type DiaryGroups = BTreeMap<NaiveDate, Vec<DiaryEntry>>;

/// Group entries by their calendar day in `offset`, newest entry first within a day.
pub fn group_by_day(entries: Vec<DiaryEntry>, offset: FixedOffset) -> DiaryGroups {
    let mut groups = DiaryGroups::new();
    for entry in entries {
        let day = entry.date.with_timezone(&offset).date_naive();
        groups.entry(day).or_default().push(entry);
    }
    for day in groups.values_mut() {
        day.sort_by(|a, b| b.date.cmp(&a.date));
    }
    groups
}

/// A local image the user attached to an entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImage {
    pub local_path: PathBuf,
    /// File extension used for the remote object name (default: "jpg").
    #[serde(default)]
    pub extension: Option<String>,
}

impl NewImage {
    pub fn extension(&self) -> &str {
        self.extension
            .as_deref()
            .or_else(|| self.local_path.extension().and_then(|e| e.to_str()))
            .unwrap_or("jpg")
    }
}

/// Request body for creating a diary entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiaryRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Defaults to now when omitted.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<NewImage>,
}

/// Request body for editing a diary entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDiaryRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub add_images: Vec<NewImage>,
    /// Remote paths to drop from the entry and delete from storage.
    #[serde(default)]
    pub remove_images: Vec<String>,
}

/// Request body for moving an anonymous account's entries to the current owner.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDiariesRequest {
    pub from_owner_id: String,
}
