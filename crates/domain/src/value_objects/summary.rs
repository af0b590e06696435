//! Compression artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SummaryId;

/// One completed history compression.
///
/// Prepended to the story's summary history (newest first) and never mutated
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySummaryRecord {
    pub id: SummaryId,
    /// Short title for the compressed span.
    pub title: String,
    /// The summary text that replaces older context.
    pub summary: String,
    /// Names of characters featured in the compressed span.
    pub involved_characters: Vec<String>,
    /// Size in characters of the history this record compressed.
    pub source_chars: usize,
    pub created_at: DateTime<Utc>,
}

impl StorySummaryRecord {
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        involved_characters: Vec<String>,
        source_chars: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SummaryId::new(),
            title: title.into(),
            summary: summary.into(),
            involved_characters,
            source_chars,
            created_at,
        }
    }
}
