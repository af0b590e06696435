//! History compression.
//!
//! When the uncompressed history grows long enough, the full rendered log is
//! sent to the summarizer and the result becomes the story's condensed
//! context. Segments are never deleted; only the context sent to the
//! generator shrinks (via the windowing in the generation use case).
//!
//! Requests are deduplicated by (story, source size): a second request with
//! the identical key while the first is unresolved is a no-op. On completion
//! the latest persisted story is fetched fresh and the result is discarded if
//! a newer compression already landed.

use std::collections::HashSet;
use std::sync::Arc;

use taleweaver_domain::{StoryId, StorySummaryRecord, SummaryId};
use tokio::sync::Mutex;

use crate::infrastructure::ports::{
    ClockPort, NarrativeError, StoreError, StoryStore, SummarizerPort, SummaryRequest,
};
use crate::use_cases::images::{SceneImageQueue, SceneTask, TriggerReason};
use crate::use_cases::render_history;

/// History length at which compression becomes eligible.
pub const COMPRESS_THRESHOLD_CHARS: usize = 15_000;
/// Minimum growth since the last compression, in characters.
pub const RECOMPRESS_MIN_GROWTH: usize = 1_200;
/// Fraction of the threshold that must have grown back before recompressing.
pub const RECOMPRESS_GROWTH_RATIO: f64 = 0.4;

/// Summary titles shown to the summarizer for continuity.
const RECENT_TITLES_SENT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("Story not found")]
    StoryNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Summarization failed: {0}")]
    Summarize(#[from] NarrativeError),
}

fn growth_floor() -> usize {
    RECOMPRESS_MIN_GROWTH.max((COMPRESS_THRESHOLD_CHARS as f64 * RECOMPRESS_GROWTH_RATIO) as usize)
}

/// Pure trigger condition over history size and the last recorded source size.
pub fn should_compress(history_chars: usize, last_source_chars: Option<usize>) -> bool {
    if history_chars < COMPRESS_THRESHOLD_CHARS {
        return false;
    }
    match last_source_chars {
        None => true,
        Some(prev) => history_chars.saturating_sub(prev) >= growth_floor(),
    }
}

pub struct CompressHistory {
    store: Arc<dyn StoryStore>,
    summarizer: Arc<dyn SummarizerPort>,
    clock: Arc<dyn ClockPort>,
    /// Scene artwork is refreshed from each new summary.
    scene_queue: Option<Arc<SceneImageQueue>>,
    pending: Mutex<HashSet<(StoryId, usize)>>,
}

impl CompressHistory {
    pub fn new(
        store: Arc<dyn StoryStore>,
        summarizer: Arc<dyn SummarizerPort>,
        clock: Arc<dyn ClockPort>,
        scene_queue: Option<Arc<SceneImageQueue>>,
    ) -> Self {
        Self {
            store,
            summarizer,
            clock,
            scene_queue,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Check the trigger and run compression when due.
    ///
    /// Returns `Ok(None)` when nothing was (or needed to be) done: below
    /// threshold, duplicate in-flight key, or a newer compression landed
    /// first.
    pub async fn check_and_run(&self, story_id: StoryId) -> Result<Option<SummaryId>, CompressionError> {
        let story = self
            .store
            .get(story_id)
            .await?
            .ok_or(CompressionError::StoryNotFound)?;
        let history_chars = story.history_char_len();
        if !should_compress(history_chars, story.last_summary_source_chars()) {
            return Ok(None);
        }

        let key = (story_id, history_chars);
        {
            let mut pending = self.pending.lock().await;
            if !pending.insert(key) {
                tracing::debug!(story_id = %story_id, source_chars = history_chars,
                    "Compression already pending for this key");
                return Ok(None);
            }
        }

        let result = self.run(story_id, history_chars).await;
        self.pending.lock().await.remove(&key);
        result
    }

    async fn run(
        &self,
        story_id: StoryId,
        source_chars: usize,
    ) -> Result<Option<SummaryId>, CompressionError> {
        // Snapshot used to build the request; apply-time state is re-fetched.
        let story = self
            .store
            .get(story_id)
            .await?
            .ok_or(CompressionError::StoryNotFound)?;

        let request = SummaryRequest {
            history_text: render_history(story.segments()),
            recent_titles: story
                .summary_history
                .iter()
                .take(RECENT_TITLES_SENT)
                .map(|r| r.title.clone())
                .collect(),
        };
        let outcome = self.summarizer.summarize(request).await?;

        // Fetch fresh: a newer compression may have landed while we waited.
        let mut fresh = self
            .store
            .get(story_id)
            .await?
            .ok_or(CompressionError::StoryNotFound)?;
        if fresh
            .last_summary_source_chars()
            .is_some_and(|prev| prev >= source_chars)
        {
            tracing::debug!(story_id = %story_id, source_chars,
                "Newer compression already applied, discarding result");
            return Ok(None);
        }

        let record = StorySummaryRecord::new(
            outcome.title,
            outcome.summary.clone(),
            outcome.involved_characters,
            source_chars,
            self.clock.now(),
        );
        let summary_id = record.id;
        fresh.record_summary(record);
        self.store.put(&fresh).await?;
        tracing::info!(story_id = %story_id, source_chars, "History compressed");

        if let Some(queue) = &self.scene_queue {
            queue.enqueue(SceneTask {
                story_id,
                summary_text: outcome.summary,
                reason: TriggerReason::Compression,
            });
        }

        Ok(Some(summary_id))
    }
}
