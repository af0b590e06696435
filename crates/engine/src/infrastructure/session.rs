//! Generation session registry.
//!
//! Enforces "at most one narrative generation in flight per story" and hands
//! out monotonically increasing generation tokens. Async completions use the
//! token (plus the active-story check) to detect staleness before touching
//! externally-observable state. Handles are removed as soon as a request
//! settles, by any path, so a stale handle can never cancel an unrelated
//! later request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use taleweaver_domain::StoryId;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A generation is already in flight for this story")]
    AlreadyGenerating,
}

struct ActiveGeneration {
    token: u64,
    cancel: CancellationToken,
}

/// A claimed per-story generation slot. Dropped handles stay registered until
/// [`GenerationRegistry::settle`] runs; the controller settles on every path.
pub struct GenerationSlot {
    pub story_id: StoryId,
    pub token: u64,
    cancel: CancellationToken,
}

impl GenerationSlot {
    /// Resolves when this generation is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Default)]
pub struct GenerationRegistry {
    active: DashMap<StoryId, ActiveGeneration>,
    latest_token: DashMap<StoryId, u64>,
    counter: AtomicU64,
    /// The story the player is currently in, for the staleness guard.
    active_story: Mutex<Option<StoryId>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the story's generation slot, tagging it with a fresh token.
    pub fn begin(&self, story_id: StoryId) -> Result<GenerationSlot, SessionError> {
        let token = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        match self.active.entry(story_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SessionError::AlreadyGenerating),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let cancel = CancellationToken::new();
                entry.insert(ActiveGeneration {
                    token,
                    cancel: cancel.clone(),
                });
                self.latest_token.insert(story_id, token);
                Ok(GenerationSlot {
                    story_id,
                    token,
                    cancel,
                })
            }
        }
    }

    /// Release the slot once its request settled (success, failure, cancel).
    pub fn settle(&self, slot: &GenerationSlot) {
        self.active
            .remove_if(&slot.story_id, |_, active| active.token == slot.token);
    }

    /// Signal the in-flight generation for a story, if any.
    pub fn cancel(&self, story_id: StoryId) -> bool {
        match self.active.get(&story_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Mark the story the player is currently viewing.
    pub fn set_active_story(&self, story_id: StoryId) {
        if let Ok(mut active) = self.active_story.lock() {
            *active = Some(story_id);
        }
    }

    /// Staleness guard: is this completion still the latest token for the
    /// story AND is the story still the active session?
    pub fn is_current(&self, story_id: StoryId, token: u64) -> bool {
        let latest = self
            .latest_token
            .get(&story_id)
            .map(|entry| *entry.value());
        if latest != Some(token) {
            return false;
        }
        match self.active_story.lock() {
            Ok(active) => *active == Some(story_id),
            Err(_) => false,
        }
    }
}
