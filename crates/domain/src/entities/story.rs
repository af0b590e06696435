//! The story aggregate.
//!
//! One `Story` is one player session: immutable setup, the append-mostly
//! segment log, character cards, compression artifacts, and the generation /
//! image status the controller drives. All mutation goes through aggregate
//! methods; the viewing cursor (`current_index`) always indexes a valid
//! segment once the log is non-empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{CharacterCard, StorySegment};
use crate::error::DomainError;
use crate::ids::{CardId, StoryId};
use crate::value_objects::StorySummaryRecord;

/// Cap on retained summary records (newest first).
pub const SUMMARY_HISTORY_CAP: usize = 50;
/// Cap on retained image prompt records (newest last).
pub const IMAGE_PROMPT_HISTORY_CAP: usize = 30;
/// Cap on retained continuation-quality feedback entries.
pub const QUALITY_FEEDBACK_CAP: usize = 4;

/// Player-selected difficulty; `NoRandom` disables dice entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Nightmare,
    NoRandom,
}

impl std::str::FromStr for Difficulty {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "normal" => Ok(Self::Normal),
            "hard" => Ok(Self::Hard),
            "nightmare" => Ok(Self::Nightmare),
            "no-random" | "norandom" => Ok(Self::NoRandom),
            other => Err(DomainError::parse(format!("Unknown difficulty: {}", other))),
        }
    }
}

/// AI-evaluated narrative tempo, fed back into generation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacingLevel {
    Slow,
    #[default]
    Steady,
    Brisk,
    Climactic,
}

/// Immutable setup fields captured at story creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySetup {
    pub title: String,
    pub premise: String,
    pub genre: String,
    /// Who the player is in the fiction.
    pub protagonist: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
    Failed,
}

/// Generation lifecycle status, with start timestamp and last error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub state: GenerationState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    #[default]
    Idle,
    Generating,
    Success,
    Failed,
}

/// One attempted scene-image prompt, kept for observability (bounded log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePromptRecord {
    pub prompt: String,
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: StoryId,
    pub setup: StorySetup,
    segments: Vec<StorySegment>,
    current_index: usize,
    pub difficulty: Difficulty,
    character_cards: Vec<CharacterCard>,
    /// The active compressed context, if any.
    pub story_summary: Option<String>,
    /// Newest-first record of compressions, capped.
    pub summary_history: Vec<StorySummaryRecord>,
    pub choice_count: u32,
    pub generation: GenerationStatus,
    pub image_state: ImageState,
    /// Most recent scene artwork (remote URL or embedded data URI).
    pub scene_image_uri: Option<String>,
    pub image_prompt_history: Vec<ImagePromptRecord>,
    pub pacing: PacingLevel,
    /// Recent continuation-quality feedback, newest last, capped.
    pub quality_feedback: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub fn new(setup: StorySetup, difficulty: Difficulty, created_at: DateTime<Utc>) -> Self {
        Self {
            id: StoryId::new(),
            setup,
            segments: Vec::new(),
            current_index: 0,
            difficulty,
            character_cards: Vec::new(),
            story_summary: None,
            summary_history: Vec::new(),
            choice_count: 0,
            generation: GenerationStatus::default(),
            image_state: ImageState::default(),
            scene_image_uri: None,
            image_prompt_history: Vec::new(),
            pacing: PacingLevel::default(),
            quality_feedback: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    // -------------------------------------------------------------------------
    // Segments
    // -------------------------------------------------------------------------

    pub fn segments(&self) -> &[StorySegment] {
        &self.segments
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Append one segment without moving the cursor.
    pub fn push_segment(&mut self, segment: StorySegment) {
        self.segments.push(segment);
    }

    /// Append a batch and advance the cursor to the last appended segment.
    pub fn append_batch(&mut self, batch: Vec<StorySegment>) {
        self.segments.extend(batch);
        if !self.segments.is_empty() {
            self.current_index = self.segments.len() - 1;
        }
    }

    /// Roll the log back to `len` segments, fixing the cursor.
    ///
    /// Used to undo an optimistic choice-segment append when a continuation
    /// fails or is cancelled.
    pub fn truncate_segments(&mut self, len: usize) {
        self.segments.truncate(len);
        if self.segments.is_empty() {
            self.current_index = 0;
        } else {
            self.current_index = self.current_index.min(self.segments.len() - 1);
        }
    }

    /// Move the viewing cursor; out-of-range indexes are clamped.
    pub fn set_current_index(&mut self, index: usize) {
        if self.segments.is_empty() {
            self.current_index = 0;
        } else {
            self.current_index = index.min(self.segments.len() - 1);
        }
    }

    /// The trailing choice segment the player is answering, if any.
    pub fn trailing_choice(&self) -> Option<&StorySegment> {
        self.segments.last().filter(|s| s.is_usable_choice())
    }

    /// Full uncompressed history length in characters.
    pub fn history_char_len(&self) -> usize {
        self.segments.iter().map(StorySegment::char_len).sum()
    }

    // -------------------------------------------------------------------------
    // Character cards
    // -------------------------------------------------------------------------

    pub fn cards(&self) -> &[CharacterCard] {
        &self.character_cards
    }

    pub fn cards_mut(&mut self) -> &mut [CharacterCard] {
        &mut self.character_cards
    }

    pub fn card(&self, id: CardId) -> Option<&CharacterCard> {
        self.character_cards.iter().find(|c| c.id == id)
    }

    pub fn card_mut(&mut self, id: CardId) -> Option<&mut CharacterCard> {
        self.character_cards.iter_mut().find(|c| c.id == id)
    }

    pub fn add_card(&mut self, card: CharacterCard) -> CardId {
        let id = card.id;
        self.character_cards.push(card);
        id
    }

    /// External removal path; the engine itself never deletes cards.
    pub fn remove_card(&mut self, id: CardId) -> Option<CharacterCard> {
        let pos = self.character_cards.iter().position(|c| c.id == id)?;
        Some(self.character_cards.remove(pos))
    }

    /// Run the auto-reveal pass over the recent log. Returns the ids of the
    /// cards revealed.
    pub fn auto_reveal_cards(&mut self) -> Vec<CardId> {
        crate::game_systems::identity::auto_reveal(&mut self.character_cards, &self.segments)
    }

    // -------------------------------------------------------------------------
    // Compression artifacts
    // -------------------------------------------------------------------------

    /// Install a completed compression: replace the active summary and prepend
    /// the record, dropping the oldest past the cap.
    pub fn record_summary(&mut self, record: StorySummaryRecord) {
        self.story_summary = Some(record.summary.clone());
        self.summary_history.insert(0, record);
        self.summary_history.truncate(SUMMARY_HISTORY_CAP);
    }

    /// Source size of the most recent compression, if any.
    pub fn last_summary_source_chars(&self) -> Option<usize> {
        self.summary_history.first().map(|r| r.source_chars)
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub fn begin_generation(&mut self, now: DateTime<Utc>) {
        self.generation = GenerationStatus {
            state: GenerationState::Generating,
            started_at: Some(now),
            last_error: None,
        };
        self.updated_at = now;
    }

    /// Successful completion: clear error state, back to idle.
    pub fn finish_generation(&mut self, now: DateTime<Utc>) {
        self.generation = GenerationStatus::default();
        self.updated_at = now;
    }

    pub fn fail_generation(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.generation = GenerationStatus {
            state: GenerationState::Failed,
            started_at: None,
            last_error: Some(message.into()),
        };
        self.updated_at = now;
    }

    /// Deliberate cancel: idle, no error text.
    pub fn reset_generation(&mut self, now: DateTime<Utc>) {
        self.generation = GenerationStatus::default();
        self.updated_at = now;
    }

    pub fn push_image_prompt(&mut self, record: ImagePromptRecord) {
        self.image_prompt_history.push(record);
        let overflow = self
            .image_prompt_history
            .len()
            .saturating_sub(IMAGE_PROMPT_HISTORY_CAP);
        if overflow > 0 {
            self.image_prompt_history.drain(..overflow);
        }
    }

    pub fn push_quality_feedback(&mut self, feedback: impl Into<String>) {
        self.quality_feedback.push(feedback.into());
        let overflow = self.quality_feedback.len().saturating_sub(QUALITY_FEEDBACK_CAP);
        if overflow > 0 {
            self.quality_feedback.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story::new(
            StorySetup {
                title: "The Glass Harbor".into(),
                premise: "A smuggler inherits a haunted lighthouse.".into(),
                genre: "fantasy".into(),
                protagonist: "Ren, a retired smuggler".into(),
            },
            Difficulty::Normal,
            Utc::now(),
        )
    }

    #[test]
    fn test_append_batch_advances_cursor() {
        let mut s = story();
        s.append_batch(vec![
            StorySegment::narration("The tide came in."),
            StorySegment::choice("What now?", vec!["Wait".into()]),
        ]);
        assert_eq!(s.current_index(), 1);
        assert!(s.trailing_choice().is_some());
    }

    #[test]
    fn test_truncate_fixes_cursor() {
        let mut s = story();
        s.append_batch(vec![
            StorySegment::narration("One."),
            StorySegment::narration("Two."),
            StorySegment::narration("Three."),
        ]);
        s.truncate_segments(1);
        assert_eq!(s.segments().len(), 1);
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn test_set_current_index_clamps() {
        let mut s = story();
        s.append_batch(vec![StorySegment::narration("Only one.")]);
        s.set_current_index(99);
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn test_summary_history_capped_newest_first() {
        let mut s = story();
        for i in 0..(SUMMARY_HISTORY_CAP + 5) {
            s.record_summary(StorySummaryRecord::new(
                format!("chapter {}", i),
                format!("summary {}", i),
                vec![],
                1000 * (i + 1),
                Utc::now(),
            ));
        }
        assert_eq!(s.summary_history.len(), SUMMARY_HISTORY_CAP);
        assert_eq!(
            s.last_summary_source_chars(),
            Some(1000 * (SUMMARY_HISTORY_CAP + 5))
        );
        assert!(s.story_summary.is_some());
    }

    #[test]
    fn test_image_prompt_history_bounded() {
        let mut s = story();
        for i in 0..40 {
            s.push_image_prompt(ImagePromptRecord {
                prompt: format!("prompt {}", i),
                succeeded: true,
                created_at: Utc::now(),
            });
        }
        assert_eq!(s.image_prompt_history.len(), IMAGE_PROMPT_HISTORY_CAP);
        // Oldest entries were dropped.
        assert_eq!(s.image_prompt_history[0].prompt, "prompt 10");
    }

    #[test]
    fn test_fail_and_reset_generation() {
        let mut s = story();
        let now = Utc::now();
        s.begin_generation(now);
        assert_eq!(s.generation.state, GenerationState::Generating);
        assert!(s.generation.started_at.is_some());

        s.fail_generation("model timeout", now);
        assert_eq!(s.generation.state, GenerationState::Failed);
        assert_eq!(s.generation.last_error.as_deref(), Some("model timeout"));

        s.reset_generation(now);
        assert_eq!(s.generation.state, GenerationState::Idle);
        assert!(s.generation.last_error.is_none());
    }
}
