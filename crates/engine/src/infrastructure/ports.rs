//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete
//! types. Ports exist for:
//! - Story persistence (get/put contract; could swap memory -> disk)
//! - Narrative generation and summarization (could swap Ollama -> Claude/OpenAI)
//! - Best-effort advisory calls (starting affinity, quality feedback, titles)
//! - Image generation (could swap ComfyUI -> other)
//! - Clock/Random (for testing)

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taleweaver_domain::{
    CharacterCard, CharacterMention, Difficulty, PacingLevel, Story, StoryId, StorySegment,
};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NarrativeError {
    /// Transport-level failure. Surfaced as a user-visible failure; never
    /// retried automatically.
    #[error("Narrative request failed: {0}")]
    RequestFailed(String),
    /// The model answered but the payload failed validation.
    #[error("Invalid generator output: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageGenError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Service unavailable")]
    Unavailable,
}

// =============================================================================
// Story Persistence Port
// =============================================================================

/// The persistence contract: get/put, read-after-write consistent for a
/// single caller. The engine assumes nothing more.
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError>;
    async fn put(&self, story: &Story) -> Result<(), StoreError>;
}

// =============================================================================
// Narrative Generator Port
// =============================================================================

/// What the generator is continuing from.
#[derive(Debug, Clone)]
pub enum GenerationContext {
    /// First batch of a fresh story.
    Opening,
    /// Continuation after a submitted choice.
    Continuation {
        /// Summary (if any) plus the windowed tail of the segment log.
        condensed_history: String,
        /// The player's submitted action.
        choice_text: String,
    },
}

/// Request shape for the narrative generator.
#[derive(Debug, Clone)]
pub struct NarrativeRequest {
    pub title: String,
    pub genre: String,
    pub premise: String,
    pub protagonist: String,
    pub difficulty: Difficulty,
    pub pacing: PacingLevel,
    pub cards: Vec<CharacterCard>,
    pub context: GenerationContext,
    /// Recent continuation-quality feedback, newest last.
    pub quality_feedback: Vec<String>,
}

/// Validated generator output.
#[derive(Debug, Clone)]
pub struct NarrativeBatch {
    pub segments: Vec<StorySegment>,
    pub new_characters: Vec<CharacterMention>,
    pub pacing: PacingLevel,
    pub generated_chars: usize,
}

#[async_trait]
pub trait NarrativePort: Send + Sync {
    async fn generate(&self, request: NarrativeRequest) -> Result<NarrativeBatch, NarrativeError>;
}

// =============================================================================
// Summarization Port
// =============================================================================

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    /// The full rendered history text.
    pub history_text: String,
    /// Titles of recent summary records, newest first.
    pub recent_titles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    pub title: String,
    pub involved_characters: Vec<String>,
}

#[async_trait]
pub trait SummarizerPort: Send + Sync {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryOutcome, NarrativeError>;
}

// =============================================================================
// Advisor Port (best-effort secondary calls)
// =============================================================================

/// Secondary model calls that augment a primary operation. Failures here are
/// caught and logged at the call site, never propagated to the awaiting
/// caller.
#[async_trait]
pub trait AdvisorPort: Send + Sync {
    /// AI-evaluated starting affinity per new character. Partial or missing
    /// entries are ignored, not errors.
    async fn starting_affinities(
        &self,
        protagonist: &str,
        new_characters: &[CharacterMention],
    ) -> Result<HashMap<String, i32>, NarrativeError>;

    /// One-line quality verdict on the latest continuation.
    async fn quality_feedback(
        &self,
        recent_text: &str,
        choice_text: &str,
    ) -> Result<String, NarrativeError>;

    /// A short title for a freshly opened story.
    async fn story_title(&self, premise: &str, opening: &str) -> Result<String, NarrativeError>;
}

// =============================================================================
// Image Generation Port
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
}

/// Where the generated artwork ended up: a remote URL or an embedded data URI.
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub uri: String,
}

#[async_trait]
pub trait ImageGenPort: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> Result<ImageResult, ImageGenError>;
    async fn check_health(&self) -> Result<bool, ImageGenError>;
}

// =============================================================================
// Testability Ports
// =============================================================================

pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait RandomPort: Send + Sync {
    /// Uniform integer in `[min, max]`, both inclusive.
    fn gen_range(&self, min: i32, max: i32) -> i32;
}
