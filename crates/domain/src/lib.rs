extern crate self as taleweaver_domain;

pub mod entities;
pub mod error;
pub mod game_systems;
pub mod ids;
pub mod value_objects;

// Re-export entities (explicit list in entities/mod.rs)
pub use entities::{
    ensure_trailing_choice, CharacterCard, Difficulty, GenerationState, GenerationStatus,
    ImagePromptRecord, ImageState, PacingLevel, Story, StorySegment, StorySetup, AFFINITY_MAX,
    AFFINITY_MIN, FALLBACK_CHOICE_COUNT, IMAGE_PROMPT_HISTORY_CAP, QUALITY_FEEDBACK_CAP,
    SUMMARY_HISTORY_CAP,
};

pub use error::DomainError;

// Re-export game systems
pub use game_systems::{
    auto_reveal, base_magnitude, disclose, max_relevant_affinity, normalize_name, seed_affinity,
    soften_judgment, AffinityAssessment, AffinityChange, AffinityEconomy, CharacterMention,
    ChoiceClassifier, EligibilityReason, IdentityResolver, KeywordClassifier, MergeReason,
    Polarity, Resolution, GENERIC_ALIASES, MAX_BENEFICIARIES,
};

// Re-export ID types
pub use ids::{CardId, StoryId, SummaryId};

// Re-export value objects
pub use value_objects::{DiceOutcome, DiceResult, StorySummaryRecord, JUDGMENT_MAX, JUDGMENT_MIN};
