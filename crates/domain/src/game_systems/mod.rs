//! Game systems: pure story logic with no I/O.

pub mod affinity;
pub mod identity;

pub use affinity::{
    base_magnitude, disclose, max_relevant_affinity, seed_affinity, soften_judgment,
    AffinityAssessment, AffinityChange, AffinityEconomy, ChoiceClassifier, EligibilityReason,
    KeywordClassifier, Polarity, MAX_BENEFICIARIES, RECENT_DIALOGUE_WINDOW, SOFTEN_MAX,
    SUMMARY_RECORDS_CONSIDERED,
};
pub use identity::{
    auto_reveal, normalize_name, CharacterMention, IdentityResolver, MergeReason, Resolution,
    GENERIC_ALIASES, REVEAL_MIN_ATTRIBUTIONS, REVEAL_WINDOW,
};
