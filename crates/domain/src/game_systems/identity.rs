//! Character identity resolution.
//!
//! Incoming character mentions from a generated batch are matched against the
//! story's existing cards. Matching is conservative: a generic placeholder
//! alias ("stranger", "passerby", ...) can never be the basis of a merge, and
//! an ambiguous alias collision falls back to creating a new card rather than
//! guessing.

use serde::{Deserialize, Serialize};

use crate::entities::{CharacterCard, StorySegment};
use crate::ids::CardId;

/// Placeholder aliases that never participate in alias matching.
pub const GENERIC_ALIASES: &[&str] = &[
    "stranger",
    "mysterious person",
    "mysterious figure",
    "mysterious man",
    "mysterious woman",
    "hooded figure",
    "passerby",
    "passer-by",
    "unknown",
    "unknown man",
    "unknown woman",
    "someone",
    "???",
];

/// Dialogue window inspected by the auto-reveal rule.
pub const REVEAL_WINDOW: usize = 18;
/// Attributed dialogue lines needed to flip the reveal flag.
pub const REVEAL_MIN_ATTRIBUTIONS: usize = 2;

/// A normalized character mention from a generated batch.
///
/// The upstream normalizer guarantees `name` is present; other fields default
/// to empty when the generator omitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMention {
    pub name: String,
    #[serde(default)]
    pub hidden_name: String,
    #[serde(default)]
    pub known_to_player: bool,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub appearance: String,
}

/// Why a mention merged into an existing card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    ExactName,
    HiddenAlias,
}

impl std::fmt::Display for MergeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactName => write!(f, "exact-name"),
            Self::HiddenAlias => write!(f, "hidden-alias"),
        }
    }
}

/// Outcome of resolving one mention against the card set.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Merge the mention into an existing card.
    Merge { card_id: CardId, reason: MergeReason },
    /// No match; create a new card.
    Create,
    /// The alias matched more than one unrevealed card. Create a new card and
    /// report the conflict for logging; never guess.
    AmbiguousCreate { candidates: Vec<String> },
}

/// Trim, collapse internal whitespace, and lowercase for comparison.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Resolver over a configured generic-alias set.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    generic_aliases: Vec<String>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            generic_aliases: GENERIC_ALIASES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl IdentityResolver {
    /// Override the generic-alias set (tests; per-locale lists are an
    /// unbuilt extension point).
    pub fn with_generic_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            generic_aliases: aliases
                .into_iter()
                .map(|a| normalize_name(&a.into()))
                .collect(),
        }
    }

    pub fn is_generic_alias(&self, alias: &str) -> bool {
        let normalized = normalize_name(alias);
        self.generic_aliases.iter().any(|g| *g == normalized)
    }

    /// Resolve a mention against the current card set.
    pub fn resolve(&self, cards: &[CharacterCard], mention: &CharacterMention) -> Resolution {
        let incoming_name = normalize_name(&mention.name);

        // (1) Exact match on canonical name.
        if let Some(card) = cards.iter().find(|c| normalize_name(&c.name) == incoming_name) {
            return Resolution::Merge {
                card_id: card.id,
                reason: MergeReason::ExactName,
            };
        }

        // (2) Generic or absent alias: never a merge basis.
        let alias = normalize_name(&mention.hidden_name);
        if alias.is_empty() || self.is_generic_alias(&alias) {
            return Resolution::Create;
        }

        // (3) Alias search over unrevealed cards.
        let matches: Vec<&CharacterCard> = cards
            .iter()
            .filter(|c| !c.is_name_revealed)
            .filter(|c| {
                normalize_name(&c.hidden_name) == alias || normalize_name(&c.name) == alias
            })
            .collect();

        match matches.as_slice() {
            [] => Resolution::Create,
            [card] => Resolution::Merge {
                card_id: card.id,
                reason: MergeReason::HiddenAlias,
            },
            many => Resolution::AmbiguousCreate {
                candidates: many.iter().map(|c| c.name.clone()).collect(),
            },
        }
    }
}

/// Auto-reveal pass, run once per generation batch.
///
/// For each unrevealed card, count recent dialogue segments attributed to a
/// speaker equal to the card's real name; at [`REVEAL_MIN_ATTRIBUTIONS`] the
/// player has "learned" the name and the flag flips. Returns the ids of the
/// cards revealed by this pass.
pub fn auto_reveal(cards: &mut [CharacterCard], segments: &[StorySegment]) -> Vec<CardId> {
    let window_start = segments.len().saturating_sub(REVEAL_WINDOW);
    let window = &segments[window_start..];

    let mut revealed = Vec::new();
    for card in cards.iter_mut().filter(|c| !c.is_name_revealed) {
        let real_name = normalize_name(&card.name);
        let attributions = window
            .iter()
            .filter_map(StorySegment::speaker)
            .filter(|speaker| normalize_name(speaker) == real_name)
            .count();
        if attributions >= REVEAL_MIN_ATTRIBUTIONS {
            card.reveal();
            revealed.push(card.id);
        }
    }
    revealed
}
