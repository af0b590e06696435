//! The affinity economy.
//!
//! Each submitted choice can move the protagonist's relationship score with
//! up to two characters. The pipeline is: classify the choice's polarity,
//! rank eligible cards by how strongly the choice concerns them, look up a
//! base magnitude, nudge it by the dice outcome, and apply the clamped delta.
//! The polarity classifier is pluggable; ranking and clamping are
//! classifier-agnostic.

use crate::entities::{CharacterCard, Difficulty, StorySegment};
use crate::game_systems::identity::normalize_name;
use crate::ids::CardId;
use crate::value_objects::{DiceOutcome, StorySummaryRecord};

/// Dialogue window for "recent-dialogue" eligibility.
pub const RECENT_DIALOGUE_WINDOW: usize = 10;
/// Summary records consulted for "summary" eligibility.
pub const SUMMARY_RECORDS_CONSIDERED: usize = 3;
/// At most this many cards move per choice.
pub const MAX_BENEFICIARIES: usize = 2;
/// Judgment softening never exceeds this many points.
pub const SOFTEN_MAX: u8 = 3;

/// Direction a choice moves affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn sign(self) -> i32 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

/// Pluggable polarity scorer. Returns `None` when the text is ambiguous
/// (both or neither keyword set matched) and the dice outcome decides.
pub trait ChoiceClassifier: Send + Sync {
    fn classify(&self, choice_text: &str) -> Option<Polarity>;
}

/// Keyword-set classifier, the default scorer.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            positive: [
                "help", "save", "protect", "comfort", "thank", "hug", "give", "share", "praise",
                "apologize", "rescue", "encourage", "smile", "agree", "trust", "defend",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            negative: [
                "attack", "insult", "threaten", "steal", "lie", "refuse", "mock", "betray",
                "ignore", "hit", "yell", "accuse", "abandon", "rob", "deceive",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl KeywordClassifier {
    pub fn new(positive: Vec<String>, negative: Vec<String>) -> Self {
        Self { positive, negative }
    }
}

impl ChoiceClassifier for KeywordClassifier {
    fn classify(&self, choice_text: &str) -> Option<Polarity> {
        let text = choice_text.to_lowercase();
        let positive_hit = self.positive.iter().any(|kw| contains_keyword(&text, kw));
        let negative_hit = self.negative.iter().any(|kw| contains_keyword(&text, kw));
        match (positive_hit, negative_hit) {
            (true, false) => Some(Polarity::Positive),
            (false, true) => Some(Polarity::Negative),
            _ => None,
        }
    }
}

/// Single-word keywords match whole words; multi-word phrases match as
/// substrings. Keeps "hit" from firing inside "white" while still catching
/// "childhood friend".
fn contains_keyword(lowercase_text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        lowercase_text.contains(keyword)
    } else {
        lowercase_text
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == keyword)
    }
}

/// Why a card was eligible, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EligibilityReason {
    /// Name or alias literally appears in the choice text.
    Mention,
    /// Spoke within the recent dialogue window.
    RecentDialogue,
    /// Listed in a recent summary record's involved characters.
    Summary,
}

impl EligibilityReason {
    pub fn is_strong(self) -> bool {
        matches!(self, Self::Mention)
    }
}

impl std::fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mention => write!(f, "mention"),
            Self::RecentDialogue => write!(f, "recent-dialogue"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// One applied affinity movement.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityChange {
    pub card_id: CardId,
    pub name: String,
    pub before: i32,
    pub after: i32,
    pub delta: i32,
    pub reason: EligibilityReason,
}

/// The economy's full output for one choice. An empty change list is a
/// valid, common result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AffinityAssessment {
    pub changes: Vec<AffinityChange>,
    /// Short player-facing notice, e.g. "Mira +4".
    pub toast: Option<String>,
    /// Diagnostic trail for logs.
    pub debug: String,
}

/// Base magnitude by difficulty, polarity, and eligibility strength. Easier
/// difficulties reward more and punish less.
pub fn base_magnitude(difficulty: Difficulty, polarity: Polarity, strong: bool) -> i32 {
    match (difficulty, polarity, strong) {
        (Difficulty::Easy, Polarity::Positive, true) => 5,
        (Difficulty::Easy, Polarity::Positive, false) => 3,
        (Difficulty::Easy, Polarity::Negative, true) => 3,
        (Difficulty::Easy, Polarity::Negative, false) => 2,
        (Difficulty::Normal, Polarity::Positive, true) => 4,
        (Difficulty::Normal, Polarity::Positive, false) => 2,
        (Difficulty::Normal, Polarity::Negative, true) => 4,
        (Difficulty::Normal, Polarity::Negative, false) => 2,
        (Difficulty::Hard, Polarity::Positive, true) => 3,
        (Difficulty::Hard, Polarity::Positive, false) => 2,
        (Difficulty::Hard, Polarity::Negative, true) => 5,
        (Difficulty::Hard, Polarity::Negative, false) => 3,
        (Difficulty::Nightmare, Polarity::Positive, true) => 2,
        (Difficulty::Nightmare, Polarity::Positive, false) => 1,
        (Difficulty::Nightmare, Polarity::Negative, true) => 6,
        (Difficulty::Nightmare, Polarity::Negative, false) => 4,
        (Difficulty::NoRandom, Polarity::Positive, true) => 4,
        (Difficulty::NoRandom, Polarity::Positive, false) => 2,
        (Difficulty::NoRandom, Polarity::Negative, true) => 4,
        (Difficulty::NoRandom, Polarity::Negative, false) => 2,
    }
}

pub struct AffinityEconomy {
    classifier: Box<dyn ChoiceClassifier>,
}

impl Default for AffinityEconomy {
    fn default() -> Self {
        Self {
            classifier: Box::new(KeywordClassifier::default()),
        }
    }
}

impl AffinityEconomy {
    pub fn with_classifier(classifier: Box<dyn ChoiceClassifier>) -> Self {
        Self { classifier }
    }

    /// Evaluate a submitted choice and apply the resulting deltas to `cards`.
    pub fn assess(
        &self,
        cards: &mut [CharacterCard],
        choice_text: &str,
        dice: Option<DiceOutcome>,
        difficulty: Difficulty,
        recent_segments: &[StorySegment],
        recent_summaries: &[StorySummaryRecord],
    ) -> AffinityAssessment {
        // Step 1: polarity, with dice fallback on ambiguity.
        let polarity = self.classifier.classify(choice_text).unwrap_or({
            if dice == Some(DiceOutcome::Worse) {
                Polarity::Negative
            } else {
                Polarity::Positive
            }
        });

        // Step 2: candidate ranking.
        let candidates = rank_candidates(cards, choice_text, recent_segments, recent_summaries);

        // Step 3 + 4: magnitude lookup, dice nudge, clamped apply.
        let nudge = match dice {
            Some(DiceOutcome::Better) => 1,
            Some(DiceOutcome::Worse) => -1,
            _ => 0,
        };

        let mut changes = Vec::new();
        let mut debug = format!(
            "polarity={:?} dice={:?} candidates={}",
            polarity,
            dice,
            candidates.len()
        );
        for (card_id, reason) in candidates {
            let Some(card) = cards.iter_mut().find(|c| c.id == card_id) else {
                continue;
            };
            let magnitude = (base_magnitude(difficulty, polarity, reason.is_strong()) + nudge).max(1);
            let delta = polarity.sign() * magnitude;
            let (before, after) = card.adjust_affinity(delta);
            debug.push_str(&format!(
                " [{} {} {}->{}]",
                card.name, reason, before, after
            ));
            if before == after {
                continue;
            }
            changes.push(AffinityChange {
                card_id,
                name: card.display_name().to_string(),
                before,
                after,
                delta: after - before,
                reason,
            });
        }

        let toast = if changes.is_empty() {
            None
        } else {
            Some(
                changes
                    .iter()
                    .map(|c| format!("{} {:+}", c.name, c.delta))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        AffinityAssessment { changes, toast, debug }
    }
}

/// Rank eligible cards (mention > recent-dialogue > summary) and keep the
/// top [`MAX_BENEFICIARIES`].
fn rank_candidates(
    cards: &[CharacterCard],
    choice_text: &str,
    recent_segments: &[StorySegment],
    recent_summaries: &[StorySummaryRecord],
) -> Vec<(CardId, EligibilityReason)> {
    let text = normalize_name(choice_text);
    let window_start = recent_segments.len().saturating_sub(RECENT_DIALOGUE_WINDOW);
    let recent_speakers: Vec<String> = recent_segments[window_start..]
        .iter()
        .filter_map(StorySegment::speaker)
        .map(normalize_name)
        .collect();
    let summarized: Vec<String> = recent_summaries
        .iter()
        .take(SUMMARY_RECORDS_CONSIDERED)
        .flat_map(|r| r.involved_characters.iter())
        .map(|n| normalize_name(n))
        .collect();

    let mut ranked: Vec<(CardId, EligibilityReason)> = cards
        .iter()
        .filter_map(|card| {
            let name = normalize_name(&card.name);
            let alias = normalize_name(&card.hidden_name);
            let mentioned = (!name.is_empty() && text.contains(&name))
                || (!alias.is_empty() && text.contains(&alias));
            if mentioned {
                return Some((card.id, EligibilityReason::Mention));
            }
            let spoke = recent_speakers
                .iter()
                .any(|s| *s == name || (!alias.is_empty() && *s == alias));
            if spoke {
                return Some((card.id, EligibilityReason::RecentDialogue));
            }
            if summarized.iter().any(|n| *n == name) {
                return Some((card.id, EligibilityReason::Summary));
            }
            None
        })
        .collect();

    ranked.sort_by_key(|(_, reason)| *reason);
    ranked.truncate(MAX_BENEFICIARIES);
    ranked
}

/// Judgment softening: high affinity with whoever the choice concerns shaves
/// up to [`SOFTEN_MAX`] points off the effective judgment value, floor 1.
pub fn soften_judgment(judgment_value: u8, max_affinity: i32) -> u8 {
    let reduction = match max_affinity {
        a if a >= 90 => 3,
        a if a >= 60 => 2,
        a if a >= 30 => 1,
        _ => 0,
    };
    judgment_value.saturating_sub(reduction).max(1)
}

/// Highest affinity among cards referenced by the choice text, falling back
/// to the most recent speaker. Feeds [`soften_judgment`].
pub fn max_relevant_affinity(
    cards: &[CharacterCard],
    choice_text: &str,
    recent_segments: &[StorySegment],
) -> i32 {
    let text = normalize_name(choice_text);
    let referenced = cards
        .iter()
        .filter(|card| {
            let name = normalize_name(&card.name);
            let alias = normalize_name(&card.hidden_name);
            (!name.is_empty() && text.contains(&name))
                || (!alias.is_empty() && text.contains(&alias))
        })
        .map(|c| c.affinity())
        .max();
    if let Some(max) = referenced {
        return max;
    }

    let last_speaker = recent_segments
        .iter()
        .rev()
        .find_map(StorySegment::speaker)
        .map(normalize_name);
    match last_speaker {
        Some(speaker) => cards
            .iter()
            .filter(|c| {
                normalize_name(&c.name) == speaker || normalize_name(&c.hidden_name) == speaker
            })
            .map(|c| c.affinity())
            .max()
            .unwrap_or(0),
        None => 0,
    }
}

/// Progressive disclosure: descriptive text is revealed in quarter-length
/// increments as affinity crosses 25/50/75/100; fully withheld below 25.
pub fn disclose(text: &str, affinity: i32) -> &str {
    let quarters: usize = match affinity {
        a if a >= 100 => 4,
        a if a >= 75 => 3,
        a if a >= 50 => 2,
        a if a >= 25 => 1,
        _ => 0,
    };
    if quarters == 4 {
        return text;
    }
    let total = text.chars().count();
    let take = total * quarters / 4;
    match text.char_indices().nth(take) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Starting-affinity heuristic for newly created cards: close-kinship
/// language seeds high, general family language seeds middling, anything
/// else starts at zero. An AI evaluation may overwrite this later.
pub fn seed_affinity(descriptive_text: &str) -> i32 {
    let text = descriptive_text.to_lowercase();
    const CLOSE_KIN: &[&str] = &[
        "mother", "father", "mom", "dad", "sister", "brother", "wife", "husband", "son",
        "daughter", "childhood friend", "lover", "sweetheart", "best friend",
    ];
    const FAMILY: &[&str] = &[
        "aunt", "uncle", "cousin", "grandmother", "grandfather", "grandma", "grandpa", "niece",
        "nephew", "in-law", "family",
    ];
    if CLOSE_KIN.iter().any(|kw| contains_keyword(&text, kw)) {
        85
    } else if FAMILY.iter().any(|kw| contains_keyword(&text, kw)) {
        45
    } else {
        0
    }
}
