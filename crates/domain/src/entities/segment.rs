//! Narrative segment log entries.
//!
//! Segments are append-only. The single permitted in-place edit is patching a
//! malformed trailing choice segment so the player always has options to pick
//! from (see [`ensure_trailing_choice`]).

use serde::{Deserialize, Serialize};

use crate::value_objects::DiceResult;

/// Number of fallback options synthesized for a batch without a usable choice.
pub const FALLBACK_CHOICE_COUNT: usize = 3;

/// One unit of the story log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorySegment {
    /// Third-person narration.
    Narration { text: String },
    /// A line spoken by a named character.
    Dialogue { character: String, text: String },
    /// A decision point presented to the player.
    Choice {
        /// Lead-in text; may be empty when `choices` is non-empty.
        text: String,
        /// Ordered option strings shown to the player.
        choices: Vec<String>,
        /// Per-option judgment values (1-8), `None` for options without a check.
        judgment_values: Vec<Option<u8>>,
        /// Attached when the choice was resolved with randomness.
        #[serde(skip_serializing_if = "Option::is_none")]
        dice_result: Option<DiceResult>,
    },
}

impl StorySegment {
    pub fn narration(text: impl Into<String>) -> Self {
        Self::Narration { text: text.into() }
    }

    pub fn dialogue(character: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Dialogue {
            character: character.into(),
            text: text.into(),
        }
    }

    pub fn choice(text: impl Into<String>, choices: Vec<String>) -> Self {
        let judgment_values = vec![None; choices.len()];
        Self::Choice {
            text: text.into(),
            choices,
            judgment_values,
            dice_result: None,
        }
    }

    /// The segment's primary text.
    pub fn text(&self) -> &str {
        match self {
            Self::Narration { text } | Self::Dialogue { text, .. } | Self::Choice { text, .. } => {
                text
            }
        }
    }

    /// Speaker name, for dialogue segments only.
    pub fn speaker(&self) -> Option<&str> {
        match self {
            Self::Dialogue { character, .. } => Some(character),
            _ => None,
        }
    }

    /// A choice segment the player can actually act on.
    pub fn is_usable_choice(&self) -> bool {
        matches!(self, Self::Choice { choices, .. } if !choices.is_empty())
    }

    /// Character count contributed to the uncompressed history length.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Narration { text } => text.chars().count(),
            Self::Dialogue { character, text } => {
                character.chars().count() + text.chars().count()
            }
            Self::Choice { text, choices, .. } => {
                text.chars().count() + choices.iter().map(|c| c.chars().count()).sum::<usize>()
            }
        }
    }
}

/// Guarantee that a generated batch ends in a usable choice segment.
///
/// A trailing choice with empty options is patched in place; a batch with no
/// usable trailing choice gets a synthesized one appended. `free_action` is
/// the player's submitted freeform action, referenced by one fallback option
/// when present.
pub fn ensure_trailing_choice(segments: &mut Vec<StorySegment>, free_action: Option<&str>) {
    if let Some(StorySegment::Choice { choices, judgment_values, .. }) = segments.last_mut() {
        if choices.is_empty() {
            *choices = fallback_choices(free_action);
            *judgment_values = vec![None; choices.len()];
        }
        return;
    }
    segments.push(StorySegment::choice(
        String::new(),
        fallback_choices(free_action),
    ));
}

fn fallback_choices(free_action: Option<&str>) -> Vec<String> {
    let mut options = vec![
        "Press onward".to_string(),
        "Take a closer look around".to_string(),
    ];
    match free_action {
        Some(action) if !action.trim().is_empty() => {
            options.push(format!("Keep going: {}", action.trim()));
        }
        _ => options.push("Wait and see what happens".to_string()),
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_choice() {
        let seg = StorySegment::choice("What now?", vec!["Run".into(), "Hide".into()]);
        assert!(seg.is_usable_choice());

        let empty = StorySegment::choice("What now?", vec![]);
        assert!(!empty.is_usable_choice());

        assert!(!StorySegment::narration("The rain fell.").is_usable_choice());
    }

    #[test]
    fn test_ensure_trailing_choice_appends_after_dialogue() {
        let mut batch = vec![
            StorySegment::narration("The door creaked open."),
            StorySegment::dialogue("Mira", "Who's there?"),
        ];
        ensure_trailing_choice(&mut batch, None);
        assert_eq!(batch.len(), 3);
        let last = batch.last().expect("non-empty batch");
        assert!(last.is_usable_choice());
        match last {
            StorySegment::Choice { choices, judgment_values, .. } => {
                assert_eq!(choices.len(), FALLBACK_CHOICE_COUNT);
                assert_eq!(judgment_values.len(), choices.len());
            }
            _ => panic!("expected choice segment"),
        }
    }

    #[test]
    fn test_ensure_trailing_choice_patches_empty_options() {
        let mut batch = vec![StorySegment::choice("And then?", vec![])];
        ensure_trailing_choice(&mut batch, Some("sneak past the guard"));
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            StorySegment::Choice { choices, .. } => {
                assert_eq!(choices.len(), FALLBACK_CHOICE_COUNT);
                assert!(choices.iter().any(|c| c.contains("sneak past the guard")));
            }
            _ => panic!("expected choice segment"),
        }
    }

    #[test]
    fn test_segment_wire_format() {
        let seg = StorySegment::dialogue("Mira", "Who's there?");
        let json = serde_json::to_value(&seg).expect("serialize");
        assert_eq!(json["type"], "dialogue");
        assert_eq!(json["character"], "Mira");

        let round_tripped: StorySegment = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_tripped, seg);
    }

    #[test]
    fn test_ensure_trailing_choice_keeps_valid_choice() {
        let mut batch = vec![
            StorySegment::narration("Dawn broke."),
            StorySegment::choice("Pick one", vec!["Left".into(), "Right".into()]),
        ];
        ensure_trailing_choice(&mut batch, None);
        assert_eq!(batch.len(), 2);
        match &batch[1] {
            StorySegment::Choice { choices, .. } => assert_eq!(choices.len(), 2),
            _ => panic!("expected choice segment"),
        }
    }
}
