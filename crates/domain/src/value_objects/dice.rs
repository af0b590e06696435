//! Dice judgment adjudication.
//!
//! Choice options carry an AI-assigned judgment value (1-8). The player rolls
//! a d8 against it; the adjudicator is a pure comparison so the result is
//! available synchronously, before any presentation delay. The roll itself is
//! injected by the caller (the domain layer holds no RNG).

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Smallest value a d8 roll or judgment value can take.
pub const JUDGMENT_MIN: u8 = 1;
/// Largest value a d8 roll or judgment value can take.
pub const JUDGMENT_MAX: u8 = 8;

/// How a roll fared against its judgment value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceOutcome {
    Worse,
    Exact,
    Better,
}

impl std::fmt::Display for DiceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worse => write!(f, "worse"),
            Self::Exact => write!(f, "exact"),
            Self::Better => write!(f, "better"),
        }
    }
}

/// A resolved dice check, embedded in its originating choice segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceResult {
    pub roll: u8,
    pub judgment_value: u8,
    pub outcome: DiceOutcome,
}

impl DiceResult {
    /// Adjudicate a roll against a judgment value.
    ///
    /// `roll < judgment` is worse, equality is exact, `roll > judgment` is
    /// better. Both inputs must lie in `[JUDGMENT_MIN, JUDGMENT_MAX]`.
    pub fn adjudicate(roll: u8, judgment_value: u8) -> Result<Self, DomainError> {
        if !(JUDGMENT_MIN..=JUDGMENT_MAX).contains(&roll) {
            return Err(DomainError::validation(format!(
                "dice roll {} outside [{}, {}]",
                roll, JUDGMENT_MIN, JUDGMENT_MAX
            )));
        }
        if !(JUDGMENT_MIN..=JUDGMENT_MAX).contains(&judgment_value) {
            return Err(DomainError::validation(format!(
                "judgment value {} outside [{}, {}]",
                judgment_value, JUDGMENT_MIN, JUDGMENT_MAX
            )));
        }
        let outcome = match roll.cmp(&judgment_value) {
            std::cmp::Ordering::Less => DiceOutcome::Worse,
            std::cmp::Ordering::Equal => DiceOutcome::Exact,
            std::cmp::Ordering::Greater => DiceOutcome::Better,
        };
        Ok(Self {
            roll,
            judgment_value,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_pure_over_full_grid() {
        for roll in JUDGMENT_MIN..=JUDGMENT_MAX {
            for judgment in JUDGMENT_MIN..=JUDGMENT_MAX {
                let result = DiceResult::adjudicate(roll, judgment).expect("in range");
                let expected = match roll.cmp(&judgment) {
                    std::cmp::Ordering::Less => DiceOutcome::Worse,
                    std::cmp::Ordering::Equal => DiceOutcome::Exact,
                    std::cmp::Ordering::Greater => DiceOutcome::Better,
                };
                assert_eq!(result.outcome, expected, "roll={} judgment={}", roll, judgment);
            }
        }
    }

    #[test]
    fn test_scenario_roll_three_against_five_is_worse() {
        let result = DiceResult::adjudicate(3, 5).expect("in range");
        assert_eq!(result.outcome, DiceOutcome::Worse);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(DiceResult::adjudicate(0, 5).is_err());
        assert!(DiceResult::adjudicate(9, 5).is_err());
        assert!(DiceResult::adjudicate(4, 0).is_err());
        assert!(DiceResult::adjudicate(4, 9).is_err());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(DiceOutcome::Worse.to_string(), "worse");
        assert_eq!(DiceOutcome::Exact.to_string(), "exact");
        assert_eq!(DiceOutcome::Better.to_string(), "better");
    }
}
