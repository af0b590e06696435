//! Character cards.
//!
//! A card tracks one character the story has introduced: identity (real name
//! plus the alias shown before the reveal), descriptive text, portrait, and
//! the protagonist's affinity toward them. Affinity is clamped to
//! `[AFFINITY_MIN, AFFINITY_MAX]` at every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CardId;

/// Lower affinity bound.
pub const AFFINITY_MIN: i32 = 0;
/// Upper affinity bound.
pub const AFFINITY_MAX: i32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterCard {
    pub id: CardId,
    /// Canonical (real) name.
    pub name: String,
    /// Display alias shown before the reveal.
    pub hidden_name: String,
    pub is_name_revealed: bool,
    pub gender: String,
    pub personality: String,
    pub background: String,
    pub appearance: String,
    pub portrait_uri: Option<String>,
    affinity: i32,
    /// Segment index at which the character first appeared.
    pub first_appearance: usize,
    pub created_at: DateTime<Utc>,
}

impl CharacterCard {
    pub fn new(name: impl Into<String>, first_appearance: usize, created_at: DateTime<Utc>) -> Self {
        Self {
            id: CardId::new(),
            name: name.into(),
            hidden_name: String::new(),
            is_name_revealed: false,
            gender: String::new(),
            personality: String::new(),
            background: String::new(),
            appearance: String::new(),
            portrait_uri: None,
            affinity: AFFINITY_MIN,
            first_appearance,
            created_at,
        }
    }

    pub fn with_hidden_name(mut self, hidden_name: impl Into<String>) -> Self {
        self.hidden_name = hidden_name.into();
        self
    }

    pub fn with_revealed(mut self, revealed: bool) -> Self {
        self.is_name_revealed = revealed;
        self
    }

    pub fn with_affinity(mut self, affinity: i32) -> Self {
        self.set_affinity(affinity);
        self
    }

    /// Name shown to the player: the alias until revealed, then the real name.
    pub fn display_name(&self) -> &str {
        if !self.is_name_revealed && !self.hidden_name.is_empty() {
            &self.hidden_name
        } else {
            &self.name
        }
    }

    pub fn affinity(&self) -> i32 {
        self.affinity
    }

    /// Set affinity, clamped to the valid range.
    pub fn set_affinity(&mut self, value: i32) {
        self.affinity = value.clamp(AFFINITY_MIN, AFFINITY_MAX);
    }

    /// Apply a signed delta, clamped. Returns (before, after).
    pub fn adjust_affinity(&mut self, delta: i32) -> (i32, i32) {
        let before = self.affinity;
        self.set_affinity(before + delta);
        (before, self.affinity)
    }

    pub fn reveal(&mut self) {
        self.is_name_revealed = true;
    }

    /// Merge an incoming mention into this card: fill only empty descriptive
    /// fields and OR the reveal flag. Never overwrites existing text.
    pub fn fill_missing(
        &mut self,
        gender: &str,
        personality: &str,
        background: &str,
        appearance: &str,
        known_to_player: bool,
    ) {
        if self.gender.is_empty() {
            self.gender = gender.to_string();
        }
        if self.personality.is_empty() {
            self.personality = personality.to_string();
        }
        if self.background.is_empty() {
            self.background = background.to_string();
        }
        if self.appearance.is_empty() {
            self.appearance = appearance.to_string();
        }
        self.is_name_revealed |= known_to_player;
    }
}
