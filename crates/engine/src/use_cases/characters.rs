//! New-character integration.
//!
//! Each generated batch may introduce characters. Every mention is resolved
//! against the existing card set (merge or create), newly created cards get a
//! heuristic starting affinity that a best-effort AI evaluation may
//! overwrite, and the auto-reveal pass runs once over the refreshed log.

use std::sync::Arc;

use taleweaver_domain::{
    normalize_name, seed_affinity, CardId, CharacterCard, CharacterMention, IdentityResolver,
    Resolution, Story,
};

use crate::infrastructure::ports::{AdvisorPort, ClockPort};

pub struct ProcessNewCharacters {
    advisor: Arc<dyn AdvisorPort>,
    resolver: IdentityResolver,
    clock: Arc<dyn ClockPort>,
}

impl ProcessNewCharacters {
    pub fn new(advisor: Arc<dyn AdvisorPort>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            advisor,
            resolver: IdentityResolver::default(),
            clock,
        }
    }

    pub fn with_resolver(mut self, resolver: IdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Integrate a batch's new characters into the story. `batch_start` is
    /// the segment index where the batch begins (recorded as first
    /// appearance for created cards). Returns the created card ids.
    pub async fn integrate(
        &self,
        story: &mut Story,
        mentions: Vec<CharacterMention>,
        batch_start: usize,
    ) -> Vec<CardId> {
        let mut created: Vec<(CardId, String)> = Vec::new();
        let mut created_mentions: Vec<CharacterMention> = Vec::new();

        for mention in mentions {
            if mention.name.trim().is_empty() {
                tracing::warn!("Skipping character mention without a name");
                continue;
            }
            match self.resolver.resolve(story.cards(), &mention) {
                Resolution::Merge { card_id, reason } => {
                    tracing::debug!(character = %mention.name, %reason, "Merging character mention");
                    if let Some(card) = story.card_mut(card_id) {
                        card.fill_missing(
                            &mention.gender,
                            &mention.personality,
                            &mention.background,
                            &mention.appearance,
                            mention.known_to_player,
                        );
                    }
                }
                Resolution::AmbiguousCreate { candidates } => {
                    // Never surfaced to the player; resolved by the safe default.
                    tracing::warn!(
                        character = %mention.name,
                        alias = %mention.hidden_name,
                        ?candidates,
                        "Ambiguous alias match, creating new card instead of merging"
                    );
                    let id = self.create_card(story, &mention, batch_start);
                    created.push((id, mention.name.clone()));
                    created_mentions.push(mention);
                }
                Resolution::Create => {
                    let id = self.create_card(story, &mention, batch_start);
                    created.push((id, mention.name.clone()));
                    created_mentions.push(mention);
                }
            }
        }

        // Best-effort AI starting affinity; failure never fails the turn.
        if !created_mentions.is_empty() {
            match self
                .advisor
                .starting_affinities(&story.setup.protagonist, &created_mentions)
                .await
            {
                Ok(evaluated) => {
                    let evaluated: Vec<(String, i32)> = evaluated
                        .into_iter()
                        .map(|(name, affinity)| (normalize_name(&name), affinity))
                        .collect();
                    for (card_id, name) in &created {
                        let normalized = normalize_name(name);
                        if let Some((_, affinity)) =
                            evaluated.iter().find(|(n, _)| *n == normalized)
                        {
                            if let Some(card) = story.card_mut(*card_id) {
                                card.set_affinity(*affinity);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Starting affinity evaluation failed, keeping heuristic seeds");
                }
            }
        }

        let revealed = story.auto_reveal_cards();
        for card_id in &revealed {
            tracing::debug!(card_id = %card_id, "Auto-revealed character name");
        }

        created.into_iter().map(|(id, _)| id).collect()
    }

    fn create_card(&self, story: &mut Story, mention: &CharacterMention, batch_start: usize) -> CardId {
        let seed_text = format!(
            "{} {} {}",
            mention.personality, mention.background, mention.appearance
        );
        let mut card = CharacterCard::new(mention.name.clone(), batch_start, self.clock.now())
            .with_hidden_name(mention.hidden_name.clone())
            .with_revealed(mention.known_to_player)
            .with_affinity(seed_affinity(&seed_text));
        card.gender = mention.gender.clone();
        card.personality = mention.personality.clone();
        card.background = mention.background.clone();
        card.appearance = mention.appearance.clone();
        tracing::debug!(character = %mention.name, affinity = card.affinity(), "Created character card");
        story.add_card(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::test_fixtures::{sample_story, StubAdvisor};
    use taleweaver_domain::StorySegment;

    fn processor(advisor: StubAdvisor) -> ProcessNewCharacters {
        ProcessNewCharacters::new(Arc::new(advisor), Arc::new(SystemClock::new()))
    }

    fn mention(name: &str, alias: &str, background: &str) -> CharacterMention {
        CharacterMention {
            name: name.into(),
            hidden_name: alias.into(),
            background: background.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_seeds_heuristic_affinity() {
        let mut story = sample_story();
        let p = processor(StubAdvisor::failing());
        let created = p
            .integrate(
                &mut story,
                vec![mention("Anna", "", "the protagonist's sister")],
                0,
            )
            .await;
        assert_eq!(created.len(), 1);
        assert_eq!(story.card(created[0]).expect("card").affinity(), 85);
    }

    #[tokio::test]
    async fn test_ai_affinity_overwrites_heuristic() {
        let mut story = sample_story();
        let p = processor(StubAdvisor::with_affinities(&[("Anna", 60)]));
        let created = p
            .integrate(
                &mut story,
                vec![mention("Anna", "", "the protagonist's sister")],
                0,
            )
            .await;
        assert_eq!(story.card(created[0]).expect("card").affinity(), 60);
    }

    #[tokio::test]
    async fn test_advisor_failure_never_fails_turn() {
        let mut story = sample_story();
        let p = processor(StubAdvisor::failing());
        let created = p
            .integrate(&mut story, vec![mention("Tom", "", "a dockhand")], 3)
            .await;
        assert_eq!(created.len(), 1);
        let card = story.card(created[0]).expect("card");
        assert_eq!(card.affinity(), 0);
        assert_eq!(card.first_appearance, 3);
    }

    #[tokio::test]
    async fn test_merge_fills_only_empty_fields() {
        let mut story = sample_story();
        let mut existing = CharacterCard::new("Mira", 0, chrono::Utc::now());
        existing.personality = "wary".to_string();
        let card_id = story.add_card(existing);

        let p = processor(StubAdvisor::failing());
        let mut incoming = mention("Mira", "", "");
        incoming.personality = "cheerful".to_string();
        incoming.gender = "female".to_string();
        let created = p.integrate(&mut story, vec![incoming], 0).await;

        assert!(created.is_empty());
        let card = story.card(card_id).expect("card");
        assert_eq!(card.personality, "wary");
        assert_eq!(card.gender, "female");
    }

    #[tokio::test]
    async fn test_ambiguous_alias_creates_instead_of_merging() {
        let mut story = sample_story();
        story.add_card(CharacterCard::new("Mira", 0, chrono::Utc::now()).with_hidden_name("hooded woman"));
        story.add_card(CharacterCard::new("Sela", 0, chrono::Utc::now()).with_hidden_name("hooded woman"));

        let p = processor(StubAdvisor::failing());
        let created = p
            .integrate(&mut story, vec![mention("Vess", "hooded woman", "")], 0)
            .await;
        assert_eq!(created.len(), 1);
        assert_eq!(story.cards().len(), 3);
    }

    #[tokio::test]
    async fn test_auto_reveal_runs_after_integration() {
        let mut story = sample_story();
        story.add_card(CharacterCard::new("Mira", 0, chrono::Utc::now()).with_hidden_name("hooded woman"));
        story.append_batch(vec![
            StorySegment::dialogue("Mira", "Hello."),
            StorySegment::dialogue("Mira", "Again."),
        ]);

        let p = processor(StubAdvisor::failing());
        p.integrate(&mut story, vec![], 0).await;
        assert!(story.cards()[0].is_name_revealed);
    }
}
