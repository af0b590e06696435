//! Generation session controller.
//!
//! Drives one "start story" or "continue story" request: claims the per-story
//! generation slot, calls the narrative generator, post-processes the batch
//! (choice-segment guarantee, character merge, affinity), persists, and hands
//! follow-up work (quality evaluation, compression check, image jobs) to
//! detached tasks whose failures never reach the caller.

use std::sync::Arc;

use taleweaver_domain::game_systems::affinity::RECENT_DIALOGUE_WINDOW;
use taleweaver_domain::{
    ensure_trailing_choice, max_relevant_affinity, soften_judgment, AffinityEconomy, CardId,
    DiceResult, Difficulty, Story, StoryId, StorySegment,
};

use crate::infrastructure::ports::{
    AdvisorPort, ClockPort, GenerationContext, NarrativeBatch, NarrativeError, NarrativePort,
    NarrativeRequest, RandomPort, StoreError, StoryStore,
};
use crate::infrastructure::session::{GenerationRegistry, GenerationSlot, SessionError};
use crate::use_cases::characters::ProcessNewCharacters;
use crate::use_cases::compression::CompressHistory;
use crate::use_cases::images::{PortraitQueue, PortraitTask, SceneImageQueue, SceneTask, TriggerReason};
use crate::use_cases::{condensed_context, render_history};

/// Segments rendered into the quality-evaluation excerpt.
const QUALITY_TAIL_SEGMENTS: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Story not found")]
    StoryNotFound,
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Malformed generator output; surfaced as a failed generation.
    #[error("Invalid generator output: {0}")]
    Validation(String),
    /// Transport failure; surfaced as a failed generation, never retried.
    #[error("Narrative request failed: {0}")]
    Network(String),
    /// Deliberate cancel; status returns to idle with no error text.
    #[error("Generation cancelled")]
    Cancelled,
    #[error("Invalid choice: {0}")]
    InvalidChoice(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<NarrativeError> for GenerationError {
    fn from(err: NarrativeError) -> Self {
        match err {
            NarrativeError::RequestFailed(msg) => Self::Network(msg),
            NarrativeError::InvalidResponse(msg) => Self::Validation(msg),
        }
    }
}

/// What a completed generation did, for the caller.
#[derive(Debug)]
pub struct GenerationReport {
    pub story_id: StoryId,
    pub appended_segments: usize,
    pub new_cards: Vec<CardId>,
    pub dice: Option<DiceResult>,
    pub affinity_toast: Option<String>,
}

/// Shared dependencies for the controller's operations.
pub struct GenerationCore {
    pub(crate) store: Arc<dyn StoryStore>,
    pub(crate) narrative: Arc<dyn NarrativePort>,
    pub(crate) advisor: Arc<dyn AdvisorPort>,
    pub(crate) registry: Arc<GenerationRegistry>,
    pub(crate) characters: ProcessNewCharacters,
    pub(crate) compression: Arc<CompressHistory>,
    pub(crate) scene_queue: Arc<SceneImageQueue>,
    pub(crate) portrait_queue: Arc<PortraitQueue>,
    pub(crate) economy: AffinityEconomy,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) random: Arc<dyn RandomPort>,
}

impl GenerationCore {
    pub fn new(
        store: Arc<dyn StoryStore>,
        narrative: Arc<dyn NarrativePort>,
        advisor: Arc<dyn AdvisorPort>,
        registry: Arc<GenerationRegistry>,
        characters: ProcessNewCharacters,
        compression: Arc<CompressHistory>,
        scene_queue: Arc<SceneImageQueue>,
        portrait_queue: Arc<PortraitQueue>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        Self {
            store,
            narrative,
            advisor,
            registry,
            characters,
            compression,
            scene_queue,
            portrait_queue,
            economy: AffinityEconomy::default(),
            clock,
            random,
        }
    }

    async fn load(&self, story_id: StoryId) -> Result<Story, GenerationError> {
        self.store
            .get(story_id)
            .await?
            .ok_or(GenerationError::StoryNotFound)
    }

    fn build_request(&self, story: &Story, context: GenerationContext) -> NarrativeRequest {
        NarrativeRequest {
            title: story.setup.title.clone(),
            genre: story.setup.genre.clone(),
            premise: story.setup.premise.clone(),
            protagonist: story.setup.protagonist.clone(),
            difficulty: story.difficulty,
            pacing: story.pacing,
            cards: story.cards().to_vec(),
            context,
            quality_feedback: story.quality_feedback.clone(),
        }
    }

    /// Race the generator against the slot's cancellation signal.
    async fn generate(
        &self,
        slot: &GenerationSlot,
        request: NarrativeRequest,
    ) -> Result<NarrativeBatch, GenerationError> {
        tokio::select! {
            _ = slot.cancelled() => Err(GenerationError::Cancelled),
            result = self.narrative.generate(request) => result.map_err(GenerationError::from),
        }
    }

    /// Post-process and commit a successful batch.
    async fn apply_batch(
        &self,
        story: &mut Story,
        slot: &GenerationSlot,
        mut batch: NarrativeBatch,
        free_action: Option<&str>,
    ) -> Result<GenerationReport, GenerationError> {
        ensure_trailing_choice(&mut batch.segments, free_action);
        let batch_start = story.segments().len();
        let appended = batch.segments.len();
        story.append_batch(batch.segments);

        let new_cards = self
            .characters
            .integrate(story, batch.new_characters, batch_start)
            .await;

        story.pacing = batch.pacing;
        story.finish_generation(self.clock.now());
        self.store.put(story).await?;

        self.spawn_follow_ups(story, slot, free_action);

        for card_id in &new_cards {
            self.portrait_queue.enqueue(PortraitTask {
                story_id: story.id,
                card_id: *card_id,
            });
        }
        if let Some(summary) = &story.story_summary {
            self.scene_queue.enqueue(SceneTask {
                story_id: story.id,
                summary_text: summary.clone(),
                reason: TriggerReason::Continuation,
            });
        }

        Ok(GenerationReport {
            story_id: story.id,
            appended_segments: appended,
            new_cards,
            dice: None,
            affinity_toast: None,
        })
    }

    /// Detached follow-up tasks. Failures are caught and logged here; they
    /// never propagate to the submitting caller.
    fn spawn_follow_ups(&self, story: &Story, slot: &GenerationSlot, free_action: Option<&str>) {
        let story_id = story.id;

        if let Some(choice_text) = free_action {
            let tail_start = story.segments().len().saturating_sub(QUALITY_TAIL_SEGMENTS);
            let tail = render_history(&story.segments()[tail_start..]);
            let choice_text = choice_text.to_string();
            let advisor = self.advisor.clone();
            let store = self.store.clone();
            let registry = self.registry.clone();
            let token = slot.token;
            tokio::spawn(async move {
                let feedback = match advisor.quality_feedback(&tail, &choice_text).await {
                    Ok(feedback) => feedback,
                    Err(e) => {
                        tracing::debug!(story_id = %story_id, error = %e,
                            "Continuation quality evaluation failed");
                        return;
                    }
                };
                match store.get(story_id).await {
                    Ok(Some(mut story)) => {
                        story.push_quality_feedback(feedback);
                        if let Err(e) = store.put(&story).await {
                            tracing::warn!(story_id = %story_id, error = %e,
                                "Failed to persist quality feedback");
                        }
                        // Storage stays correct either way; stale completions
                        // just never refresh what is currently displayed.
                        if !registry.is_current(story_id, token) {
                            tracing::debug!(story_id = %story_id,
                                "Stale quality feedback persisted without refresh");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(story_id = %story_id, error = %e,
                            "Failed to load story for quality feedback");
                    }
                }
            });
        }

        let compression = self.compression.clone();
        tokio::spawn(async move {
            if let Err(e) = compression.check_and_run(story_id).await {
                tracing::warn!(story_id = %story_id, error = %e, "History compression failed");
            }
        });
    }

    /// Best-effort title fill for stories created with a blank title.
    fn spawn_title_generation(&self, story: &Story) {
        let story_id = story.id;
        let premise = story.setup.premise.clone();
        let opening = story
            .segments()
            .iter()
            .find_map(|s| match s {
                StorySegment::Narration { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let advisor = self.advisor.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let title = match advisor.story_title(&premise, &opening).await {
                Ok(title) => title,
                Err(e) => {
                    tracing::debug!(story_id = %story_id, error = %e, "Title generation failed");
                    return;
                }
            };
            match store.get(story_id).await {
                Ok(Some(mut story)) if story.setup.title.trim().is_empty() => {
                    story.setup.title = title;
                    if let Err(e) = store.put(&story).await {
                        tracing::warn!(story_id = %story_id, error = %e, "Failed to persist title");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(story_id = %story_id, error = %e,
                        "Failed to load story for title generation");
                }
            }
        });
    }
}

// =============================================================================
// Start
// =============================================================================

pub struct StartStory {
    core: Arc<GenerationCore>,
}

impl StartStory {
    pub fn new(core: Arc<GenerationCore>) -> Self {
        Self { core }
    }

    /// Generate the opening batch for a fresh story.
    pub async fn execute(&self, story_id: StoryId) -> Result<GenerationReport, GenerationError> {
        let mut story = self.core.load(story_id).await?;
        let slot = self.core.registry.begin(story_id)?;
        self.core.registry.set_active_story(story_id);
        let result = self.run(&mut story, &slot).await;
        self.core.registry.settle(&slot);
        result
    }

    async fn run(
        &self,
        story: &mut Story,
        slot: &GenerationSlot,
    ) -> Result<GenerationReport, GenerationError> {
        let rollback_len = story.segments().len();
        story.begin_generation(self.core.clock.now());
        self.core.store.put(story).await?;

        let request = self.core.build_request(story, GenerationContext::Opening);
        match self.core.generate(slot, request).await {
            Ok(batch) => {
                let report = self.core.apply_batch(story, slot, batch, None).await?;
                if story.setup.title.trim().is_empty() {
                    self.core.spawn_title_generation(story);
                }
                Ok(report)
            }
            Err(e) => {
                rollback(&self.core, story, rollback_len, &e).await?;
                Err(e)
            }
        }
    }
}

// =============================================================================
// Submit choice
// =============================================================================

pub struct SubmitChoice {
    core: Arc<GenerationCore>,
}

impl SubmitChoice {
    pub fn new(core: Arc<GenerationCore>) -> Self {
        Self { core }
    }

    /// Resolve a player choice into continued narrative.
    ///
    /// `preset_index` selects one of the trailing choice segment's options;
    /// `None` means a freeform action. Dice are rolled only for preset
    /// options carrying a judgment value, and never on no-random difficulty.
    pub async fn execute(
        &self,
        story_id: StoryId,
        choice_text: String,
        preset_index: Option<usize>,
    ) -> Result<GenerationReport, GenerationError> {
        let mut story = self.core.load(story_id).await?;
        let slot = self.core.registry.begin(story_id)?;
        self.core.registry.set_active_story(story_id);
        let result = self.run(&mut story, &slot, choice_text, preset_index).await;
        self.core.registry.settle(&slot);
        result
    }

    async fn run(
        &self,
        story: &mut Story,
        slot: &GenerationSlot,
        choice_text: String,
        preset_index: Option<usize>,
    ) -> Result<GenerationReport, GenerationError> {
        let core = &self.core;
        let dice = resolve_dice(core, story, preset_index, &choice_text)?;

        // Optimistic choice segment describing the action taken.
        let rollback_len = story.segments().len();
        story.push_segment(StorySegment::Choice {
            text: choice_text.clone(),
            choices: Vec::new(),
            judgment_values: Vec::new(),
            dice_result: dice,
        });
        story.begin_generation(core.clock.now());

        // Affinity moves with the choice, before the generator round-trip.
        let difficulty = story.difficulty;
        let recent_segments = recent_window(story);
        let recent_summaries: Vec<_> = story.summary_history.iter().take(3).cloned().collect();
        let assessment = core.economy.assess(
            story.cards_mut(),
            &choice_text,
            dice.map(|d| d.outcome),
            difficulty,
            &recent_segments,
            &recent_summaries,
        );
        if let Some(toast) = &assessment.toast {
            tracing::info!(story_id = %story.id, toast = %toast, "Affinity updated");
        }
        tracing::debug!(story_id = %story.id, detail = %assessment.debug, "Affinity assessment");
        core.store.put(story).await?;

        let request = core.build_request(
            story,
            GenerationContext::Continuation {
                condensed_history: condensed_context(story),
                choice_text: choice_text.clone(),
            },
        );
        match core.generate(slot, request).await {
            Ok(batch) => {
                story.choice_count += 1;
                let mut report = core
                    .apply_batch(story, slot, batch, Some(&choice_text))
                    .await?;
                report.dice = dice;
                report.affinity_toast = assessment.toast;
                Ok(report)
            }
            Err(e) => {
                rollback(core, story, rollback_len, &e).await?;
                Err(e)
            }
        }
    }
}

/// Roll back to the pre-request state: drop any optimistic segment and set
/// the status. Failures carry a message; a deliberate cancel goes back to
/// idle without one.
async fn rollback(
    core: &GenerationCore,
    story: &mut Story,
    rollback_len: usize,
    error: &GenerationError,
) -> Result<(), GenerationError> {
    story.truncate_segments(rollback_len);
    let now = core.clock.now();
    match error {
        GenerationError::Cancelled => {
            story.reset_generation(now);
            tracing::info!(story_id = %story.id, "Generation cancelled");
        }
        other => {
            story.fail_generation(other.to_string(), now);
            tracing::warn!(story_id = %story.id, error = %other, "Generation failed");
        }
    }
    core.store.put(story).await?;
    Ok(())
}

fn resolve_dice(
    core: &GenerationCore,
    story: &Story,
    preset_index: Option<usize>,
    choice_text: &str,
) -> Result<Option<DiceResult>, GenerationError> {
    if story.difficulty == Difficulty::NoRandom {
        return Ok(None);
    }
    let Some(index) = preset_index else {
        return Ok(None);
    };
    let Some(StorySegment::Choice {
        choices,
        judgment_values,
        ..
    }) = story.trailing_choice()
    else {
        return Err(GenerationError::InvalidChoice(
            "no pending choice segment".to_string(),
        ));
    };
    if index >= choices.len() {
        return Err(GenerationError::InvalidChoice(format!(
            "preset index {} out of range ({} options)",
            index,
            choices.len()
        )));
    }
    let Some(judgment) = judgment_values.get(index).copied().flatten() else {
        return Ok(None);
    };

    let softened = soften_judgment(
        judgment,
        max_relevant_affinity(story.cards(), choice_text, story.segments()),
    );
    let roll = core.random.gen_range(1, 8) as u8;
    let dice = DiceResult::adjudicate(roll, softened)
        .map_err(|e| GenerationError::Validation(e.to_string()))?;
    tracing::debug!(story_id = %story.id, roll, judgment, softened, outcome = %dice.outcome,
        "Dice adjudicated");
    Ok(Some(dice))
}

fn recent_window(story: &Story) -> Vec<StorySegment> {
    let start = story.segments().len().saturating_sub(RECENT_DIALOGUE_WINDOW);
    story.segments()[start..].to_vec()
}

// =============================================================================
// Cancel
// =============================================================================

pub struct CancelGeneration {
    registry: Arc<GenerationRegistry>,
}

impl CancelGeneration {
    pub fn new(registry: Arc<GenerationRegistry>) -> Self {
        Self { registry }
    }

    /// Abort the in-flight generation for a story, if any. The controller's
    /// own rollback path distinguishes this from a failure.
    pub fn execute(&self, story_id: StoryId) -> bool {
        self.registry.cancel(story_id)
    }
}

/// Container for the controller's operations.
pub struct GenerationUseCases {
    pub start: Arc<StartStory>,
    pub submit: Arc<SubmitChoice>,
    pub cancel: Arc<CancelGeneration>,
}

impl GenerationUseCases {
    pub fn new(start: Arc<StartStory>, submit: Arc<SubmitChoice>, cancel: Arc<CancelGeneration>) -> Self {
        Self {
            start,
            submit,
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{
        harness, sample_story, story_with_pending_choice, PendingNarrative, ScriptedNarrative,
    };
    use std::time::Duration;
    use taleweaver_domain::{CharacterMention, DiceOutcome, GenerationState, PacingLevel};

    fn narration_batch() -> NarrativeBatch {
        NarrativeBatch {
            segments: vec![
                StorySegment::narration("The fog parted."),
                StorySegment::dialogue("Mira", "This way."),
            ],
            new_characters: vec![CharacterMention {
                name: "Mira".into(),
                hidden_name: "hooded woman".into(),
                gender: "female".into(),
                personality: "wary".into(),
                background: "a harbor guide".into(),
                ..Default::default()
            }],
            pacing: PacingLevel::Brisk,
            generated_chars: 30,
        }
    }

    #[tokio::test]
    async fn test_start_initial_generation_appends_and_guarantees_choice() {
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Ok(narration_batch())]));
        let h = harness(narrative);
        let story = sample_story();
        h.store.put(&story).await.expect("put");

        let report = h.generation.start.execute(story.id).await.expect("start");
        // Two generated segments plus the synthesized trailing choice.
        assert_eq!(report.appended_segments, 3);
        assert_eq!(report.new_cards.len(), 1);

        let stored = h.store.get(story.id).await.expect("get").expect("present");
        assert_eq!(stored.generation.state, GenerationState::Idle);
        assert!(stored.trailing_choice().is_some());
        assert_eq!(stored.current_index(), stored.segments().len() - 1);
        assert_eq!(stored.pacing, PacingLevel::Brisk);
        assert_eq!(stored.cards().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_choice_success_flow() {
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Ok(narration_batch())]));
        let h = harness(narrative);
        let story = story_with_pending_choice();
        h.store.put(&story).await.expect("put");

        let report = h
            .generation
            .submit
            .execute(story.id, "help Mira with the ropes".to_string(), None)
            .await
            .expect("submit");
        assert!(report.dice.is_none());

        let stored = h.store.get(story.id).await.expect("get").expect("present");
        assert_eq!(stored.choice_count, 1);
        assert_eq!(stored.generation.state, GenerationState::Idle);
        assert!(stored.generation.last_error.is_none());
        // Optimistic choice segment survives on success, with the action text.
        let optimistic = &stored.segments()[story.segments().len()];
        assert_eq!(optimistic.text(), "help Mira with the ropes");
        assert!(stored.trailing_choice().is_some());
    }

    #[tokio::test]
    async fn test_preset_choice_rolls_dice_worse() {
        // Judgment 5, fixed roll 3, normal difficulty -> worse.
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Ok(narration_batch())]));
        let h = harness(narrative);
        let story = story_with_pending_choice();
        h.store.put(&story).await.expect("put");

        let report = h
            .generation
            .submit
            .execute(story.id, "Force the lock".to_string(), Some(0))
            .await
            .expect("submit");
        let dice = report.dice.expect("dice rolled");
        assert_eq!(dice.roll, 3);
        assert_eq!(dice.judgment_value, 5);
        assert_eq!(dice.outcome, DiceOutcome::Worse);

        let stored = h.store.get(story.id).await.expect("get").expect("present");
        let optimistic = &stored.segments()[story.segments().len()];
        match optimistic {
            StorySegment::Choice { dice_result, .. } => {
                assert_eq!(dice_result.expect("attached").outcome, DiceOutcome::Worse);
            }
            _ => panic!("expected optimistic choice segment"),
        }
    }

    #[tokio::test]
    async fn test_no_random_difficulty_skips_dice() {
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Ok(narration_batch())]));
        let h = harness(narrative);
        let mut story = story_with_pending_choice();
        story.difficulty = Difficulty::NoRandom;
        h.store.put(&story).await.expect("put");

        let report = h
            .generation
            .submit
            .execute(story.id, "Force the lock".to_string(), Some(0))
            .await
            .expect("submit");
        assert!(report.dice.is_none());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_sets_failed_status() {
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Err(
            NarrativeError::InvalidResponse("segments missing".into()),
        )]));
        let h = harness(narrative);
        let story = story_with_pending_choice();
        let original_len = story.segments().len();
        h.store.put(&story).await.expect("put");

        let err = h
            .generation
            .submit
            .execute(story.id, "open the door".to_string(), None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, GenerationError::Validation(_)));

        let stored = h.store.get(story.id).await.expect("get").expect("present");
        assert_eq!(stored.segments().len(), original_len);
        assert_eq!(stored.generation.state, GenerationState::Failed);
        assert!(stored.generation.last_error.is_some());
    }

    #[tokio::test]
    async fn test_cancel_rolls_back_optimistic_segment_and_stays_idle() {
        let narrative = Arc::new(PendingNarrative::new());
        let h = harness(narrative);
        let story = story_with_pending_choice();
        let original_len = story.segments().len();
        h.store.put(&story).await.expect("put");

        let submit = h.generation.submit.clone();
        let story_id = story.id;
        let task = tokio::spawn(async move {
            submit
                .execute(story_id, "open the door".to_string(), None)
                .await
        });
        // Let the request reach the generator before cancelling.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.generation.cancel.execute(story_id));

        let err = task.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, GenerationError::Cancelled));

        let stored = h.store.get(story_id).await.expect("get").expect("present");
        assert_eq!(stored.segments().len(), original_len);
        assert_eq!(stored.generation.state, GenerationState::Idle);
        assert!(stored.generation.last_error.is_none());
        assert_eq!(stored.choice_count, 0);
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_in_flight() {
        let narrative = Arc::new(PendingNarrative::new());
        let h = harness(narrative);
        let story = story_with_pending_choice();
        h.store.put(&story).await.expect("put");

        let submit = h.generation.submit.clone();
        let story_id = story.id;
        let task = tokio::spawn(async move {
            submit.execute(story_id, "wait".to_string(), None).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = h
            .generation
            .submit
            .execute(story_id, "wait again".to_string(), None)
            .await
            .expect_err("second submission must be rejected");
        assert!(matches!(
            err,
            GenerationError::Session(SessionError::AlreadyGenerating)
        ));

        h.generation.cancel.execute(story_id);
        let _ = task.await.expect("join");
    }

    mockall::mock! {
        pub Store {}

        #[async_trait::async_trait]
        impl crate::infrastructure::ports::StoryStore for Store {
            async fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError>;
            async fn put(&self, story: &Story) -> Result<(), StoreError>;
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates_and_slot_settles() {
        use crate::infrastructure::clock::{FixedRandom, SystemClock};
        use crate::infrastructure::session::GenerationRegistry;
        use crate::test_fixtures::{CountingSummarizer, FakeImageGen, StubAdvisor};
        use crate::use_cases::{PortraitQueue, SceneFlag, SceneImageQueue};

        let story = story_with_pending_choice();
        let story_id = story.id;
        let mut mock = MockStore::new();
        mock.expect_get()
            .returning(move |_| Ok(Some(story.clone())));
        mock.expect_put()
            .returning(|_| Err(StoreError::Backend("disk full".into())));
        let store: Arc<dyn crate::infrastructure::ports::StoryStore> = Arc::new(mock);

        let clock: Arc<dyn crate::infrastructure::ports::ClockPort> = Arc::new(SystemClock::new());
        let advisor: Arc<dyn crate::infrastructure::ports::AdvisorPort> =
            Arc::new(StubAdvisor::failing());
        let image_gen = Arc::new(FakeImageGen::instant());
        let flag = Arc::new(SceneFlag::new());
        let scene = Arc::new(SceneImageQueue::new(
            flag,
            image_gen.clone(),
            store.clone(),
            clock.clone(),
        ));
        let portrait = Arc::new(PortraitQueue::new(image_gen, store.clone()));
        let compression = Arc::new(CompressHistory::new(
            store.clone(),
            Arc::new(CountingSummarizer::instant()),
            clock.clone(),
            None,
        ));
        let registry = Arc::new(GenerationRegistry::new());
        let core = Arc::new(GenerationCore::new(
            store,
            Arc::new(PendingNarrative::new()),
            advisor.clone(),
            registry.clone(),
            ProcessNewCharacters::new(advisor, clock.clone()),
            compression,
            scene,
            portrait,
            clock,
            Arc::new(FixedRandom(3)),
        ));
        let submit = SubmitChoice::new(core);

        let err = submit
            .execute(story_id, "open the door".to_string(), None)
            .await
            .expect_err("put failure must surface");
        assert!(matches!(err, GenerationError::Store(_)));

        // The slot settled on the error path: the next attempt is not
        // rejected as already-generating.
        let err = submit
            .execute(story_id, "try again".to_string(), None)
            .await
            .expect_err("still failing");
        assert!(matches!(err, GenerationError::Store(_)));
    }

    #[tokio::test]
    async fn test_affinity_moves_with_submitted_choice() {
        let narrative = Arc::new(ScriptedNarrative::with_batches(vec![Ok(NarrativeBatch {
            segments: vec![StorySegment::narration("She smiles.")],
            new_characters: vec![],
            pacing: PacingLevel::Steady,
            generated_chars: 10,
        })]));
        let h = harness(narrative);
        let mut story = story_with_pending_choice();
        let card_id = story.add_card(
            taleweaver_domain::CharacterCard::new("Mira", 0, chrono::Utc::now()).with_affinity(50),
        );
        h.store.put(&story).await.expect("put");

        let report = h
            .generation
            .submit
            .execute(story.id, "thank Mira for everything".to_string(), None)
            .await
            .expect("submit");
        assert!(report.affinity_toast.is_some());

        let stored = h.store.get(story.id).await.expect("get").expect("present");
        assert!(stored.card(card_id).expect("card").affinity() > 50);
    }
}
