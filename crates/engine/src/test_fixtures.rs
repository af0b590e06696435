//! Hand-rolled fakes and builders for integration-style tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taleweaver_domain::{
    CharacterMention, Difficulty, Story, StorySegment, StorySetup,
};

use crate::infrastructure::clock::{FixedRandom, SystemClock};
use crate::infrastructure::memory_store::MemoryStoryStore;
use crate::infrastructure::ports::{
    AdvisorPort, ClockPort, ImageGenError, ImageGenPort, ImageRequest, ImageResult,
    NarrativeBatch, NarrativeError, NarrativePort, NarrativeRequest, RandomPort, SummarizerPort,
    SummaryOutcome, SummaryRequest,
};
use crate::infrastructure::session::GenerationRegistry;
use crate::use_cases::{
    CancelGeneration, CompressHistory, GenerationCore, GenerationUseCases, PortraitQueue,
    ProcessNewCharacters, SceneFlag, SceneImageQueue, StartStory, SubmitChoice,
};

// =============================================================================
// Story builders
// =============================================================================

pub fn sample_story() -> Story {
    Story::new(
        StorySetup {
            title: "The Glass Harbor".into(),
            premise: "A smuggler inherits a haunted lighthouse.".into(),
            genre: "fantasy".into(),
            protagonist: "Ren, a retired smuggler".into(),
        },
        Difficulty::Normal,
        Utc::now(),
    )
}

/// A story whose log ends in a pending choice: option 0 carries judgment 5.
pub fn story_with_pending_choice() -> Story {
    let mut story = sample_story();
    story.append_batch(vec![
        StorySegment::narration("The cellar door is locked."),
        StorySegment::Choice {
            text: "What now?".into(),
            choices: vec!["Force the lock".into(), "Wait for dawn".into()],
            judgment_values: vec![Some(5), None],
            dice_result: None,
        },
    ]);
    story
}

// =============================================================================
// Narrative fakes
// =============================================================================

/// Returns scripted batches in order; errors once the script runs dry.
pub struct ScriptedNarrative {
    batches: Mutex<VecDeque<Result<NarrativeBatch, NarrativeError>>>,
}

impl ScriptedNarrative {
    pub fn with_batches(batches: Vec<Result<NarrativeBatch, NarrativeError>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait]
impl NarrativePort for ScriptedNarrative {
    async fn generate(&self, _request: NarrativeRequest) -> Result<NarrativeBatch, NarrativeError> {
        let next = match self.batches.lock() {
            Ok(mut batches) => batches.pop_front(),
            Err(_) => None,
        };
        next.unwrap_or_else(|| {
            Err(NarrativeError::RequestFailed(
                "scripted narrative exhausted".into(),
            ))
        })
    }
}

/// Never resolves; for exercising cancellation.
#[derive(Default)]
pub struct PendingNarrative;

impl PendingNarrative {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NarrativePort for PendingNarrative {
    async fn generate(&self, _request: NarrativeRequest) -> Result<NarrativeBatch, NarrativeError> {
        std::future::pending().await
    }
}

// =============================================================================
// Summarizer fake
// =============================================================================

pub struct CountingSummarizer {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingSummarizer {
    pub fn instant() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(millis: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(millis),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummarizerPort for CountingSummarizer {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryOutcome, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(SummaryOutcome {
            summary: format!("Condensed {} chars.", request.history_text.chars().count()),
            title: "A chapter closes".into(),
            involved_characters: vec!["Mira".into()],
        })
    }
}

// =============================================================================
// Advisor fake
// =============================================================================

pub struct StubAdvisor {
    affinities: HashMap<String, i32>,
    fail: bool,
}

impl StubAdvisor {
    /// Every advisory call fails; best-effort paths must shrug this off.
    pub fn failing() -> Self {
        Self {
            affinities: HashMap::new(),
            fail: true,
        }
    }

    pub fn with_affinities(entries: &[(&str, i32)]) -> Self {
        Self {
            affinities: entries
                .iter()
                .map(|(name, affinity)| (name.to_string(), *affinity))
                .collect(),
            fail: false,
        }
    }
}

#[async_trait]
impl AdvisorPort for StubAdvisor {
    async fn starting_affinities(
        &self,
        _protagonist: &str,
        _new_characters: &[CharacterMention],
    ) -> Result<HashMap<String, i32>, NarrativeError> {
        if self.fail {
            return Err(NarrativeError::RequestFailed("advisor offline".into()));
        }
        Ok(self.affinities.clone())
    }

    async fn quality_feedback(
        &self,
        _recent_text: &str,
        _choice_text: &str,
    ) -> Result<String, NarrativeError> {
        if self.fail {
            return Err(NarrativeError::RequestFailed("advisor offline".into()));
        }
        Ok("Tighter pacing next time.".into())
    }

    async fn story_title(&self, _premise: &str, _opening: &str) -> Result<String, NarrativeError> {
        if self.fail {
            return Err(NarrativeError::RequestFailed("advisor offline".into()));
        }
        Ok("The Glass Harbor".into())
    }
}

// =============================================================================
// Image generation fake
// =============================================================================

pub struct FakeImageGen {
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
}

impl FakeImageGen {
    pub fn instant() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(millis: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay: Duration::from_millis(millis),
        }
    }

    /// The first `n` calls fail; the rest succeed.
    pub fn failing_first(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(n),
            delay: Duration::ZERO,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenPort for FakeImageGen {
    async fn generate(&self, _request: ImageRequest) -> Result<ImageResult, ImageGenError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(ImageGenError::GenerationFailed("fake diffusion error".into()));
        }
        Ok(ImageResult {
            uri: format!("http://images.test/{}.png", call),
        })
    }

    async fn check_health(&self) -> Result<bool, ImageGenError> {
        Ok(true)
    }
}

// =============================================================================
// Full engine harness
// =============================================================================

pub struct Harness {
    pub generation: GenerationUseCases,
    pub store: Arc<MemoryStoryStore>,
    pub image_gen: Arc<FakeImageGen>,
    pub summarizer: Arc<CountingSummarizer>,
    pub registry: Arc<GenerationRegistry>,
}

/// Wire a full controller around the given narrative port, with in-memory
/// everything else and a fixed d8 roll of 3.
pub fn harness(narrative: Arc<dyn NarrativePort>) -> Harness {
    let store = Arc::new(MemoryStoryStore::new());
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let random: Arc<dyn RandomPort> = Arc::new(FixedRandom(3));
    let advisor: Arc<dyn AdvisorPort> = Arc::new(StubAdvisor::failing());
    let image_gen = Arc::new(FakeImageGen::instant());
    let summarizer = Arc::new(CountingSummarizer::instant());

    let flag = Arc::new(SceneFlag::new());
    let scene = Arc::new(SceneImageQueue::new(
        flag,
        image_gen.clone(),
        store.clone(),
        clock.clone(),
    ));
    let portrait = Arc::new(PortraitQueue::new(image_gen.clone(), store.clone()));
    let compression = Arc::new(CompressHistory::new(
        store.clone(),
        summarizer.clone(),
        clock.clone(),
        Some(scene.clone()),
    ));
    let registry = Arc::new(GenerationRegistry::new());
    let characters = ProcessNewCharacters::new(advisor.clone(), clock.clone());

    let core = Arc::new(GenerationCore::new(
        store.clone(),
        narrative,
        advisor,
        registry.clone(),
        characters,
        compression,
        scene,
        portrait,
        clock,
        random,
    ));
    let generation = GenerationUseCases::new(
        Arc::new(StartStory::new(core.clone())),
        Arc::new(SubmitChoice::new(core.clone())),
        Arc::new(CancelGeneration::new(registry.clone())),
    );

    Harness {
        generation,
        store,
        image_gen,
        summarizer,
        registry,
    }
}
