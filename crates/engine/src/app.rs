//! Application state and composition.

use std::sync::Arc;

use crate::infrastructure::ports::{
    AdvisorPort, ClockPort, ImageGenPort, NarrativePort, RandomPort, StoryStore, SummarizerPort,
};
use crate::infrastructure::session::GenerationRegistry;
use crate::use_cases::{
    CancelGeneration, CompressHistory, GenerationCore, GenerationUseCases, ImageQueues,
    ManualPortrait, ManualSceneImage, PortraitQueue, ProcessNewCharacters, SceneFlag,
    SceneImageQueue, StartStory, SubmitChoice,
};

/// Main application state.
///
/// Holds the composed use cases and shared infrastructure. Passed to HTTP
/// handlers via Axum state.
pub struct App {
    pub use_cases: UseCases,
    pub queues: ImageQueues,
    pub store: Arc<dyn StoryStore>,
    pub clock: Arc<dyn ClockPort>,
}

/// Container for all use cases.
pub struct UseCases {
    pub generation: GenerationUseCases,
    pub compression: Arc<CompressHistory>,
    pub manual_scene: Arc<ManualSceneImage>,
    pub manual_portrait: Arc<ManualPortrait>,
}

impl App {
    /// Create a new App with all dependencies wired up.
    pub fn new(
        store: Arc<dyn StoryStore>,
        narrative: Arc<dyn NarrativePort>,
        summarizer: Arc<dyn SummarizerPort>,
        advisor: Arc<dyn AdvisorPort>,
        image_gen: Arc<dyn ImageGenPort>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        // Image queues share one scene in-flight flag with manual requests.
        let scene_flag = Arc::new(SceneFlag::new());
        let scene_queue = Arc::new(SceneImageQueue::new(
            scene_flag.clone(),
            image_gen.clone(),
            store.clone(),
            clock.clone(),
        ));
        let portrait_queue = Arc::new(PortraitQueue::new(image_gen.clone(), store.clone()));

        let compression = Arc::new(CompressHistory::new(
            store.clone(),
            summarizer,
            clock.clone(),
            Some(scene_queue.clone()),
        ));

        let registry = Arc::new(GenerationRegistry::new());
        let characters = ProcessNewCharacters::new(advisor.clone(), clock.clone());

        let core = Arc::new(GenerationCore::new(
            store.clone(),
            narrative,
            advisor,
            registry.clone(),
            characters,
            compression.clone(),
            scene_queue.clone(),
            portrait_queue.clone(),
            clock.clone(),
            random,
        ));

        let generation = GenerationUseCases::new(
            Arc::new(StartStory::new(core.clone())),
            Arc::new(SubmitChoice::new(core.clone())),
            Arc::new(CancelGeneration::new(registry)),
        );

        let manual_scene = Arc::new(ManualSceneImage::new(
            scene_flag,
            image_gen.clone(),
            store.clone(),
            clock.clone(),
        ));
        let manual_portrait = Arc::new(ManualPortrait::new(image_gen, store.clone()));

        Self {
            use_cases: UseCases {
                generation,
                compression,
                manual_scene,
                manual_portrait,
            },
            queues: ImageQueues::new(scene_queue, portrait_queue),
            store,
            clock,
        }
    }
}
