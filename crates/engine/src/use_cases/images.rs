//! Image generation queues.
//!
//! Two independent FIFO queues, each processed by a single self-starting
//! drain loop: scene artwork (keyed by story + normalized summary prefix) and
//! character portraits (keyed by story + card). Enqueue starts the loop only
//! if it is not already running; the loop exits when the queue is empty and
//! the next enqueue restarts it. One failed task never halts a queue.
//!
//! Scene work additionally shares a global in-flight flag with manual
//! (player-initiated) scene requests. Manual requests take priority on
//! contention but never preempt a task that already claimed the flag.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use taleweaver_domain::{normalize_name, CardId, ImagePromptRecord, ImageState, StoryId};

use crate::infrastructure::ports::{
    ClockPort, ImageGenError, ImageGenPort, ImageRequest, StoreError, StoryStore,
};

/// Scene dedup set cap; cleared wholesale and reseeded from the still-queued
/// tasks on overflow. Only suppresses redundant auto-triggers.
pub const SCENE_DEDUP_CAP: usize = 240;
/// Length of the normalized summary prefix used in scene task keys.
pub const SCENE_KEY_PREFIX_CHARS: usize = 48;
/// Prompt text is bounded before it reaches the image backend.
const SCENE_PROMPT_CHARS: usize = 600;

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ImageTaskError {
    #[error("Story not found")]
    StoryNotFound,
    #[error("Character card not found")]
    CardNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Image(#[from] ImageGenError),
}

/// Why a scene task was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Continuation,
    Compression,
    Manual,
}

#[derive(Debug, Clone)]
pub struct SceneTask {
    pub story_id: StoryId,
    pub summary_text: String,
    pub reason: TriggerReason,
}

fn scene_task_key(story_id: StoryId, summary_text: &str) -> String {
    let normalized = normalize_name(summary_text);
    let prefix: String = normalized.chars().take(SCENE_KEY_PREFIX_CHARS).collect();
    format!("{}:{}", story_id, prefix)
}

fn portrait_key(story_id: StoryId, card_id: CardId) -> (StoryId, CardId) {
    (story_id, card_id)
}

// =============================================================================
// Shared scene in-flight flag
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagHolder {
    Free,
    Auto,
    Manual,
}

struct FlagState {
    holder: FlagHolder,
    manual_waiting: usize,
}

/// The global "scene task in flight" flag shared by the automatic queue and
/// manual requests. Claiming polls rather than queues; a waiting manual
/// request starves automatic claims until it gets through.
pub struct SceneFlag {
    state: Mutex<FlagState>,
}

impl Default for SceneFlag {
    fn default() -> Self {
        Self {
            state: Mutex::new(FlagState {
                holder: FlagHolder::Free,
                manual_waiting: 0,
            }),
        }
    }
}

impl SceneFlag {
    pub fn new() -> Self {
        Self::default()
    }

    async fn claim_auto(&self) {
        loop {
            {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if state.holder == FlagHolder::Free && state.manual_waiting == 0 {
                    state.holder = FlagHolder::Auto;
                    return;
                }
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
        }
    }

    async fn claim_manual(&self) {
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.manual_waiting += 1;
        }
        loop {
            {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if state.holder == FlagHolder::Free {
                    state.holder = FlagHolder::Manual;
                    state.manual_waiting -= 1;
                    return;
                }
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
        }
    }

    fn release(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.holder = FlagHolder::Free;
    }
}

// =============================================================================
// Scene queue
// =============================================================================

struct SceneQueueState {
    queue: VecDeque<SceneTask>,
    seen: HashSet<String>,
    running: bool,
    in_flight: Option<String>,
}

struct SceneQueueInner {
    state: Mutex<SceneQueueState>,
    flag: Arc<SceneFlag>,
    image_gen: Arc<dyn ImageGenPort>,
    store: Arc<dyn StoryStore>,
    clock: Arc<dyn ClockPort>,
}

/// FIFO, concurrency-1, deduplicating scene artwork queue.
pub struct SceneImageQueue {
    inner: Arc<SceneQueueInner>,
}

impl SceneImageQueue {
    pub fn new(
        flag: Arc<SceneFlag>,
        image_gen: Arc<dyn ImageGenPort>,
        store: Arc<dyn StoryStore>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            inner: Arc::new(SceneQueueInner {
                state: Mutex::new(SceneQueueState {
                    queue: VecDeque::new(),
                    seen: HashSet::new(),
                    running: false,
                    in_flight: None,
                }),
                flag,
                image_gen,
                store,
                clock,
            }),
        }
    }

    /// Enqueue a scene task; duplicates of an already-seen key are dropped.
    /// Returns whether the task was accepted.
    pub fn enqueue(&self, task: SceneTask) -> bool {
        let key = scene_task_key(task.story_id, &task.summary_text);
        let start_worker = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.seen.contains(&key) {
                tracing::debug!(key = %key, "Duplicate scene task suppressed");
                return false;
            }
            if state.seen.len() >= SCENE_DEDUP_CAP {
                tracing::debug!("Scene dedup set overflow; clearing and reseeding");
                state.seen.clear();
                let reseed: Vec<String> = state
                    .queue
                    .iter()
                    .map(|t| scene_task_key(t.story_id, &t.summary_text))
                    .collect();
                state.seen.extend(reseed);
            }
            state.seen.insert(key);
            state.queue.push_back(task);
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        };
        if start_worker {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                drain_scene_queue(inner).await;
            });
        }
        true
    }

    pub fn pending(&self) -> usize {
        match self.inner.state.lock() {
            Ok(state) => state.queue.len(),
            Err(_) => 0,
        }
    }

    pub fn in_flight(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.in_flight.clone())
    }
}

async fn drain_scene_queue(inner: Arc<SceneQueueInner>) {
    loop {
        let task = {
            let mut state = match inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            match state.queue.pop_front() {
                Some(task) => {
                    state.in_flight = Some(format!("{} ({:?})", task.story_id, task.reason));
                    task
                }
                None => {
                    state.running = false;
                    state.in_flight = None;
                    return;
                }
            }
        };

        inner.flag.claim_auto().await;
        let result = process_scene_task(&inner, &task).await;
        inner.flag.release();

        if let Err(e) = result {
            // Recorded against the story where possible; the queue moves on.
            tracing::warn!(story_id = %task.story_id, error = %e, "Scene image task failed");
        }

        if let Ok(mut state) = inner.state.lock() {
            state.in_flight = None;
        }
    }
}

async fn process_scene_task(
    inner: &SceneQueueInner,
    task: &SceneTask,
) -> Result<(), ImageTaskError> {
    let mut story = inner
        .store
        .get(task.story_id)
        .await?
        .ok_or(ImageTaskError::StoryNotFound)?;

    let prompt = scene_prompt(&task.summary_text);
    story.image_state = ImageState::Generating;
    inner.store.put(&story).await?;

    let generated = inner
        .image_gen
        .generate(ImageRequest {
            prompt: prompt.clone(),
        })
        .await;

    // Re-fetch so a mutation that landed during generation is not clobbered.
    let mut story = inner
        .store
        .get(task.story_id)
        .await?
        .ok_or(ImageTaskError::StoryNotFound)?;
    let now = inner.clock.now();
    match generated {
        Ok(image) => {
            story.scene_image_uri = Some(image.uri);
            story.image_state = ImageState::Success;
            story.push_image_prompt(ImagePromptRecord {
                prompt,
                succeeded: true,
                created_at: now,
            });
            inner.store.put(&story).await?;
            Ok(())
        }
        Err(e) => {
            story.image_state = ImageState::Failed;
            story.push_image_prompt(ImagePromptRecord {
                prompt,
                succeeded: false,
                created_at: now,
            });
            inner.store.put(&story).await?;
            Err(e.into())
        }
    }
}

fn scene_prompt(summary_text: &str) -> String {
    let trimmed: String = summary_text.chars().take(SCENE_PROMPT_CHARS).collect();
    format!("{}, atmospheric scene illustration, digital painting", trimmed.trim())
}

// =============================================================================
// Portrait queue
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PortraitTask {
    pub story_id: StoryId,
    pub card_id: CardId,
}

struct PortraitQueueState {
    queue: VecDeque<PortraitTask>,
    queued: HashSet<(StoryId, CardId)>,
    in_flight: HashSet<(StoryId, CardId)>,
    running: bool,
}

struct PortraitQueueInner {
    state: Mutex<PortraitQueueState>,
    image_gen: Arc<dyn ImageGenPort>,
    store: Arc<dyn StoryStore>,
}

/// FIFO, concurrency-1 portrait queue. The queued/in-flight sets guarantee a
/// card is never queued twice nor processed twice concurrently.
pub struct PortraitQueue {
    inner: Arc<PortraitQueueInner>,
}

impl PortraitQueue {
    pub fn new(image_gen: Arc<dyn ImageGenPort>, store: Arc<dyn StoryStore>) -> Self {
        Self {
            inner: Arc::new(PortraitQueueInner {
                state: Mutex::new(PortraitQueueState {
                    queue: VecDeque::new(),
                    queued: HashSet::new(),
                    in_flight: HashSet::new(),
                    running: false,
                }),
                image_gen,
                store,
            }),
        }
    }

    /// Enqueue portrait work; a no-op while the same card is queued or in
    /// flight. Returns whether the task was accepted.
    pub fn enqueue(&self, task: PortraitTask) -> bool {
        let key = portrait_key(task.story_id, task.card_id);
        let start_worker = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.queued.contains(&key) || state.in_flight.contains(&key) {
                tracing::debug!(story_id = %task.story_id, card_id = %task.card_id,
                    "Duplicate portrait task suppressed");
                return false;
            }
            state.queued.insert(key);
            state.queue.push_back(task);
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        };
        if start_worker {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                drain_portrait_queue(inner).await;
            });
        }
        true
    }

    pub fn pending(&self) -> usize {
        match self.inner.state.lock() {
            Ok(state) => state.queue.len(),
            Err(_) => 0,
        }
    }

    pub fn in_flight(&self) -> Vec<String> {
        match self.inner.state.lock() {
            Ok(state) => state
                .in_flight
                .iter()
                .map(|(story_id, card_id)| format!("{}:{}", story_id, card_id))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn drain_portrait_queue(inner: Arc<PortraitQueueInner>) {
    loop {
        let task = {
            let mut state = match inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            match state.queue.pop_front() {
                Some(task) => {
                    let key = portrait_key(task.story_id, task.card_id);
                    state.queued.remove(&key);
                    state.in_flight.insert(key);
                    task
                }
                None => {
                    state.running = false;
                    return;
                }
            }
        };

        if let Err(e) = process_portrait_task(&inner, &task).await {
            // Log only; the queue continues.
            tracing::warn!(story_id = %task.story_id, card_id = %task.card_id, error = %e,
                "Portrait task failed");
        }

        if let Ok(mut state) = inner.state.lock() {
            state
                .in_flight
                .remove(&portrait_key(task.story_id, task.card_id));
        }
    }
}

async fn process_portrait_task(
    inner: &PortraitQueueInner,
    task: &PortraitTask,
) -> Result<(), ImageTaskError> {
    let story = inner
        .store
        .get(task.story_id)
        .await?
        .ok_or(ImageTaskError::StoryNotFound)?;
    let card = story.card(task.card_id).ok_or(ImageTaskError::CardNotFound)?;

    if card.portrait_uri.is_some() {
        tracing::debug!(card_id = %task.card_id, "Card already has a portrait, skipping");
        return Ok(());
    }

    let prompt = portrait_prompt(&card.name, &card.gender, &card.appearance, &card.personality);
    let image = inner.image_gen.generate(ImageRequest { prompt }).await?;

    // Re-fetch: a racing manual request may have set the portrait meanwhile.
    let mut story = inner
        .store
        .get(task.story_id)
        .await?
        .ok_or(ImageTaskError::StoryNotFound)?;
    let card = story
        .card_mut(task.card_id)
        .ok_or(ImageTaskError::CardNotFound)?;
    if card.portrait_uri.is_some() {
        tracing::debug!(card_id = %task.card_id, "Portrait set while generating, skipping");
        return Ok(());
    }
    card.portrait_uri = Some(image.uri);
    inner.store.put(&story).await?;
    Ok(())
}

fn portrait_prompt(name: &str, gender: &str, appearance: &str, personality: &str) -> String {
    let mut parts = vec![format!("character portrait of {}", name)];
    for detail in [gender, appearance, personality] {
        if !detail.trim().is_empty() {
            parts.push(detail.trim().to_string());
        }
    }
    parts.push("bust shot, detailed digital painting".to_string());
    parts.join(", ")
}

// =============================================================================
// Manual requests
// =============================================================================

/// Player-initiated scene artwork. Claims the shared flag with manual
/// priority; the automatic worker polls until it is released.
pub struct ManualSceneImage {
    flag: Arc<SceneFlag>,
    image_gen: Arc<dyn ImageGenPort>,
    store: Arc<dyn StoryStore>,
    clock: Arc<dyn ClockPort>,
}

impl ManualSceneImage {
    pub fn new(
        flag: Arc<SceneFlag>,
        image_gen: Arc<dyn ImageGenPort>,
        store: Arc<dyn StoryStore>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            flag,
            image_gen,
            store,
            clock,
        }
    }

    pub async fn execute(
        &self,
        story_id: StoryId,
        prompt_override: Option<String>,
    ) -> Result<String, ImageTaskError> {
        let mut story = self
            .store
            .get(story_id)
            .await?
            .ok_or(ImageTaskError::StoryNotFound)?;

        let prompt = prompt_override
            .filter(|p| !p.trim().is_empty())
            .or_else(|| story.story_summary.clone())
            .unwrap_or_else(|| story.setup.premise.clone());
        let prompt = scene_prompt(&prompt);

        self.flag.claim_manual().await;
        story.image_state = ImageState::Generating;
        let generated = match self.store.put(&story).await {
            Ok(()) => {
                self.image_gen
                    .generate(ImageRequest {
                        prompt: prompt.clone(),
                    })
                    .await
            }
            Err(e) => {
                self.flag.release();
                return Err(e.into());
            }
        };
        self.flag.release();

        let mut story = self
            .store
            .get(story_id)
            .await?
            .ok_or(ImageTaskError::StoryNotFound)?;
        let now = self.clock.now();
        match generated {
            Ok(image) => {
                story.scene_image_uri = Some(image.uri.clone());
                story.image_state = ImageState::Success;
                story.push_image_prompt(ImagePromptRecord {
                    prompt,
                    succeeded: true,
                    created_at: now,
                });
                self.store.put(&story).await?;
                Ok(image.uri)
            }
            Err(e) => {
                story.image_state = ImageState::Failed;
                story.push_image_prompt(ImagePromptRecord {
                    prompt,
                    succeeded: false,
                    created_at: now,
                });
                self.store.put(&story).await?;
                Err(e.into())
            }
        }
    }
}

/// Player-initiated portrait. Writes directly; the automatic worker detects
/// the already-set URI and skips.
pub struct ManualPortrait {
    image_gen: Arc<dyn ImageGenPort>,
    store: Arc<dyn StoryStore>,
}

impl ManualPortrait {
    pub fn new(image_gen: Arc<dyn ImageGenPort>, store: Arc<dyn StoryStore>) -> Self {
        Self { image_gen, store }
    }

    pub async fn execute(
        &self,
        story_id: StoryId,
        card_id: CardId,
    ) -> Result<String, ImageTaskError> {
        let story = self
            .store
            .get(story_id)
            .await?
            .ok_or(ImageTaskError::StoryNotFound)?;
        let card = story.card(card_id).ok_or(ImageTaskError::CardNotFound)?;

        let prompt = portrait_prompt(&card.name, &card.gender, &card.appearance, &card.personality);
        let image = self.image_gen.generate(ImageRequest { prompt }).await?;

        let mut story = self
            .store
            .get(story_id)
            .await?
            .ok_or(ImageTaskError::StoryNotFound)?;
        let card = story.card_mut(card_id).ok_or(ImageTaskError::CardNotFound)?;
        card.portrait_uri = Some(image.uri.clone());
        self.store.put(&story).await?;
        Ok(image.uri)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Read-only derived view of the queues for observability. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub scene_pending: usize,
    pub scene_in_flight: Option<String>,
    pub portrait_pending: usize,
    pub portrait_in_flight: Vec<String>,
}

/// Both queues plus the shared flag, wired once in the app composition.
pub struct ImageQueues {
    pub scene: Arc<SceneImageQueue>,
    pub portrait: Arc<PortraitQueue>,
}

impl ImageQueues {
    pub fn new(scene: Arc<SceneImageQueue>, portrait: Arc<PortraitQueue>) -> Self {
        Self { scene, portrait }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            scene_pending: self.scene.pending(),
            scene_in_flight: self.scene.in_flight(),
            portrait_pending: self.portrait.pending(),
            portrait_in_flight: self.portrait.in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::memory_store::MemoryStoryStore;
    use crate::test_fixtures::{sample_story, FakeImageGen};
    use taleweaver_domain::CharacterCard;
    use chrono::Utc;

    fn queues(image_gen: Arc<FakeImageGen>, store: Arc<MemoryStoryStore>) -> ImageQueues {
        let flag = Arc::new(SceneFlag::new());
        let scene = Arc::new(SceneImageQueue::new(
            flag.clone(),
            image_gen.clone(),
            store.clone(),
            Arc::new(SystemClock::new()),
        ));
        let portrait = Arc::new(PortraitQueue::new(image_gen, store));
        ImageQueues::new(scene, portrait)
    }

    async fn wait_for_idle(queues: &ImageQueues) {
        for _ in 0..100 {
            let snapshot = queues.snapshot();
            if snapshot.scene_pending == 0
                && snapshot.scene_in_flight.is_none()
                && snapshot.portrait_pending == 0
                && snapshot.portrait_in_flight.is_empty()
            {
                // One extra tick so a just-finished task's store write lands.
                tokio::time::sleep(Duration::from_millis(20)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("queues did not drain");
    }

    #[tokio::test]
    async fn test_duplicate_scene_key_executes_once() {
        let store = Arc::new(MemoryStoryStore::new());
        let story = sample_story();
        store.put(&story).await.expect("put");
        let image_gen = Arc::new(FakeImageGen::slow(25));
        let q = queues(image_gen.clone(), store.clone());

        let task = SceneTask {
            story_id: story.id,
            summary_text: "A  Stormy   Harbor at night".to_string(),
            reason: TriggerReason::Continuation,
        };
        assert!(q.scene.enqueue(task.clone()));
        // Same key modulo whitespace/case normalization.
        let dup = SceneTask {
            summary_text: "a stormy harbor AT NIGHT".to_string(),
            ..task
        };
        assert!(!q.scene.enqueue(dup));

        wait_for_idle(&q).await;
        assert_eq!(image_gen.calls(), 1);

        let stored = store.get(story.id).await.expect("get").expect("present");
        assert_eq!(stored.image_state, ImageState::Success);
        assert!(stored.scene_image_uri.is_some());
        assert_eq!(stored.image_prompt_history.len(), 1);
    }

    #[tokio::test]
    async fn test_portrait_dedup_while_queued_or_in_flight() {
        let store = Arc::new(MemoryStoryStore::new());
        let mut story = sample_story();
        let card_id = story.add_card(CharacterCard::new("Mira", 0, Utc::now()));
        store.put(&story).await.expect("put");
        let image_gen = Arc::new(FakeImageGen::slow(40));
        let q = queues(image_gen.clone(), store.clone());

        let task = PortraitTask {
            story_id: story.id,
            card_id,
        };
        assert!(q.portrait.enqueue(task));
        // Second enqueue while queued or in flight is a no-op.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!q.portrait.enqueue(task));

        wait_for_idle(&q).await;
        assert_eq!(image_gen.calls(), 1);

        let stored = store.get(story.id).await.expect("get").expect("present");
        assert!(stored.card(card_id).expect("card").portrait_uri.is_some());

        // Once drained the key is free again, but the worker now skips the
        // card because the portrait is already set.
        assert!(q.portrait.enqueue(task));
        wait_for_idle(&q).await;
        assert_eq!(image_gen.calls(), 1);
    }

    #[tokio::test]
    async fn test_scene_failure_recorded_and_queue_continues() {
        let store = Arc::new(MemoryStoryStore::new());
        let story_a = sample_story();
        let story_b = sample_story();
        store.put(&story_a).await.expect("put");
        store.put(&story_b).await.expect("put");
        let image_gen = Arc::new(FakeImageGen::failing_first(1));
        let q = queues(image_gen.clone(), store.clone());

        q.scene.enqueue(SceneTask {
            story_id: story_a.id,
            summary_text: "first scene".into(),
            reason: TriggerReason::Continuation,
        });
        q.scene.enqueue(SceneTask {
            story_id: story_b.id,
            summary_text: "second scene".into(),
            reason: TriggerReason::Compression,
        });
        wait_for_idle(&q).await;

        assert_eq!(image_gen.calls(), 2);
        let failed = store.get(story_a.id).await.expect("get").expect("present");
        assert_eq!(failed.image_state, ImageState::Failed);
        assert_eq!(failed.image_prompt_history.len(), 1);
        assert!(!failed.image_prompt_history[0].succeeded);

        let succeeded = store.get(story_b.id).await.expect("get").expect("present");
        assert_eq!(succeeded.image_state, ImageState::Success);
    }

    #[tokio::test]
    async fn test_dedup_cap_clears_and_reseeds() {
        let store = Arc::new(MemoryStoryStore::new());
        let story = sample_story();
        store.put(&story).await.expect("put");
        let image_gen = Arc::new(FakeImageGen::instant());
        let q = queues(image_gen.clone(), store.clone());

        for i in 0..(SCENE_DEDUP_CAP + 10) {
            q.scene.enqueue(SceneTask {
                story_id: story.id,
                summary_text: format!("scene number {}", i),
                reason: TriggerReason::Continuation,
            });
        }
        wait_for_idle(&q).await;
        // Every distinct key executed despite the wholesale clear.
        assert_eq!(image_gen.calls(), SCENE_DEDUP_CAP + 10);
    }

    #[tokio::test]
    async fn test_manual_portrait_then_worker_skips() {
        let store = Arc::new(MemoryStoryStore::new());
        let mut story = sample_story();
        let card_id = story.add_card(CharacterCard::new("Mira", 0, Utc::now()));
        store.put(&story).await.expect("put");
        let image_gen = Arc::new(FakeImageGen::instant());

        let manual = ManualPortrait::new(image_gen.clone(), store.clone());
        manual.execute(story.id, card_id).await.expect("manual portrait");
        assert_eq!(image_gen.calls(), 1);

        let q = queues(image_gen.clone(), store.clone());
        q.portrait.enqueue(PortraitTask {
            story_id: story.id,
            card_id,
        });
        wait_for_idle(&q).await;
        // Worker saw the existing portrait and skipped without error.
        assert_eq!(image_gen.calls(), 1);
    }
}
