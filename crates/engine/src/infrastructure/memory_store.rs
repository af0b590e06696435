//! In-memory story store.
//!
//! The durable backend is an external collaborator; this adapter satisfies
//! the get/put contract for development and testing. Read-after-write
//! consistency for a single caller falls out of the map semantics.

use async_trait::async_trait;
use dashmap::DashMap;
use taleweaver_domain::{Story, StoryId};

use crate::infrastructure::ports::{StoreError, StoryStore};

#[derive(Default)]
pub struct MemoryStoryStore {
    stories: DashMap<StoryId, Story>,
}

impl MemoryStoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoryStore for MemoryStoryStore {
    async fn get(&self, id: StoryId) -> Result<Option<Story>, StoreError> {
        Ok(self.stories.get(&id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, story: &Story) -> Result<(), StoreError> {
        self.stories.insert(story.id, story.clone());
        Ok(())
    }
}
