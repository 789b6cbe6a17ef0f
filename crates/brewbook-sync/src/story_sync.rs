//! Single-story index updates driven by CMS webhook events.

use std::sync::Arc;

use anyhow::{Context, Result};
use brewbook_cms::{RecordNormalizer, StorySource};
use brewbook_core::SearchRecord;
use brewbook_search::SearchIndexService;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryAction {
    Published,
    Unpublished,
    Deleted,
    Moved,
    #[serde(other)]
    Other,
}

/// Story event payload posted by the CMS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryWebhookEvent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub action: Option<StoryAction>,
    #[serde(default)]
    pub space_id: Option<u64>,
    #[serde(default)]
    pub story_id: Option<u64>,
    #[serde(default)]
    pub full_slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Upserted { object_id: String, created: bool },
    Deleted { object_id: String },
    Ignored { reason: String },
}

/// Keeps the index in step with individual story changes.
pub struct StoryIndexer {
    source: Arc<dyn StorySource>,
    index: Arc<SearchIndexService>,
    normalizer: RecordNormalizer,
}

impl StoryIndexer {
    pub fn new(source: Arc<dyn StorySource>, index: Arc<SearchIndexService>) -> Self {
        Self {
            source,
            index,
            normalizer: RecordNormalizer::new(),
        }
    }

    pub async fn sync_story_event(&self, event: &StoryWebhookEvent) -> Result<SyncOutcome> {
        let Some(story_id) = event.story_id else {
            return Ok(SyncOutcome::Ignored {
                reason: "event has no story_id".to_string(),
            });
        };

        let outcome = match event.action {
            Some(StoryAction::Published | StoryAction::Moved) => self.upsert_story(story_id).await?,
            Some(StoryAction::Unpublished | StoryAction::Deleted) => self.remove_story(story_id).await?,
            Some(StoryAction::Other) | None => SyncOutcome::Ignored {
                reason: "unsupported action".to_string(),
            },
        };
        info!(story_id, ?outcome, "story event synced");
        Ok(outcome)
    }

    async fn upsert_story(&self, story_id: u64) -> Result<SyncOutcome> {
        let story = self
            .source
            .fetch_story(story_id)
            .await
            .with_context(|| format!("fetching story {story_id}"))?;
        let Some(story) = story else {
            info!(story_id, "story no longer available; removing record");
            return self.remove_story(story_id).await;
        };

        let record = match self.normalizer.normalize_story(&story) {
            Ok(Some(record)) => record,
            Ok(None) => return self.remove_story(story_id).await,
            Err(err) => {
                warn!(story_id, error = %err, "story failed to normalize; removing record");
                return self.remove_story(story_id).await;
            }
        };

        let object_id = record.object_id.clone();
        let outcome = self
            .index
            .save_objects(vec![record], false)
            .await
            .with_context(|| format!("indexing {object_id}"))?;
        if outcome.indexed == 0 {
            warn!(story_id, %object_id, "story is missing required fields; removing record");
            return self.remove_story(story_id).await;
        }
        Ok(SyncOutcome::Upserted {
            object_id,
            created: outcome.created > 0,
        })
    }

    async fn remove_story(&self, story_id: u64) -> Result<SyncOutcome> {
        let object_id = SearchRecord::object_id_for_story(story_id);
        self.index
            .delete(std::slice::from_ref(&object_id))
            .await
            .with_context(|| format!("deleting {object_id}"))?;
        Ok(SyncOutcome::Deleted { object_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brewbook_cms::FixtureStorySource;
    use brewbook_search::InMemoryIndexProvider;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn event(action: &str, story_id: u64) -> StoryWebhookEvent {
        serde_json::from_value(json!({
            "text": "The user published the story",
            "action": action,
            "space_id": 42,
            "story_id": story_id,
        }))
        .unwrap()
    }

    fn indexer() -> (StoryIndexer, Arc<InMemoryIndexProvider>) {
        let provider = Arc::new(InMemoryIndexProvider::new("brewbook_test"));
        let index = Arc::new(SearchIndexService::new(Box::new(provider.clone())));
        let source = Arc::new(FixtureStorySource::new(crate::tests::fixture_path()));
        (StoryIndexer::new(source, index), provider)
    }

    #[test]
    fn unknown_actions_deserialize_as_other() {
        assert_eq!(event("released", 1).action, Some(StoryAction::Other));
        assert_eq!(event("moved", 1).action, Some(StoryAction::Moved));
    }

    #[tokio::test]
    async fn published_story_is_created_then_updated() {
        let (indexer, provider) = indexer();

        let first = indexer.sync_story_event(&event("published", 1001)).await.unwrap();
        assert_eq!(
            first,
            SyncOutcome::Upserted {
                object_id: "story_1001".into(),
                created: true
            }
        );
        let second = indexer.sync_story_event(&event("published", 1001)).await.unwrap();
        assert_eq!(
            second,
            SyncOutcome::Upserted {
                object_id: "story_1001".into(),
                created: false
            }
        );
        assert!(provider.objects().await.contains_key("story_1001"));
    }

    #[tokio::test]
    async fn deleted_and_irrelevant_stories_are_removed() {
        let (indexer, provider) = indexer();
        indexer.sync_story_event(&event("published", 1012)).await.unwrap();
        assert_eq!(provider.objects().await.len(), 1);

        let removed = indexer.sync_story_event(&event("unpublished", 1012)).await.unwrap();
        assert_eq!(
            removed,
            SyncOutcome::Deleted {
                object_id: "story_1012".into()
            }
        );
        assert!(provider.objects().await.is_empty());

        // the home page carries no indexable component
        let home = indexer.sync_story_event(&event("published", 2001)).await.unwrap();
        assert!(matches!(home, SyncOutcome::Deleted { .. }));

        let missing = indexer.sync_story_event(&event("moved", 999_999)).await.unwrap();
        assert!(matches!(missing, SyncOutcome::Deleted { .. }));
    }

    #[tokio::test]
    async fn events_without_story_or_action_are_ignored() {
        let (indexer, provider) = indexer();
        let no_story = StoryWebhookEvent {
            action: Some(StoryAction::Published),
            ..Default::default()
        };
        assert!(matches!(
            indexer.sync_story_event(&no_story).await.unwrap(),
            SyncOutcome::Ignored { .. }
        ));
        assert!(matches!(
            indexer.sync_story_event(&event("branch_deployed", 1001)).await.unwrap(),
            SyncOutcome::Ignored { .. }
        ));
        assert!(provider.objects().await.is_empty());
    }

    #[tokio::test]
    async fn story_that_loses_its_title_is_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stories.json");
        let write_cafe = |name: &str, title: &str| {
            let stories = json!({"stories": [{
                "id": 3001,
                "name": name,
                "slug": "corner-cafe",
                "content": {"component": "page", "body": [{"component": "cafe", "title": title}]}
            }]});
            fs::write(&path, stories.to_string()).unwrap();
        };

        let provider = Arc::new(InMemoryIndexProvider::new("brewbook_test"));
        let index = Arc::new(SearchIndexService::new(Box::new(provider.clone())));
        let indexer = StoryIndexer::new(Arc::new(FixtureStorySource::new(path.clone())), index);

        write_cafe("Corner Cafe", "Corner Cafe");
        indexer.sync_story_event(&event("published", 3001)).await.unwrap();
        assert!(provider.objects().await.contains_key("story_3001"));

        write_cafe("", " ");
        let outcome = indexer.sync_story_event(&event("moved", 3001)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Deleted {
                object_id: "story_3001".into()
            }
        );
        assert!(provider.objects().await.is_empty());
    }
}
