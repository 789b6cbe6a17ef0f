//! High-level index operations with record validation and upsert bookkeeping.

use std::collections::HashSet;

use brewbook_core::SearchRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{error, info, warn};

use crate::error::SearchIndexError;
use crate::provider::{IndexSettings, SearchIndexProvider, SearchQuery, SearchResponse, Synonym, TaskId};
use crate::settings::{default_index_settings, merge_settings};

const REQUIRED_FIELDS: &[&str] = &["objectID", "title", "slug", "type"];

#[derive(Debug, Clone)]
pub struct SearchIndexServiceConfig {
    pub batch_size: usize,
    pub wait_for_tasks: bool,
}

impl Default for SearchIndexServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            wait_for_tasks: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub index: usize,
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<SearchRecord>,
    pub errors: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingOutcome {
    pub indexed: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub task_ids: Vec<TaskId>,
}

pub struct SearchIndexService {
    provider: Box<dyn SearchIndexProvider>,
    config: SearchIndexServiceConfig,
}

impl SearchIndexService {
    pub fn new(provider: Box<dyn SearchIndexProvider>) -> Self {
        Self::with_config(provider, SearchIndexServiceConfig::default())
    }

    pub fn with_config(provider: Box<dyn SearchIndexProvider>, config: SearchIndexServiceConfig) -> Self {
        Self { provider, config }
    }

    pub fn index_name(&self) -> &str {
        self.provider.index_name()
    }

    pub fn provider(&self) -> &dyn SearchIndexProvider {
        self.provider.as_ref()
    }

    async fn settle(&self, task: Option<TaskId>) -> Result<Option<TaskId>, SearchIndexError> {
        if let (true, Some(task_id)) = (self.config.wait_for_tasks, task) {
            self.provider.wait_for_task(task_id).await?;
        }
        Ok(task)
    }

    /// Applies the default settings with `custom` keys layered on top.
    pub async fn configure_index(&self, custom: &IndexSettings) -> Result<IndexSettings, SearchIndexError> {
        info!(index = self.index_name(), "configuring search index");
        let settings = merge_settings(default_index_settings(), custom);
        match self.provider.set_settings(&settings).await {
            Ok(task) => {
                self.settle(task).await?;
                info!(index = self.index_name(), "index configuration completed");
                Ok(settings)
            }
            Err(err) => {
                error!(index = self.index_name(), error = %err, "failed to configure index");
                Err(err)
            }
        }
    }

    pub async fn apply_synonyms(&self, synonyms: &[Synonym], replace_existing: bool) -> Result<(), SearchIndexError> {
        info!(count = synonyms.len(), replace_existing, "applying synonyms");
        let task = self
            .provider
            .save_synonyms(synonyms, replace_existing)
            .await
            .inspect_err(|err| error!(error = %err, "failed to apply synonyms"))?;
        self.settle(task).await?;
        Ok(())
    }

    pub async fn clear_index(&self) -> Result<(), SearchIndexError> {
        info!(index = self.index_name(), "clearing existing index data");
        let task = self
            .provider
            .clear_objects()
            .await
            .inspect_err(|err| error!(error = %err, "failed to clear index"))?;
        self.settle(task).await?;
        info!(index = self.index_name(), "index cleared");
        Ok(())
    }

    pub fn validate_objects(&self, records: Vec<SearchRecord>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for (index, record) in records.into_iter().enumerate() {
            let missing: Vec<String> = REQUIRED_FIELDS
                .iter()
                .zip([&record.object_id, &record.title, &record.slug, &record.record_type])
                .filter(|(_, value)| value.trim().is_empty())
                .map(|(field, _)| field.to_string())
                .collect();
            if missing.is_empty() {
                outcome.valid.push(record);
            } else {
                let object_id = if record.object_id.is_empty() {
                    "unknown".to_string()
                } else {
                    record.object_id.clone()
                };
                outcome.errors.push(ValidationIssue {
                    index,
                    object_id,
                    missing_fields: missing,
                });
            }
        }
        if !outcome.errors.is_empty() {
            warn!(
                failed = outcome.errors.len(),
                issues = ?outcome.errors,
                "objects failed validation"
            );
        }
        outcome
    }

    /// Validates and writes records, tracking which ones were new to the index.
    ///
    /// With `replace_all` the index is cleared first and every record counts as created.
    pub async fn save_objects(
        &self,
        records: Vec<SearchRecord>,
        replace_all: bool,
    ) -> Result<IndexingOutcome, SearchIndexError> {
        let total = records.len();
        let ValidationOutcome { valid, errors } = self.validate_objects(records);
        let mut outcome = IndexingOutcome {
            skipped: errors.len(),
            ..Default::default()
        };
        if valid.is_empty() {
            warn!(total, "no valid records to index");
            return Ok(outcome);
        }

        let ids: Vec<String> = valid.iter().map(|r| r.object_id.clone()).collect();
        let existing = if replace_all {
            self.clear_index().await?;
            HashSet::new()
        } else {
            self.provider
                .existing_object_ids(&ids)
                .await
                .inspect_err(|err| error!(error = %err, "failed to look up existing objects"))?
        };
        outcome.updated = ids.iter().filter(|id| existing.contains(*id)).count();
        outcome.created = valid.len() - outcome.updated;

        info!(count = valid.len(), replace_all, "indexing records");
        let batch_size = self.config.batch_size.max(1);
        for chunk in valid.chunks(batch_size) {
            let objects = chunk
                .iter()
                .map(SearchRecord::to_json)
                .collect::<Result<Vec<_>, _>>()?;
            let task = self
                .provider
                .save_objects(&objects)
                .await
                .inspect_err(|err| error!(error = %err, "failed to save objects to index"))?;
            if let Some(task_id) = self.settle(task).await? {
                outcome.task_ids.push(task_id);
            }
            outcome.indexed += chunk.len();
        }

        info!(
            indexed = outcome.indexed,
            created = outcome.created,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "records indexed"
        );
        Ok(outcome)
    }

    /// Merges `fields` into one object, creating it when absent.
    pub async fn partial_update(
        &self,
        object_id: &str,
        mut fields: JsonMap<String, JsonValue>,
    ) -> Result<Option<TaskId>, SearchIndexError> {
        if object_id.trim().is_empty() {
            return Err(SearchIndexError::validation("objectID is required"));
        }
        fields.insert("objectID".into(), JsonValue::String(object_id.to_string()));
        let task = self
            .provider
            .partial_update_objects(&[JsonValue::Object(fields)])
            .await?;
        self.settle(task).await
    }

    pub async fn delete(&self, object_ids: &[String]) -> Result<Option<TaskId>, SearchIndexError> {
        if object_ids.is_empty() {
            return Ok(None);
        }
        if object_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SearchIndexError::validation("objectID is required"));
        }
        info!(count = object_ids.len(), "deleting objects");
        let task = self.provider.delete_objects(object_ids).await?;
        self.settle(task).await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchIndexError> {
        self.provider.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndexProvider;
    use serde_json::json;
    use std::sync::Arc;

    fn service_with(batch_size: usize) -> (SearchIndexService, Arc<InMemoryIndexProvider>) {
        let index = Arc::new(InMemoryIndexProvider::new("brewbook"));
        let service = SearchIndexService::with_config(
            Box::new(index.clone()),
            SearchIndexServiceConfig {
                batch_size,
                wait_for_tasks: true,
            },
        );
        (service, index)
    }

    fn record(id: u64, title: &str) -> SearchRecord {
        SearchRecord {
            object_id: SearchRecord::object_id_for_story(id),
            story_id: id,
            slug: format!("slug-{id}"),
            record_type: "cafe".into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn validation_reports_missing_fields() {
        let (service, _) = service_with(10);
        let mut broken = record(2, "");
        broken.slug.clear();
        let nameless = SearchRecord {
            title: "x".into(),
            ..Default::default()
        };

        let outcome = service.validate_objects(vec![record(1, "Ok"), broken, nameless]);
        assert_eq!(outcome.valid.len(), 1);
        assert_eq!(
            outcome.errors[0],
            ValidationIssue {
                index: 1,
                object_id: "story_2".into(),
                missing_fields: vec!["title".into(), "slug".into()],
            }
        );
        assert_eq!(outcome.errors[1].object_id, "unknown");
        assert_eq!(outcome.errors[1].missing_fields, vec!["objectID", "slug", "type"]);
    }

    #[tokio::test]
    async fn upsert_counts_created_and_updated() {
        let (service, index) = service_with(2);
        let first = service
            .save_objects(vec![record(1, "A"), record(2, "B")], false)
            .await
            .unwrap();
        assert_eq!((first.created, first.updated), (2, 0));

        let second = service
            .save_objects(vec![record(2, "B2"), record(3, "C"), record(4, ""), record(5, "E")], false)
            .await
            .unwrap();
        assert_eq!(second.indexed, 3);
        assert_eq!(second.skipped, 1);
        assert_eq!((second.created, second.updated), (2, 1));
        assert_eq!(second.task_ids.len(), 2);
        assert_eq!(index.objects().await["story_2"]["title"], "B2");
        assert_eq!(index.clear_count().await, 0);
    }

    #[tokio::test]
    async fn replace_all_clears_first_and_counts_everything_created() {
        let (service, index) = service_with(1000);
        service.save_objects(vec![record(1, "Old")], false).await.unwrap();

        let outcome = service.save_objects(vec![record(2, "New")], true).await.unwrap();
        assert_eq!((outcome.created, outcome.updated), (1, 0));
        let objects = index.objects().await;
        assert!(!objects.contains_key("story_1"));
        assert_eq!(index.clear_count().await, 1);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let (service, index) = service_with(1000);
        let outcome = service.save_objects(Vec::new(), true).await.unwrap();
        assert_eq!(outcome, IndexingOutcome::default());
        assert_eq!(index.clear_count().await, 0);
    }

    #[tokio::test]
    async fn configure_merges_custom_settings() {
        let (service, index) = service_with(1000);
        let mut custom = IndexSettings::new();
        custom.insert("maxValuesPerFacet".into(), json!(50));
        service.configure_index(&custom).await.unwrap();
        let settings = index.settings().await;
        assert_eq!(settings["maxValuesPerFacet"], 50);
        assert_eq!(settings["minWordSizefor1Typo"], 4);
    }

    #[tokio::test]
    async fn partial_update_and_delete_validate_ids() {
        let (service, index) = service_with(1000);
        let mut fields = JsonMap::new();
        fields.insert("rating".into(), json!(4.0));
        service.partial_update("story_7", fields.clone()).await.unwrap();
        assert_eq!(index.objects().await["story_7"]["rating"], 4.0);

        assert!(service.partial_update(" ", fields).await.is_err());
        assert!(service.delete(&["".to_string()]).await.is_err());

        service.delete(&["story_7".to_string()]).await.unwrap();
        assert!(index.objects().await.is_empty());
    }
}
