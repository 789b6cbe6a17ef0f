//! Provider seam between the index service and a concrete search backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::SearchIndexError;

pub type IndexSettings = JsonMap<String, JsonValue>;

pub type TaskId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synonym {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(rename = "type", default = "Synonym::default_kind")]
    pub kind: String,
    pub synonyms: Vec<String>,
}

impl Synonym {
    pub fn new(object_id: &str, synonyms: &[&str]) -> Self {
        Self {
            object_id: object_id.to_string(),
            kind: Self::default_kind(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn default_kind() -> String {
        "synonym".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facet_filters: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<String>,
    pub page: u32,
    pub hits_per_page: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            facet_filters: Vec::new(),
            facets: Vec::new(),
            page: 0,
            hits_per_page: 20,
        }
    }
}

pub type FacetCounts = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Vec<JsonValue>,
    #[serde(default)]
    pub nb_hits: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub nb_pages: u32,
    #[serde(default)]
    pub hits_per_page: u32,
    #[serde(default)]
    pub facets: FacetCounts,
}

/// Backend operations the index service is built on. Writes return the task id
/// when applied asynchronously; [`SearchIndexProvider::wait_for_task`] waits on it.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    fn index_name(&self) -> &str;

    async fn set_settings(&self, settings: &IndexSettings) -> Result<Option<TaskId>, SearchIndexError>;

    async fn clear_objects(&self) -> Result<Option<TaskId>, SearchIndexError>;

    async fn save_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError>;

    async fn partial_update_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError>;

    async fn delete_objects(&self, object_ids: &[String]) -> Result<Option<TaskId>, SearchIndexError>;

    /// The subset of `object_ids` already present in the index.
    async fn existing_object_ids(&self, object_ids: &[String]) -> Result<HashSet<String>, SearchIndexError>;

    async fn save_synonyms(
        &self,
        synonyms: &[Synonym],
        replace_existing: bool,
    ) -> Result<Option<TaskId>, SearchIndexError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchIndexError>;

    async fn wait_for_task(&self, task_id: TaskId) -> Result<(), SearchIndexError>;
}

#[async_trait]
impl<P: SearchIndexProvider + ?Sized> SearchIndexProvider for Arc<P> {
    fn index_name(&self) -> &str {
        (**self).index_name()
    }

    async fn set_settings(&self, settings: &IndexSettings) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).set_settings(settings).await
    }

    async fn clear_objects(&self) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).clear_objects().await
    }

    async fn save_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).save_objects(objects).await
    }

    async fn partial_update_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).partial_update_objects(objects).await
    }

    async fn delete_objects(&self, object_ids: &[String]) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).delete_objects(object_ids).await
    }

    async fn existing_object_ids(&self, object_ids: &[String]) -> Result<HashSet<String>, SearchIndexError> {
        (**self).existing_object_ids(object_ids).await
    }

    async fn save_synonyms(
        &self,
        synonyms: &[Synonym],
        replace_existing: bool,
    ) -> Result<Option<TaskId>, SearchIndexError> {
        (**self).save_synonyms(synonyms, replace_existing).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchIndexError> {
        (**self).search(query).await
    }

    async fn wait_for_task(&self, task_id: TaskId) -> Result<(), SearchIndexError> {
        (**self).wait_for_task(task_id).await
    }
}
