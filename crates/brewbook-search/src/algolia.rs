//! Algolia REST provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brewbook_storage::{HttpFetcher, HttpRequest};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;
use url::Url;

use crate::error::SearchIndexError;
use crate::provider::{IndexSettings, SearchIndexProvider, SearchQuery, SearchResponse, Synonym, TaskId};

const UPSTREAM: &str = "algolia";
/// Object ids per multi-get request.
const LOOKUP_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct AlgoliaConfig {
    pub app_id: String,
    pub api_key: String,
    pub index_name: String,
    /// Overrides `https://{app_id}.algolia.net`.
    pub host: Option<String>,
    pub task_poll_interval: Duration,
    pub task_poll_attempts: u32,
}

impl AlgoliaConfig {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            index_name: index_name.into(),
            host: None,
            task_poll_interval: Duration::from_millis(250),
            task_poll_attempts: 120,
        }
    }

    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("https://{}.algolia.net", self.app_id),
        }
    }
}

impl std::fmt::Debug for AlgoliaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgoliaConfig")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .field("index_name", &self.index_name)
            .field("host", &self.host)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(rename = "taskID")]
    task_id: Option<TaskId>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct MultiGetResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct AlgoliaProvider {
    config: AlgoliaConfig,
    http: Arc<HttpFetcher>,
}

impl AlgoliaProvider {
    pub fn new(config: AlgoliaConfig, http: Arc<HttpFetcher>) -> Self {
        Self { config, http }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchIndexError> {
        let base = self.config.base_url();
        let mut url = Url::parse(&base)
            .map_err(|e| SearchIndexError::configuration(format!("invalid Algolia host {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SearchIndexError::configuration(format!("Algolia host {base} cannot carry a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn index_url(&self, action: &[&str]) -> Result<Url, SearchIndexError> {
        let mut segments = vec!["1", "indexes", self.config.index_name.as_str()];
        segments.extend_from_slice(action);
        self.url(&segments)
    }

    async fn call(&self, method: Method, url: Url, body: Option<JsonValue>) -> Result<JsonValue, SearchIndexError> {
        let mut request = HttpRequest::new(method, url.as_str())
            .header("X-Algolia-Application-Id", self.config.app_id.as_str())
            .header("X-Algolia-API-Key", self.config.api_key.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = self.http.send(UPSTREAM, request).await?;
        Ok(resp.json()?)
    }

    async fn write(&self, method: Method, url: Url, body: Option<JsonValue>) -> Result<Option<TaskId>, SearchIndexError> {
        let value = self.call(method, url, body).await?;
        let task: TaskResponse = serde_json::from_value(value)
            .map_err(|e| SearchIndexError::parse(format!("task response: {e}")))?;
        Ok(task.task_id)
    }

    async fn batch(&self, action: &str, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        if objects.is_empty() {
            return Ok(None);
        }
        let requests: Vec<JsonValue> = objects
            .iter()
            .map(|body| json!({"action": action, "body": body}))
            .collect();
        debug!(action, count = requests.len(), index = %self.config.index_name, "sending batch");
        self.write(Method::POST, self.index_url(&["batch"])?, Some(json!({"requests": requests})))
            .await
    }
}

#[async_trait]
impl SearchIndexProvider for AlgoliaProvider {
    fn index_name(&self) -> &str {
        &self.config.index_name
    }

    async fn set_settings(&self, settings: &IndexSettings) -> Result<Option<TaskId>, SearchIndexError> {
        let body = JsonValue::Object(settings.clone());
        self.write(Method::PUT, self.index_url(&["settings"])?, Some(body)).await
    }

    async fn clear_objects(&self) -> Result<Option<TaskId>, SearchIndexError> {
        self.write(Method::POST, self.index_url(&["clear"])?, None).await
    }

    async fn save_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        self.batch("addObject", objects).await
    }

    async fn partial_update_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        self.batch("partialUpdateObject", objects).await
    }

    async fn delete_objects(&self, object_ids: &[String]) -> Result<Option<TaskId>, SearchIndexError> {
        let bodies: Vec<JsonValue> = object_ids.iter().map(|id| json!({"objectID": id})).collect();
        self.batch("deleteObject", &bodies).await
    }

    async fn existing_object_ids(&self, object_ids: &[String]) -> Result<HashSet<String>, SearchIndexError> {
        let mut found = HashSet::new();
        for chunk in object_ids.chunks(LOOKUP_CHUNK) {
            let requests: Vec<JsonValue> = chunk
                .iter()
                .map(|id| {
                    json!({
                        "indexName": self.config.index_name,
                        "objectID": id,
                        "attributesToRetrieve": ["objectID"],
                    })
                })
                .collect();
            let value = self
                .call(
                    Method::POST,
                    self.url(&["1", "indexes", "*", "objects"])?,
                    Some(json!({"requests": requests})),
                )
                .await?;
            let response: MultiGetResponse = serde_json::from_value(value)
                .map_err(|e| SearchIndexError::parse(format!("objects response: {e}")))?;
            found.extend(
                response
                    .results
                    .iter()
                    .filter_map(|hit| hit.get("objectID").and_then(JsonValue::as_str))
                    .map(ToString::to_string),
            );
        }
        Ok(found)
    }

    async fn save_synonyms(
        &self,
        synonyms: &[Synonym],
        replace_existing: bool,
    ) -> Result<Option<TaskId>, SearchIndexError> {
        let mut url = self.index_url(&["synonyms", "batch"])?;
        url.query_pairs_mut()
            .append_pair("replaceExistingSynonyms", if replace_existing { "true" } else { "false" });
        let body = serde_json::to_value(synonyms)?;
        self.write(Method::POST, url, Some(body)).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchIndexError> {
        let body = serde_json::to_value(query)?;
        let value = self.call(Method::POST, self.index_url(&["query"])?, Some(body)).await?;
        serde_json::from_value(value).map_err(|e| SearchIndexError::parse(format!("search response: {e}")))
    }

    async fn wait_for_task(&self, task_id: TaskId) -> Result<(), SearchIndexError> {
        let task = task_id.to_string();
        let attempts = self.config.task_poll_attempts.max(1);
        for attempt in 0..attempts {
            let value = self
                .call(Method::GET, self.index_url(&["task", task.as_str()])?, None)
                .await?;
            let status: TaskStatus = serde_json::from_value(value)
                .map_err(|e| SearchIndexError::parse(format!("task status: {e}")))?;
            if status.status == "published" {
                return Ok(());
            }
            debug!(task_id, attempt, status = %status.status, "task not yet published");
            tokio::time::sleep(self.config.task_poll_interval).await;
        }
        Err(SearchIndexError::TaskTimeout { task_id, attempts })
    }
}
