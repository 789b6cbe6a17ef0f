//! In-process index used for dry runs and tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::SearchIndexError;
use crate::provider::{
    FacetCounts, IndexSettings, SearchIndexProvider, SearchQuery, SearchResponse, Synonym, TaskId,
};

const TEXT_ATTRIBUTES: &[&str] = &["title", "name", "summary", "description", "location", "tags", "type"];

#[derive(Debug, Default)]
struct IndexState {
    settings: IndexSettings,
    objects: BTreeMap<String, JsonValue>,
    synonyms: BTreeMap<String, Synonym>,
    next_task: TaskId,
    clears: usize,
}

impl IndexState {
    fn task(&mut self) -> Option<TaskId> {
        self.next_task += 1;
        Some(self.next_task)
    }
}

/// Search index held in a `BTreeMap`, with naive substring matching and facet counting.
#[derive(Debug, Default)]
pub struct InMemoryIndexProvider {
    index_name: String,
    state: Mutex<IndexState>,
}

impl InMemoryIndexProvider {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            state: Mutex::new(IndexState::default()),
        }
    }

    pub async fn objects(&self) -> BTreeMap<String, JsonValue> {
        self.state.lock().await.objects.clone()
    }

    pub async fn settings(&self) -> IndexSettings {
        self.state.lock().await.settings.clone()
    }

    pub async fn synonyms(&self) -> Vec<Synonym> {
        self.state.lock().await.synonyms.values().cloned().collect()
    }

    pub async fn clear_count(&self) -> usize {
        self.state.lock().await.clears
    }
}

fn object_id(object: &JsonValue) -> Result<String, SearchIndexError> {
    object
        .get("objectID")
        .and_then(JsonValue::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| SearchIndexError::validation("object is missing objectID"))
}

fn value_matches(value: &JsonValue, expected: &str) -> bool {
    match value {
        JsonValue::String(s) => s == expected,
        JsonValue::Bool(b) => b.to_string() == expected,
        JsonValue::Number(n) => n.to_string() == expected,
        JsonValue::Array(items) => items.iter().any(|item| value_matches(item, expected)),
        _ => false,
    }
}

fn filter_matches(object: &JsonValue, filter: &str) -> bool {
    let Some((attribute, expected)) = filter.split_once(':') else {
        return false;
    };
    object
        .get(attribute)
        .is_some_and(|value| value_matches(value, expected))
}

fn text_matches(object: &JsonValue, terms: &[String]) -> bool {
    let mut haystack = String::new();
    for attribute in TEXT_ATTRIBUTES {
        match object.get(*attribute) {
            Some(JsonValue::String(s)) => haystack.push_str(s),
            Some(JsonValue::Array(items)) => {
                for item in items.iter().filter_map(JsonValue::as_str) {
                    haystack.push_str(item);
                    haystack.push(' ');
                }
            }
            _ => {}
        }
        haystack.push(' ');
    }
    let haystack = haystack.to_lowercase();
    terms.iter().all(|term| haystack.contains(term.as_str()))
}

fn facet_values(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => vec![s.clone()],
        JsonValue::Bool(b) => vec![b.to_string()],
        JsonValue::Number(n) => vec![n.to_string()],
        JsonValue::Array(items) => items.iter().flat_map(facet_values).collect(),
        _ => Vec::new(),
    }
}

fn count_facets(hits: &[&JsonValue], attributes: &[String]) -> FacetCounts {
    let mut facets = FacetCounts::new();
    for attribute in attributes {
        let mut counts = BTreeMap::new();
        for hit in hits {
            if let Some(value) = hit.get(attribute.as_str()) {
                for v in facet_values(value) {
                    *counts.entry(v).or_insert(0u64) += 1;
                }
            }
        }
        if !counts.is_empty() {
            facets.insert(attribute.clone(), counts);
        }
    }
    facets
}

#[async_trait]
impl SearchIndexProvider for InMemoryIndexProvider {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn set_settings(&self, settings: &IndexSettings) -> Result<Option<TaskId>, SearchIndexError> {
        let mut state = self.state.lock().await;
        state.settings = settings.clone();
        Ok(state.task())
    }

    async fn clear_objects(&self) -> Result<Option<TaskId>, SearchIndexError> {
        let mut state = self.state.lock().await;
        state.objects.clear();
        state.clears += 1;
        Ok(state.task())
    }

    async fn save_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        let keyed = objects
            .iter()
            .map(|o| Ok((object_id(o)?, o.clone())))
            .collect::<Result<Vec<_>, SearchIndexError>>()?;
        let mut state = self.state.lock().await;
        state.objects.extend(keyed);
        Ok(state.task())
    }

    async fn partial_update_objects(&self, objects: &[JsonValue]) -> Result<Option<TaskId>, SearchIndexError> {
        let mut state = self.state.lock().await;
        for object in objects {
            let id = object_id(object)?;
            let Some(fields) = object.as_object() else {
                continue;
            };
            let entry = state
                .objects
                .entry(id)
                .or_insert_with(|| JsonValue::Object(Default::default()));
            if let Some(target) = entry.as_object_mut() {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(state.task())
    }

    async fn delete_objects(&self, object_ids: &[String]) -> Result<Option<TaskId>, SearchIndexError> {
        let mut state = self.state.lock().await;
        for id in object_ids {
            state.objects.remove(id);
        }
        Ok(state.task())
    }

    async fn existing_object_ids(&self, object_ids: &[String]) -> Result<HashSet<String>, SearchIndexError> {
        let state = self.state.lock().await;
        Ok(object_ids
            .iter()
            .filter(|id| state.objects.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn save_synonyms(
        &self,
        synonyms: &[Synonym],
        replace_existing: bool,
    ) -> Result<Option<TaskId>, SearchIndexError> {
        let mut state = self.state.lock().await;
        if replace_existing {
            state.synonyms.clear();
        }
        for synonym in synonyms {
            state.synonyms.insert(synonym.object_id.clone(), synonym.clone());
        }
        Ok(state.task())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchIndexError> {
        let state = self.state.lock().await;
        let terms: Vec<String> = query.query.split_whitespace().map(str::to_lowercase).collect();
        let hits: Vec<&JsonValue> = state
            .objects
            .values()
            .filter(|object| text_matches(object, &terms))
            .filter(|object| {
                query
                    .facet_filters
                    .iter()
                    .all(|group| group.iter().any(|filter| filter_matches(object, filter)))
            })
            .collect();

        let hits_per_page = query.hits_per_page.max(1);
        let nb_hits = hits.len() as u64;
        let nb_pages = hits.len().div_ceil(hits_per_page as usize) as u32;
        let page_hits = hits
            .iter()
            .skip((query.page as usize).saturating_mul(hits_per_page as usize))
            .take(hits_per_page as usize)
            .map(|hit| (*hit).clone())
            .collect();

        Ok(SearchResponse {
            hits: page_hits,
            nb_hits,
            page: query.page,
            nb_pages,
            hits_per_page,
            facets: count_facets(&hits, &query.facets),
        })
    }

    async fn wait_for_task(&self, _task_id: TaskId) -> Result<(), SearchIndexError> {
        Ok(())
    }
}
