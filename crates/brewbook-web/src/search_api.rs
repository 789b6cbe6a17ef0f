//! Faceted, paged search over the index for the public site.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use brewbook_search::{facet_chips, FacetChip, FacetSelection, SearchQuery, FACET_ATTRIBUTES};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::AppState;

pub const DEFAULT_HITS_PER_PAGE: u32 = 6;
pub const MAX_HITS_PER_PAGE: u32 = 50;
/// Algolia only paginates through the first 1000 pages.
pub const MAX_PAGE: u32 = 999;

/// Query string of `GET /api/search`. List filters take comma-separated values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub work_friendly: Option<String>,
    pub noise: Option<String>,
    pub price: Option<String>,
    pub tag: Option<String>,
    pub page: Option<u32>,
    pub hits_per_page: Option<u32>,
}

impl SearchParams {
    pub fn selection(&self) -> FacetSelection {
        let mut selection = FacetSelection::default();
        for value in list(&self.kind) {
            selection.types.insert(value);
        }
        for value in list(&self.noise) {
            selection.noise_levels.insert(value);
        }
        for value in list(&self.price) {
            selection.price_ranges.insert(value);
        }
        for value in list(&self.tag) {
            selection.tags.insert(value);
        }
        selection.work_friendly = self
            .work_friendly
            .as_deref()
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"));
        selection
    }

    pub fn to_query(&self, selection: &FacetSelection) -> SearchQuery {
        SearchQuery {
            query: self.q.as_deref().unwrap_or_default().trim().to_string(),
            facet_filters: selection.to_facet_filters(),
            facets: FACET_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            page: self.page.unwrap_or(0).min(MAX_PAGE),
            hits_per_page: self
                .hits_per_page
                .unwrap_or(DEFAULT_HITS_PER_PAGE)
                .clamp(1, MAX_HITS_PER_PAGE),
        }
    }
}

fn list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub title: String,
    pub summary: String,
    pub image: Option<String>,
    pub metadata: Vec<String>,
    #[serde(rename = "type")]
    pub record_type: String,
    pub slug: String,
    pub address: Option<String>,
    #[serde(rename = "_geoloc")]
    pub geoloc: Option<JsonValue>,
}

fn non_empty_str<'a>(hit: &'a JsonValue, key: &str) -> Option<&'a str> {
    hit.get(key).and_then(JsonValue::as_str).filter(|s| !s.trim().is_empty())
}

fn string_list(hit: &JsonValue, key: &str) -> Vec<String> {
    hit.get(key)
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().filter_map(JsonValue::as_str).map(ToString::to_string).collect())
        .unwrap_or_default()
}

impl SearchHit {
    /// Card fields of one raw hit, with the fallbacks the cards use.
    pub fn from_hit(hit: &JsonValue) -> Self {
        let text = |key: &str| non_empty_str(hit, key).map(ToString::to_string);
        let metadata = match string_list(hit, "metadata") {
            metadata if !metadata.is_empty() => metadata,
            _ => string_list(hit, "tags"),
        };
        Self {
            object_id: text("objectID").unwrap_or_default(),
            title: text("title").unwrap_or_default(),
            summary: text("summary").or_else(|| text("short_summary")).unwrap_or_default(),
            image: text("image").or_else(|| text("hero_image")),
            metadata,
            record_type: text("type").unwrap_or_default(),
            slug: text("slug").unwrap_or_default(),
            address: text("address"),
            geoloc: hit.get("_geoloc").filter(|v| !v.is_null()).cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub nb_hits: u64,
    pub page: u32,
    pub nb_pages: u32,
    pub is_last_page: bool,
    pub facets: Vec<FacetChip>,
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Search is temporarily unavailable" })),
    )
        .into_response()
}

pub(crate) async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    let Some(search) = state.search.as_ref() else {
        return unavailable();
    };

    let selection = params.selection();
    let query = params.to_query(&selection);
    match search.search(&query).await {
        Ok(response) => {
            let page = SearchPage {
                hits: response.hits.iter().map(SearchHit::from_hit).collect(),
                nb_hits: response.nb_hits,
                page: response.page,
                nb_pages: response.nb_pages,
                is_last_page: response.page.saturating_add(1) >= response.nb_pages,
                facets: facet_chips(&response.facets, &selection),
            };
            Json(page).into_response()
        }
        Err(err) => {
            warn!(error = %err, query = %query.query, "search request failed");
            unavailable()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_build_filters_and_clamp_page_size() {
        let params = SearchParams {
            q: Some("  flat white ".into()),
            kind: Some("cafe".into()),
            work_friendly: Some("true".into()),
            noise: Some("quiet, moderate".into()),
            hits_per_page: Some(500),
            ..Default::default()
        };
        let selection = params.selection();
        let query = params.to_query(&selection);
        assert_eq!(query.query, "flat white");
        assert_eq!(query.hits_per_page, MAX_HITS_PER_PAGE);
        assert_eq!(query.page, 0);
        assert_eq!(
            query.facet_filters,
            vec![
                vec!["type:cafe".to_string()],
                vec!["wifi:true".to_string()],
                vec!["power_outlets:true".to_string()],
                vec!["noise_level:moderate".to_string(), "noise_level:quiet".to_string()],
            ]
        );

        let defaults = SearchParams::default();
        assert_eq!(defaults.to_query(&defaults.selection()).hits_per_page, DEFAULT_HITS_PER_PAGE);
        let zero = SearchParams {
            hits_per_page: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.to_query(&zero.selection()).hits_per_page, 1);

        let far = SearchParams {
            page: Some(u32::MAX),
            ..Default::default()
        };
        assert_eq!(far.to_query(&far.selection()).page, MAX_PAGE);
    }

    #[test]
    fn hits_fall_back_to_secondary_fields() {
        let hit = SearchHit::from_hit(&json!({
            "objectID": "story_7",
            "title": "Night Market Tasting",
            "summary": "",
            "short_summary": "Six roasters, one evening.",
            "hero_image": "https://a.example/hero.jpg",
            "tags": ["tasting"],
            "metadata": [],
            "type": "event",
            "slug": "night-market-tasting",
            "_geoloc": null
        }));
        assert_eq!(hit.summary, "Six roasters, one evening.");
        assert_eq!(hit.image.as_deref(), Some("https://a.example/hero.jpg"));
        assert_eq!(hit.metadata, vec!["tasting".to_string()]);
        assert!(hit.geoloc.is_none());
        assert!(hit.address.is_none());
    }
}
