//! Story → search record normalization.
//!
//! Cafe and event components arrive in several shapes (legacy `name`/`image`
//! fields next to the newer `title`/`hero_image` schema, nested `metadata`
//! blocks, coordinates as `"lat,lng"` strings or numbers). Everything here is
//! pure: the same story always yields the same record.

use brewbook_core::{parse_unix_timestamp, GeoPoint, RecordKind, SearchRecord, Story};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::richtext::{create_summary, extract_plain_text};

pub const SUMMARY_MAX_LEN: usize = 150;

const IGNORED_TAGS: &[&str] = &["test", "demo"];

const AMENITY_FLAGS: &[(&str, &str)] = &[
    ("wifi", "wifi"),
    ("power_outlets", "power outlets"),
    ("outdoor_seating", "outdoor seating"),
    ("pet_friendly", "pet friendly"),
];

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("story has no id")]
    MissingId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<SearchRecord>,
    pub stats: NormalizationStats,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// `Ok(None)` means the story carries no component this pipeline indexes.
    pub fn normalize_story(&self, story: &Story) -> Result<Option<SearchRecord>, NormalizeError> {
        let Some((kind, fields)) = main_content_component(story) else {
            let unknown = unknown_components(story);
            if !unknown.is_empty() {
                warn!(story_id = story.id_or_zero(), components = ?unknown, "no handler for component type");
            }
            return Ok(None);
        };

        let story_id = match story.id {
            Some(id) if id != 0 => id,
            _ => return Err(NormalizeError::MissingId),
        };

        let mut record = base_record(story, story_id, kind);
        match kind {
            RecordKind::Cafe => fill_cafe(&mut record, story, &fields),
            RecordKind::Event => fill_event(&mut record, story, &fields),
        }
        record.geoloc = derive_geoloc(story, &fields);
        Ok(Some(record))
    }

    pub fn normalize_stories(&self, stories: &[Story]) -> NormalizedBatch {
        info!(count = stories.len(), "normalizing stories");
        let mut batch = NormalizedBatch::default();
        for story in stories {
            match self.normalize_story(story) {
                Ok(Some(record)) => {
                    batch.records.push(record);
                    batch.stats.processed += 1;
                }
                Ok(None) => batch.stats.skipped += 1,
                Err(err) => {
                    batch.stats.errors += 1;
                    error!(story_id = story.id_or_zero(), error = %err, "failed to normalize story");
                }
            }
        }
        info!(
            processed = batch.stats.processed,
            skipped = batch.stats.skipped,
            errors = batch.stats.errors,
            "normalization complete"
        );
        batch
    }
}

/// Picks the block the record is built from: the first body block with a
/// known component, else the root content when it is itself a known component.
pub fn main_content_component(story: &Story) -> Option<(RecordKind, JsonMap<String, JsonValue>)> {
    let content = story.content.as_ref()?;
    if let Some(blocks) = content.body_blocks() {
        for block in blocks.iter().filter_map(JsonValue::as_object) {
            let component = block.get("component").and_then(JsonValue::as_str);
            match component.map(|c| (c, RecordKind::from_component(c))) {
                Some((_, Some(kind))) => return Some((kind, block.clone())),
                Some((name, None)) if name != "page" => {
                    debug!(story_id = story.id_or_zero(), component = name, "skipping block");
                }
                _ => {}
            }
        }
    }
    let kind = RecordKind::from_component(content.component.as_deref()?)?;
    Some((kind, content.to_block()))
}

/// Components a skipped story carries that no handler claims. `page` is the
/// layout wrapper and never counts.
fn unknown_components(story: &Story) -> Vec<String> {
    let Some(content) = story.content.as_ref() else {
        return Vec::new();
    };
    let in_body = story
        .body_blocks()
        .into_iter()
        .flatten()
        .filter_map(|block| block.get("component").and_then(JsonValue::as_str));
    content
        .component
        .as_deref()
        .into_iter()
        .chain(in_body)
        .filter(|name| *name != "page")
        .map(ToString::to_string)
        .collect()
}

fn base_record(story: &Story, story_id: u64, kind: RecordKind) -> SearchRecord {
    SearchRecord {
        object_id: SearchRecord::object_id_for_story(story_id),
        story_id,
        slug: story.slug_str().to_string(),
        record_type: kind.as_str().to_string(),
        published_at: story.published_at.clone(),
        created_at: story.created_at.clone(),
        published_at_timestamp: story.published_at.as_deref().and_then(parse_unix_timestamp),
        ..Default::default()
    }
}

fn fill_cafe(record: &mut SearchRecord, story: &Story, fields: &JsonMap<String, JsonValue>) {
    let title = first_text(fields, &["name", "title"]).or_else(|| story_name(story));
    record.title = title.clone().unwrap_or_default();
    record.name = title;

    record.address = str_field(fields, "address");
    record.city = str_field(fields, "city");
    record.location = str_field(fields, "location").unwrap_or_else(|| {
        [record.address.as_deref(), record.city.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ")
    });

    fill_description(record, fields);

    record.hero_image = asset_filename(fields, "hero_image");
    record.image = asset_filename(fields, "image").or_else(|| record.hero_image.clone());
    record.gallery = asset_filenames(fields, "gallery");

    let mut amenities = Vec::new();
    for (key, label) in AMENITY_FLAGS {
        let flag = bool_field(fields, key).unwrap_or(false);
        if flag {
            amenities.push(label.to_string());
        }
        match *key {
            "wifi" => record.wifi = Some(flag),
            "power_outlets" => record.power_outlets = Some(flag),
            "outdoor_seating" => record.outdoor_seating = Some(flag),
            _ => record.pet_friendly = Some(flag),
        }
    }
    record.amenities = amenities;

    record.noise_level = option_field(fields, "noise_level");
    record.seating_capacity = option_field(fields, "seating_capacity");
    record.price_range = option_field(fields, "price_range");
    record.specialties = str_field(fields, "specialties")
        .map(|s| split_comma_list(&s))
        .unwrap_or_default();

    apply_metadata(record, fields);
}

fn fill_event(record: &mut SearchRecord, story: &Story, fields: &JsonMap<String, JsonValue>) {
    record.title = first_text(fields, &["title", "name"])
        .or_else(|| story_name(story))
        .unwrap_or_default();
    record.location = str_field(fields, "location").unwrap_or_default();
    fill_description(record, fields);
    record.date = str_field(fields, "date");
    record.image = asset_filename(fields, "image");
    apply_metadata(record, fields);
}

fn fill_description(record: &mut SearchRecord, fields: &JsonMap<String, JsonValue>) {
    record.description = fields
        .get("description")
        .map(extract_plain_text)
        .unwrap_or_default();
    record.short_summary = first_text(fields, &["short_summary", "short_description"]);
    record.summary = match &record.short_summary {
        Some(short) => short.clone(),
        None => create_summary(&record.description, SUMMARY_MAX_LEN),
    };
}

fn apply_metadata(record: &mut SearchRecord, fields: &JsonMap<String, JsonValue>) {
    let meta = fields
        .get("metadata")
        .and_then(JsonValue::as_array)
        .and_then(|blocks| blocks.first())
        .and_then(JsonValue::as_object);

    let mut raw_tags = Vec::new();
    if let Some(tags) = meta.and_then(|m| str_field(m, "tags")) {
        raw_tags.extend(split_comma_list(&tags));
    }
    if let Some(tags) = str_field(fields, "tags") {
        raw_tags.extend(split_comma_list(&tags));
    }
    if let Some(tags) = meta.and_then(|m| str_field(m, "ai_tags")) {
        raw_tags.extend(split_comma_list(&tags));
    }
    record.tags = clean_tags(raw_tags);
    record.metadata = record.tags.clone();

    record.opening_hours = text_field(fields, "opening_hours")
        .or_else(|| meta.and_then(|m| text_field(m, "opening_hours")))
        .unwrap_or_default();

    record.rating = meta
        .and_then(|m| number_field(m, "rating"))
        .or_else(|| number_field(fields, "rating"));
}

pub fn clean_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| !IGNORED_TAGS.iter().any(|ignored| t.eq_ignore_ascii_case(ignored)))
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

fn derive_geoloc(story: &Story, fields: &JsonMap<String, JsonValue>) -> Option<GeoPoint> {
    if let Some(point) = str_field(fields, "geo_location").and_then(|s| parse_geo_pair(&s)) {
        return Some(point);
    }
    if let (Some(lat), Some(lng)) = (number_field(fields, "lat"), number_field(fields, "lng")) {
        if let Some(point) = GeoPoint::new_checked(lat, lng) {
            return Some(point);
        }
    }
    let content = story.content.as_ref()?;
    let lat = content.field("lat").and_then(json_number)?;
    let lng = content.field("lng").and_then(json_number)?;
    GeoPoint::new_checked(lat, lng)
}

pub fn parse_geo_pair(value: &str) -> Option<GeoPoint> {
    let (lat, lng) = value.split_once(',')?;
    GeoPoint::new_checked(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
}

pub fn split_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn story_name(story: &Story) -> Option<String> {
    story
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn str_field(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    let text = fields.get(key)?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn first_text(fields: &JsonMap<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| str_field(fields, key))
}

fn text_field(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    let text = extract_plain_text(fields.get(key)?);
    (!text.is_empty()).then_some(text)
}

fn option_field(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    str_field(fields, key).map(|s| s.to_lowercase())
}

fn asset_filename(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    asset_to_filename(fields.get(key)?)
}

fn asset_filenames(fields: &JsonMap<String, JsonValue>, key: &str) -> Vec<String> {
    fields
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|assets| assets.iter().filter_map(asset_to_filename).collect())
        .unwrap_or_default()
}

fn asset_to_filename(asset: &JsonValue) -> Option<String> {
    let filename = match asset {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(map) => map.get("filename")?.as_str()?,
        _ => return None,
    };
    let filename = filename.trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

fn bool_field(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<bool> {
    match fields.get(key)? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|n| n != 0),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn number_field(fields: &JsonMap<String, JsonValue>, key: &str) -> Option<f64> {
    json_number(fields.get(key)?)
}

// CMS number fields are often delivered as strings
fn json_number(value: &JsonValue) -> Option<f64> {
    let n = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn story(value: JsonValue) -> Story {
        serde_json::from_value(value).unwrap()
    }

    fn richtext(text: &str) -> JsonValue {
        json!({"type": "doc", "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": text}]}
        ]})
    }

    fn cafe_story() -> Story {
        story(json!({
            "id": 101,
            "name": "Demo Coffee Central",
            "slug": "demo-coffee-central",
            "published_at": "2025-03-01T10:00:00.000Z",
            "created_at": "2025-02-01T10:00:00.000Z",
            "content": {
                "component": "page",
                "body": [
                    {"component": "hero", "headline": "ignored"},
                    {
                        "component": "cafe",
                        "title": "Demo Coffee Central",
                        "description": richtext("A trendy study-friendly café."),
                        "address": "123 Coffee Street",
                        "city": "Amsterdam",
                        "geo_location": "52.3676,4.9041",
                        "wifi": true,
                        "power_outlets": "true",
                        "outdoor_seating": false,
                        "noise_level": "Moderate",
                        "price_range": "moderate",
                        "specialties": "Cold Brew, Flat White,",
                        "hero_image": {"filename": "https://img.test/hero.jpg"},
                        "gallery": [{"filename": "https://img.test/1.jpg"}, {"filename": ""}],
                        "tags": "wifi, Study Spot",
                        "metadata": [{
                            "component": "metadata",
                            "tags": "study spot, Demo, hipster",
                            "opening_hours": "Mon-Fri 7-19",
                            "rating": "4.5"
                        }]
                    }
                ]
            }
        }))
    }

    #[test]
    fn cafe_story_becomes_flat_record() {
        let record = RecordNormalizer::new()
            .normalize_story(&cafe_story())
            .unwrap()
            .unwrap();

        assert_eq!(record.object_id, "story_101");
        assert_eq!(record.story_id, 101);
        assert_eq!(record.record_type, "cafe");
        assert_eq!(record.title, "Demo Coffee Central");
        assert_eq!(record.name.as_deref(), Some("Demo Coffee Central"));
        assert_eq!(record.location, "123 Coffee Street, Amsterdam");
        assert_eq!(record.description, "A trendy study-friendly café.");
        assert_eq!(record.summary, record.description);
        assert_eq!(record.image.as_deref(), Some("https://img.test/hero.jpg"));
        assert_eq!(record.gallery, vec!["https://img.test/1.jpg".to_string()]);
        assert_eq!(record.tags, vec!["study spot", "hipster", "wifi"]);
        assert_eq!(record.metadata, record.tags);
        assert_eq!(record.opening_hours, "Mon-Fri 7-19");
        assert_eq!(record.rating, Some(4.5));
        assert_eq!(record.wifi, Some(true));
        assert_eq!(record.power_outlets, Some(true));
        assert_eq!(record.outdoor_seating, Some(false));
        assert_eq!(record.pet_friendly, Some(false));
        assert_eq!(record.amenities, vec!["wifi", "power outlets"]);
        assert_eq!(record.noise_level.as_deref(), Some("moderate"));
        assert_eq!(record.specialties, vec!["Cold Brew", "Flat White"]);
        assert_eq!(record.geoloc, Some(GeoPoint { lat: 52.3676, lng: 4.9041 }));
        assert_eq!(record.published_at_timestamp, Some(1_740_823_200));
    }

    #[test]
    fn legacy_cafe_fields_still_map() {
        let s = story(json!({
            "id": 5,
            "slug": "old",
            "content": {"body": [{
                "component": "cafe",
                "name": "Old Cafe",
                "location": "Berlin, DE",
                "image": {"filename": "https://img.test/old.jpg"},
                "description": "Plain text description."
            }]}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.title, "Old Cafe");
        assert_eq!(record.location, "Berlin, DE");
        assert_eq!(record.image.as_deref(), Some("https://img.test/old.jpg"));
        assert_eq!(record.description, "Plain text description.");
        assert!(record.tags.is_empty());
        assert_eq!(record.opening_hours, "");
        assert_eq!(record.rating, None);
        assert!(record.geoloc.is_none());
    }

    #[test]
    fn event_story_uses_title_and_date() {
        let s = story(json!({
            "id": 9,
            "name": "Story Name",
            "slug": "latte-art",
            "content": {
                "component": "page",
                "lat": 48.85,
                "lng": "2.35",
                "body": [{
                    "component": "event",
                    "title": "Latte Art Workshop",
                    "date": "2025-05-01 18:00",
                    "location": "Paris",
                    "description": richtext("Learn to pour."),
                    "metadata": [{"tags": "workshop", "rating": 5}]
                }]
            }
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.record_type, "event");
        assert_eq!(record.title, "Latte Art Workshop");
        assert_eq!(record.date.as_deref(), Some("2025-05-01 18:00"));
        assert_eq!(record.location, "Paris");
        assert_eq!(record.tags, vec!["workshop"]);
        assert_eq!(record.rating, Some(5.0));
        assert_eq!(record.wifi, None);
        assert_eq!(record.geoloc, Some(GeoPoint { lat: 48.85, lng: 2.35 }));
    }

    #[test]
    fn root_content_component_is_accepted() {
        let s = story(json!({
            "id": 11,
            "slug": "root-cafe",
            "content": {"component": "cafe", "title": "Root Cafe", "wifi": false}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.title, "Root Cafe");
        assert_eq!(record.wifi, Some(false));
    }

    #[test]
    fn title_falls_back_to_story_name() {
        let s = story(json!({
            "id": 12,
            "name": "Named Story",
            "slug": "x",
            "content": {"body": [{"component": "event"}]}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.title, "Named Story");
        assert_eq!(record.summary, "");
    }

    #[test]
    fn short_summary_wins_over_truncated_description() {
        let long = "word ".repeat(60);
        let s = story(json!({
            "id": 13,
            "slug": "x",
            "content": {"body": [{
                "component": "cafe",
                "title": "T",
                "description": long,
                "short_summary": "Short and sweet."
            }]}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.summary, "Short and sweet.");
        assert_eq!(record.short_summary.as_deref(), Some("Short and sweet."));
    }

    #[test]
    fn stories_without_known_components_are_skipped() {
        let s = story(json!({
            "id": 14,
            "slug": "home",
            "content": {"component": "page", "body": [{"component": "teaser"}]}
        }));
        assert_eq!(RecordNormalizer::new().normalize_story(&s), Ok(None));
        assert_eq!(
            RecordNormalizer::new().normalize_story(&Story::default()),
            Ok(None)
        );
    }

    #[test]
    fn skipped_stories_name_their_unknown_components() {
        let body_only = story(json!({
            "id": 15,
            "slug": "about",
            "content": {"component": "page", "body": [{"component": "teaser"}, {"component": "grid"}]}
        }));
        assert_eq!(unknown_components(&body_only), vec!["teaser", "grid"]);

        let root_only = story(json!({"id": 16, "slug": "faq", "content": {"component": "faq"}}));
        assert_eq!(unknown_components(&root_only), vec!["faq"]);

        let layout = story(json!({"id": 17, "slug": "blank", "content": {"component": "page", "body": []}}));
        assert!(unknown_components(&layout).is_empty());
    }

    #[test]
    fn non_object_blocks_are_passed_over() {
        let s = story(json!({
            "id": 18,
            "slug": "mixed",
            "content": {"component": "page", "body": ["cafe", 7, {"component": "event", "title": "Cupping"}]}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.record_type, "event");
        assert_eq!(record.title, "Cupping");
    }

    #[test]
    fn numeric_amenity_flags_are_read_as_booleans() {
        let s = story(json!({
            "id": 19,
            "slug": "numbers-cafe",
            "content": {"body": [{
                "component": "cafe",
                "title": "Numbers Cafe",
                "wifi": 1,
                "power_outlets": 0,
                "outdoor_seating": 2
            }]}
        }));
        let record = RecordNormalizer::new().normalize_story(&s).unwrap().unwrap();
        assert_eq!(record.wifi, Some(true));
        assert_eq!(record.power_outlets, Some(false));
        assert_eq!(record.outdoor_seating, Some(true));
        assert_eq!(record.pet_friendly, Some(false));
        assert_eq!(record.amenities, vec!["wifi", "outdoor seating"]);
    }

    #[test]
    fn missing_id_is_an_error() {
        let s = story(json!({"slug": "x", "content": {"body": [{"component": "cafe"}]}}));
        assert_eq!(
            RecordNormalizer::new().normalize_story(&s),
            Err(NormalizeError::MissingId)
        );
    }

    #[test]
    fn batch_counts_processed_skipped_and_errors() {
        let stories = vec![
            cafe_story(),
            story(json!({"id": 2, "slug": "home", "content": {"body": []}})),
            story(json!({"slug": "broken", "content": {"body": [{"component": "event"}]}})),
        ];
        let batch = RecordNormalizer::new().normalize_stories(&stories);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(
            batch.stats,
            NormalizationStats {
                processed: 1,
                skipped: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn geo_pairs_are_validated() {
        assert_eq!(parse_geo_pair(" 38.7223 , -9.1393 "), Some(GeoPoint { lat: 38.7223, lng: -9.1393 }));
        assert_eq!(parse_geo_pair("95,10"), None);
        assert_eq!(parse_geo_pair("not,coords"), None);
        assert_eq!(parse_geo_pair("52.1"), None);
    }

    #[test]
    fn tag_cleaning_removes_demo_tags_and_duplicates() {
        let tags = clean_tags(
            ["Wifi", " wifi ", "TEST", "", "cozy", "Demo"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(tags, vec!["Wifi", "cozy"]);
    }
}
