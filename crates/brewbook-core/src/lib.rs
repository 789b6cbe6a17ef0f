//! Core content model for Brewbook: CMS story shapes and flat search records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const CRATE_NAME: &str = "brewbook-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Cafe,
    Event,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Cafe, RecordKind::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Cafe => "cafe",
            RecordKind::Event => "event",
        }
    }

    pub fn from_component(component: &str) -> Option<Self> {
        match component {
            "cafe" => Some(RecordKind::Cafe),
            "event" => Some(RecordKind::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content entry as served by the CMS delivery API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub full_slug: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub content: Option<StoryContent>,
}

impl Story {
    pub fn id_or_zero(&self) -> u64 {
        self.id.unwrap_or(0)
    }

    pub fn slug_str(&self) -> &str {
        self.slug.as_deref().unwrap_or_default()
    }

    pub fn body_blocks(&self) -> Option<&[JsonValue]> {
        self.content.as_ref().and_then(StoryContent::body_blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoryContent {
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub body: Option<JsonValue>,
    #[serde(flatten)]
    pub fields: JsonMap<String, JsonValue>,
}

impl StoryContent {
    pub fn body_blocks(&self) -> Option<&[JsonValue]> {
        self.body.as_ref()?.as_array().map(Vec::as_slice)
    }

    pub fn field(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn to_block(&self) -> JsonMap<String, JsonValue> {
        let mut map = self.fields.clone();
        if let Some(component) = &self.component {
            map.insert("component".into(), JsonValue::String(component.clone()));
        }
        if let Some(body) = &self.body {
            map.insert("body".into(), body.clone());
        }
        map
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Returns a point only when both coordinates are finite and in range.
    pub fn new_checked(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(rename = "storyId")]
    pub story_id: u64,
    pub slug: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub published_at: Option<String>,
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at_timestamp: Option<i64>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub description: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gallery: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<String>,
    #[serde(default)]
    pub opening_hours: String,
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_outlets: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdoor_seating: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_friendly: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amenities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seating_capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialties: Vec<String>,
    #[serde(rename = "_geoloc", default, skip_serializing_if = "Option::is_none")]
    pub geoloc: Option<GeoPoint>,
}

impl SearchRecord {
    pub fn object_id_for_story(story_id: u64) -> String {
        format!("story_{story_id}")
    }

    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_component(&self.record_type)
    }

    pub fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }
}

/// Parses an RFC 3339 timestamp (the CMS format) into unix seconds.
pub fn parse_unix_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordStats {
    pub total_records: usize,
    pub cafe_count: usize,
    pub event_count: usize,
    pub other_count: usize,
}

impl RecordStats {
    pub fn from_records(records: &[SearchRecord]) -> Self {
        let mut stats = Self {
            total_records: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.kind() {
                Some(RecordKind::Cafe) => stats.cafe_count += 1,
                Some(RecordKind::Event) => stats.event_count += 1,
                None => stats.other_count += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_deserializes_with_missing_fields() {
        let story: Story = serde_json::from_str(r#"{"id": 7, "slug": "x"}"#).unwrap();
        assert_eq!(story.id, Some(7));
        assert!(story.content.is_none());
        assert!(story.body_blocks().is_none());
    }

    #[test]
    fn story_content_keeps_unknown_fields() {
        let story: Story = serde_json::from_str(
            r#"{"id": 1, "content": {"component": "page", "body": [], "lat": 52.1}}"#,
        )
        .unwrap();
        let content = story.content.as_ref().unwrap();
        assert_eq!(content.component.as_deref(), Some("page"));
        assert_eq!(content.field("lat").and_then(|v| v.as_f64()), Some(52.1));
        assert_eq!(story.body_blocks().map(|b| b.len()), Some(0));
    }

    #[test]
    fn geo_point_rejects_out_of_range_values() {
        assert!(GeoPoint::new_checked(52.37, 4.90).is_some());
        assert!(GeoPoint::new_checked(91.0, 4.90).is_none());
        assert!(GeoPoint::new_checked(10.0, -181.0).is_none());
        assert!(GeoPoint::new_checked(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn record_serializes_search_field_names() {
        let record = SearchRecord {
            object_id: "story_1".into(),
            story_id: 1,
            slug: "demo".into(),
            record_type: "cafe".into(),
            title: "Demo".into(),
            geoloc: GeoPoint::new_checked(1.0, 2.0),
            ..Default::default()
        };
        let value = record.to_json().unwrap();
        assert_eq!(value["objectID"], "story_1");
        assert_eq!(value["storyId"], 1);
        assert_eq!(value["type"], "cafe");
        assert_eq!(value["_geoloc"]["lng"], 2.0);
        assert!(value["rating"].is_null());
        assert!(value.get("wifi").is_none());
    }

    #[test]
    fn stats_count_kinds() {
        let mk = |t: &str| SearchRecord {
            record_type: t.into(),
            ..Default::default()
        };
        let stats = RecordStats::from_records(&[mk("cafe"), mk("cafe"), mk("event"), mk("page")]);
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.cafe_count, 2);
        assert_eq!(stats.event_count, 1);
        assert_eq!(stats.other_count, 1);
    }

    #[test]
    fn parses_cms_timestamps() {
        assert_eq!(parse_unix_timestamp("1970-01-01T00:01:00.000Z"), Some(60));
        assert_eq!(parse_unix_timestamp("not a date"), None);
    }
}
