//! Index settings, synonyms and the optional YAML override file.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::provider::{IndexSettings, Synonym};

/// Facets requested by the search API alongside every query.
pub const FACET_ATTRIBUTES: &[&str] = &["type", "wifi", "power_outlets", "noise_level", "price_range", "tags"];

pub fn default_index_settings() -> IndexSettings {
    let settings = json!({
        "searchableAttributes": [
            "title,name",
            "summary",
            "description",
            "location",
            "tags",
            "metadata",
            "type"
        ],
        "attributesForFaceting": [
            "type",
            "location",
            "city",
            "tags",
            "metadata",
            "wifi",
            "power_outlets",
            "noise_level",
            "price_range"
        ],
        "customRanking": ["desc(rating)", "desc(published_at_timestamp)"],
        "ranking": ["typo", "geo", "words", "filters", "proximity", "attribute", "exact", "custom"],
        "typoTolerance": true,
        "minWordSizefor1Typo": 4,
        "minWordSizefor2Typos": 8,
        "ignorePlurals": true,
        "removeStopWords": true,
        "highlightPreTag": "<mark>",
        "highlightPostTag": "</mark>",
        "minProximity": 1,
        "maxValuesPerFacet": 100
    });
    match settings {
        JsonValue::Object(map) => map,
        _ => IndexSettings::new(),
    }
}

/// Top-level keys of `custom` replace the defaults; nothing is merged deeper.
pub fn merge_settings(defaults: IndexSettings, custom: &IndexSettings) -> IndexSettings {
    let mut merged = defaults;
    for (key, value) in custom {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

pub fn default_synonyms() -> Vec<Synonym> {
    vec![
        Synonym::new("quiet-calm", &["quiet", "calm", "peaceful", "silent", "tranquil"]),
        Synonym::new("loud-noisy", &["loud", "noisy", "busy", "lively", "buzzing"]),
        Synonym::new("cozy-comfortable", &["cozy", "comfortable", "warm", "inviting", "homey"]),
        Synonym::new("wifi-internet", &["wifi", "wi-fi", "internet", "wireless", "connection"]),
        Synonym::new("outlets-power", &["outlets", "power", "charging", "plugs", "electricity"]),
        Synonym::new("cafe-coffee", &["cafe", "café", "coffee shop", "coffeehouse", "coffee"]),
        Synonym::new("study-work", &["study", "work", "workspace", "coworking", "study spot"]),
        Synonym::new("meetup-event", &["meetup", "event", "gathering", "workshop", "networking"]),
        Synonym::new("outdoor-outside", &["outdoor", "outside", "patio", "terrace", "garden"]),
        Synonym::new("group-table", &["group", "groups", "table", "tables", "communal"]),
        Synonym::new("food-snacks", &["food", "snacks", "meals", "dining", "restaurant"]),
        Synonym::new("restroom-bathroom", &["restroom", "bathroom", "toilet", "washroom", "facilities"]),
        Synonym::new("parking-car", &["parking", "car park", "garage", "parking lot", "parking space"]),
        Synonym::new(
            "wheelchair-accessible",
            &["wheelchair", "accessible", "disability friendly", "handicap accessible"],
        ),
        Synonym::new("pet-friendly", &["pet friendly", "dog friendly", "pets allowed", "pet welcome"]),
    ]
}

/// Contents of the optional search YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfigFile {
    /// Settings merged over the defaults.
    #[serde(default)]
    pub settings: IndexSettings,
    /// Replaces the default synonym groups when present.
    #[serde(default)]
    pub synonyms: Option<Vec<Synonym>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl SearchConfigFile {
    pub fn synonyms_or_default(&self) -> Vec<Synonym> {
        self.synonyms.clone().unwrap_or_else(default_synonyms)
    }
}

pub fn load_search_config(path: impl AsRef<Path>) -> anyhow::Result<SearchConfigFile> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
