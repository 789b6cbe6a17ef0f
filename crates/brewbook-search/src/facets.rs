//! Facet selection state and the chips shown for it.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::provider::FacetCounts;

/// Noise levels offered as filter chips.
const NOISE_CHIPS: &[&str] = &["quiet", "moderate"];

const PRICE_LABELS: &[(&str, &str)] = &[("budget", "$"), ("moderate", "$$"), ("expensive", "$$$")];

/// Refinements picked by a visitor. Values are matched exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacetSelection {
    pub types: BTreeSet<String>,
    /// Requires both `wifi` and `power_outlets`.
    pub work_friendly: bool,
    pub noise_levels: BTreeSet<String>,
    pub price_ranges: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

fn toggle(set: &mut BTreeSet<String>, value: &str) {
    if !set.remove(value) {
        set.insert(value.to_string());
    }
}

impl FacetSelection {
    pub fn toggle_type(&mut self, value: &str) {
        toggle(&mut self.types, value);
    }

    pub fn toggle_work_friendly(&mut self) {
        self.work_friendly = !self.work_friendly;
    }

    pub fn toggle_noise_level(&mut self, value: &str) {
        toggle(&mut self.noise_levels, value);
    }

    pub fn toggle_price_range(&mut self, value: &str) {
        toggle(&mut self.price_ranges, value);
    }

    pub fn toggle_tag(&mut self, value: &str) {
        toggle(&mut self.tags, value);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Facet filters as an AND of OR-groups.
    pub fn to_facet_filters(&self) -> Vec<Vec<String>> {
        let group = |attribute: &str, values: &BTreeSet<String>| -> Option<Vec<String>> {
            (!values.is_empty()).then(|| values.iter().map(|v| format!("{attribute}:{v}")).collect())
        };

        let mut filters = Vec::new();
        filters.extend(group("type", &self.types));
        if self.work_friendly {
            filters.push(vec!["wifi:true".to_string()]);
            filters.push(vec!["power_outlets:true".to_string()]);
        }
        filters.extend(group("noise_level", &self.noise_levels));
        filters.extend(group("price_range", &self.price_ranges));
        filters.extend(group("tags", &self.tags));
        filters
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetChip {
    pub attribute: String,
    pub value: String,
    pub label: String,
    pub count: u64,
    pub selected: bool,
}

fn count_of(facets: &FacetCounts, attribute: &str, value: &str) -> u64 {
    facets
        .get(attribute)
        .and_then(|values| values.get(value))
        .copied()
        .unwrap_or(0)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Chips for the type, work-friendly, noise and price filters.
pub fn facet_chips(facets: &FacetCounts, selection: &FacetSelection) -> Vec<FacetChip> {
    let mut chips = Vec::new();

    if let Some(types) = facets.get("type") {
        for (value, count) in types {
            chips.push(FacetChip {
                attribute: "type".into(),
                value: value.clone(),
                label: capitalize(value),
                count: *count,
                selected: selection.types.contains(value),
            });
        }
    }

    let wifi = count_of(facets, "wifi", "true");
    let power = count_of(facets, "power_outlets", "true");
    chips.push(FacetChip {
        attribute: "work_friendly".into(),
        value: "true".into(),
        label: "Work Friendly".into(),
        count: wifi.min(power),
        selected: selection.work_friendly,
    });

    if let Some(levels) = facets.get("noise_level") {
        for (value, count) in levels {
            if !NOISE_CHIPS.contains(&value.to_lowercase().as_str()) {
                continue;
            }
            chips.push(FacetChip {
                attribute: "noise_level".into(),
                value: value.clone(),
                label: capitalize(value),
                count: *count,
                selected: selection.noise_levels.contains(value),
            });
        }
    }

    if let Some(prices) = facets.get("price_range") {
        for (value, count) in prices {
            let label = PRICE_LABELS
                .iter()
                .find(|(v, _)| *v == value.as_str())
                .map(|(_, label)| label.to_string())
                .unwrap_or_else(|| value.clone());
            chips.push(FacetChip {
                attribute: "price_range".into(),
                value: value.clone(),
                label,
                count: *count,
                selected: selection.price_ranges.contains(value),
            });
        }
    }

    chips
}
