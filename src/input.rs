//! Untrusted host input.
//!
//! The hosting page hands over whatever its data layer produced: coordinates
//! may arrive as numbers, numeric strings or null, ids as strings or numbers,
//! and optional fields may be missing entirely. Nothing here validates; the
//! [`normalize`](crate::normalize) module decides what survives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Mode;

/// A JSON value that should be a number but may not be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
    Null,
}

impl RawNumber {
    /// Coerce to a float. Text is trimmed and parsed; null is NaN.
    pub fn to_f64(&self) -> f64 {
        match self {
            RawNumber::Number(n) => *n,
            RawNumber::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
            RawNumber::Null => f64::NAN,
        }
    }
}

impl Default for RawNumber {
    fn default() -> Self {
        RawNumber::Null
    }
}

impl From<f64> for RawNumber {
    fn from(n: f64) -> Self {
        RawNumber::Number(n)
    }
}

/// A record id, which hosts send as either a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    pub fn as_string(&self) -> String {
        match self {
            RawId::Text(s) => s.clone(),
            RawId::Number(n) => n.to_string(),
        }
    }
}

impl Default for RawId {
    fn default() -> Self {
        RawId::Text(String::new())
    }
}

impl From<&str> for RawId {
    fn from(s: &str) -> Self {
        RawId::Text(s.to_string())
    }
}

/// One location as supplied by the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawLocation {
    #[serde(default)]
    pub id: RawId,
    #[serde(default)]
    pub lng: RawNumber,
    #[serde(default)]
    pub lat: RawNumber,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// Day hint, used only when grouping a flat location list
    #[serde(default)]
    pub day: Option<RawNumber>,
}

impl RawLocation {
    /// Create a location with numeric coordinates and no labels.
    pub fn new(id: &str, lng: f64, lat: f64) -> Self {
        Self {
            id: RawId::from(id),
            lng: RawNumber::Number(lng),
            lat: RawNumber::Number(lat),
            ..Self::default()
        }
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_day(mut self, day: u32) -> Self {
        self.day = Some(RawNumber::Number(day as f64));
        self
    }
}

/// Locations grouped under one itinerary day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DayGroup {
    #[serde(default)]
    pub day: RawNumber,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub locations: Vec<RawLocation>,
}

impl DayGroup {
    pub fn new(day: u32, locations: Vec<RawLocation>) -> Self {
        Self {
            day: RawNumber::Number(day as f64),
            title: None,
            locations,
        }
    }

    /// Group a flat location list by each record's own `day` hint.
    ///
    /// Records without a usable day land on day 1. Input order is kept
    /// within each day.
    pub fn from_flat(locations: &[RawLocation]) -> Vec<DayGroup> {
        let mut by_day: BTreeMap<u32, Vec<RawLocation>> = BTreeMap::new();
        for location in locations {
            let day = location
                .day
                .as_ref()
                .map(RawNumber::to_f64)
                .filter(|d| d.is_finite() && *d >= 1.0 && d.fract() == 0.0)
                .map(|d| d as u32)
                .unwrap_or(1);
            by_day.entry(day).or_default().push(location.clone());
        }

        by_day
            .into_iter()
            .map(|(day, locations)| DayGroup::new(day, locations))
            .collect()
    }
}

/// Full snapshot of what the hosting page passes to the map on each render.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInput {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub locations: Vec<RawLocation>,
    #[serde(default)]
    pub day_locations: Vec<DayGroup>,
    /// Circle-of-activity radius in kilometres (single-location mode)
    #[serde(default)]
    pub radius: Option<f64>,
    /// Progressive-reveal cutoff for the route line
    #[serde(default)]
    pub current_day: Option<u32>,
    /// Day currently in focus (derived from page scroll)
    #[serde(default)]
    pub active_day: Option<u32>,
    #[serde(default)]
    pub route_overlay_path: Option<String>,
}

impl HostInput {
    /// Day groups to normalize: `dayLocations` when present, otherwise the
    /// flat `locations` list grouped by day hint.
    pub fn day_groups(&self) -> Vec<DayGroup> {
        if !self.day_locations.is_empty() {
            self.day_locations.clone()
        } else {
            DayGroup::from_flat(&self.locations)
        }
    }

    /// Route cutoff: `currentDay` wins over `activeDay`; neither means no cutoff.
    pub fn route_cutoff(&self) -> Option<u32> {
        self.current_day.or(self.active_day)
    }

    /// Overlay reference with blank strings treated as absent.
    pub fn overlay_reference(&self) -> Option<&str> {
        self.route_overlay_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
