//! # Itinerary Map
//!
//! Synchronizes a day-grouped travel itinerary with a live map view.
//!
//! This library provides:
//! - Normalization of untrusted, day-grouped stops into ordered [`Step`]s
//! - Smoothed route geometry (quadratic Bézier arcs between stops)
//! - One marker per stop with an "active day" highlight
//! - Camera decisions (bounds fit vs. fly-to) driven by an external active day
//! - Optional precomputed route overlays with a bounded, never-failing loader
//! - A lifecycle controller that owns the rendering engine end to end
//!
//! The rendering engine itself is consumed only through the [`MapSurface`]
//! trait, so any engine (or the recording double in [`testing`]) can be driven.
//!
//! ## Features
//!
//! - **`http`** - Enable the reqwest-backed [`HttpOverlayFetcher`]
//!
//! ## Quick Start
//!
//! ```rust
//! use itinerary_map::{normalize_day_groups, DayGroup, RawLocation};
//!
//! let groups = vec![
//!     DayGroup::new(1, vec![RawLocation::new("a", 104.06, 30.67)]),
//!     DayGroup::new(2, vec![RawLocation::new("b", 103.90, 31.00)]),
//! ];
//!
//! let normalized = normalize_day_groups(&groups);
//! assert_eq!(normalized.steps.len(), 2);
//! assert_eq!(normalized.steps[0].id, "a");
//! ```

use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{MapError, Result};

// Configuration
pub mod config;
pub use config::{MapConfig, ACCESS_TOKEN_ENV};

// Untrusted host input
pub mod input;
pub use input::{DayGroup, HostInput, RawId, RawLocation, RawNumber};

// Itinerary normalization
pub mod normalize;
pub use normalize::{
    normalize_day_groups, normalize_single_location, ContentKey, Diagnostic, DiagnosticReason,
    Normalized,
};

// Route geometry (smoothed curves, degenerate handling, activity circle)
pub mod geometry;
pub use geometry::{activity_circle, build_route_path, generate_curve, visible_steps, CurveConfig};

// Rendering engine facade
pub mod surface;
pub use surface::{
    EngineEvent, LayerKind, LayerSpec, MapSurface, MarkerHandle, MarkerSpec, SourceData,
    SurfaceFactory, SurfaceOptions,
};

// Marker registry
pub mod markers;
pub use markers::{Marker, MarkerManager};

// Camera decisions
pub mod camera;
pub use camera::{CameraConfig, CameraDirector, CameraTransition};

// Optional precomputed route overlays
pub mod overlay;
#[cfg(feature = "http")]
pub use overlay::HttpOverlayFetcher;
pub use overlay::{
    parse_route_overlay, OverlayConfig, OverlayFetcher, OverlayLoader, OverlayOutcome,
    OverlayResponse, RouteOverlay, UnavailableReason,
};

// Engine lifecycle state machine
pub mod controller;
pub use controller::{LifecycleState, MapController, OverlayRequest};

// Recording engine double for tests and host integration checks
pub mod testing;

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate in map order (longitude first).
///
/// # Example
/// ```
/// use itinerary_map::LngLat;
/// let chengdu = LngLat::new(104.06, 30.67);
/// assert!(chengdu.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    /// Create a new coordinate.
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Check if the coordinate is finite and within map ranges.
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl From<LngLat> for Coord {
    fn from(p: LngLat) -> Self {
        Coord { x: p.lng, y: p.lat }
    }
}

impl From<Coord> for LngLat {
    fn from(c: Coord) -> Self {
        LngLat::new(c.x, c.y)
    }
}

/// Bounding box over a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Create bounds from coordinates. Returns `None` for an empty slice.
    pub fn from_points(points: &[LngLat]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self {
            min_lng: first.lng,
            min_lat: first.lat,
            max_lng: first.lng,
            max_lat: first.lat,
        };

        for p in &points[1..] {
            bounds.min_lng = bounds.min_lng.min(p.lng);
            bounds.min_lat = bounds.min_lat.min(p.lat);
            bounds.max_lng = bounds.max_lng.max(p.lng);
            bounds.max_lat = bounds.max_lat.max(p.lat);
        }

        Some(bounds)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> LngLat {
        LngLat::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// True when the box has no extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.min_lng == self.max_lng && self.min_lat == self.max_lat
    }
}

/// Which sub-pipeline the map runs. Set once per configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// One location with a circle of activity around it
    SingleLocation,
    /// Day-grouped stops joined by a route line
    #[default]
    MultiStopRoute,
}

/// Registry key of a step's marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    pub day: u32,
    pub id: String,
}

/// One normalized itinerary stop.
///
/// Sequences of steps are always sorted by `(day, step_index)`; coordinates
/// are always within valid ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Itinerary day, starting at 1
    pub day: u32,
    /// Position of the location within its day, in input order
    pub step_index: u32,
    pub id: String,
    pub lng: f64,
    pub lat: f64,
    /// Display label (city, then name, then label, then "Day N")
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Step {
    pub fn position(&self) -> LngLat {
        LngLat::new(self.lng, self.lat)
    }

    pub fn key(&self) -> StepKey {
        StepKey {
            day: self.day,
            id: self.id.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lnglat_validation() {
        assert!(LngLat::new(104.06, 30.67).is_valid());
        assert!(LngLat::new(180.0, -90.0).is_valid());
        assert!(!LngLat::new(200.0, 10.0).is_valid());
        assert!(!LngLat::new(0.0, 91.0).is_valid());
        assert!(!LngLat::new(f64::NAN, 0.0).is_valid());
        assert!(!LngLat::new(f64::INFINITY, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_from_points() {
        let points = vec![
            LngLat::new(104.06, 30.67),
            LngLat::new(103.90, 31.00),
            LngLat::new(104.20, 30.50),
        ];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.min_lng, 103.90);
        assert_eq!(bounds.max_lng, 104.20);
        assert_eq!(bounds.min_lat, 30.50);
        assert_eq!(bounds.max_lat, 31.00);
        assert!(!bounds.is_degenerate());

        let center = bounds.center();
        assert!((center.lng - 104.05).abs() < 1e-9);
        assert!((center.lat - 30.75).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_empty_and_degenerate() {
        assert!(Bounds::from_points(&[]).is_none());

        let same = vec![LngLat::new(2.35, 48.85); 3];
        assert!(Bounds::from_points(&same).unwrap().is_degenerate());
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: Mode = serde_json::from_str("\"single-location\"").unwrap();
        assert_eq!(mode, Mode::SingleLocation);
        let mode: Mode = serde_json::from_str("\"multi-stop-route\"").unwrap();
        assert_eq!(mode, Mode::MultiStopRoute);
    }
}
