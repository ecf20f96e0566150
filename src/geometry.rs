//! Route geometry.
//!
//! Produces the path committed to the engine's route source. When a
//! precomputed [`RouteOverlay`] is loaded it is used verbatim; otherwise a
//! smoothed curve is generated from the step coordinates.
//!
//! ## Curve Algorithm
//! For each consecutive pair `(a, b)`:
//! 1. Take the midpoint `m` and the segment's perpendicular `(-dy, dx)`
//! 2. Control point `c = m + offset_ratio * perpendicular`
//! 3. Sample the quadratic Bézier `a → c → b` at `t = step, 2·step, ..., 1`
//!
//! Segments are concatenated, so each pair contributes `1/step - 1`
//! intermediate points plus its endpoint.
//!
//! ## Degenerate Input
//! - One point: a second point is synthesized at a fixed tiny offset
//! - All points identical: each point is nudged by `index * jitter`
//!
//! Either way the result has at least two distinct coordinates.

use geo::{Coord, Destination, Haversine, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::overlay::RouteOverlay;
use crate::{LngLat, Step};

/// Tuning for generated route curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Control point offset as a fraction of the segment's perpendicular.
    /// Default: 0.15
    pub offset_ratio: f64,

    /// Bézier parameter step. 0.1 gives 9 intermediate points per segment.
    /// Default: 0.1
    pub sample_step: f64,

    /// Offset (degrees) used to synthesize a second point for a lone stop.
    /// Default: 0.0001 (~11 meters)
    pub lone_point_offset: f64,

    /// Per-index offset (degrees) applied when every point is identical.
    /// Default: 0.00001
    pub identical_jitter: f64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            offset_ratio: 0.15,
            sample_step: 0.1,
            lone_point_offset: 0.0001,
            identical_jitter: 0.00001,
        }
    }
}

impl CurveConfig {
    fn samples_per_segment(&self) -> usize {
        if self.sample_step.is_finite() && self.sample_step > 0.0 && self.sample_step <= 1.0 {
            (1.0 / self.sample_step).round().max(1.0) as usize
        } else {
            10
        }
    }
}

/// Steps shown on the route: all of them, or those with `day <= cutoff`.
pub fn visible_steps(steps: &[Step], cutoff: Option<u32>) -> Vec<&Step> {
    steps
        .iter()
        .filter(|s| cutoff.map_or(true, |c| s.day <= c))
        .collect()
}

/// Build the route path to render.
///
/// Returns `None` when there is nothing to draw: no steps at all, or no
/// overlay and no visible steps. The overlay, when present, wins and is not
/// cut off by day, but it never stands in for an empty itinerary.
pub fn build_route_path(
    steps: &[Step],
    cutoff: Option<u32>,
    overlay: Option<&RouteOverlay>,
    config: &CurveConfig,
) -> Option<LineString<f64>> {
    if steps.is_empty() {
        return None;
    }
    if let Some(overlay) = overlay {
        return Some(overlay.line_string());
    }

    let coords: Vec<Coord> = visible_steps(steps, cutoff)
        .into_iter()
        .map(|s| s.position().into())
        .collect();

    if coords.is_empty() {
        return None;
    }

    Some(LineString::new(generate_curve(&coords, config)))
}

/// Generate a smoothed curve through `points`.
///
/// Deterministic: the same input always produces the same output.
/// Returns an empty vector only for empty input.
pub fn generate_curve(points: &[Coord], config: &CurveConfig) -> Vec<Coord> {
    let points = prepare_points(points, config);
    if points.len() < 2 {
        return points;
    }

    let samples = config.samples_per_segment();
    let mut curve = Vec::with_capacity(1 + (points.len() - 1) * samples);
    curve.push(points[0]);

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let control = control_point(a, b, config.offset_ratio);
        for k in 1..=samples {
            let t = k as f64 / samples as f64;
            curve.push(quadratic_bezier(a, control, b, t));
        }
    }

    curve
}

/// Apply the degenerate-input rules so the curve always has two distinct
/// points to work with.
fn prepare_points(points: &[Coord], config: &CurveConfig) -> Vec<Coord> {
    match points {
        [] => Vec::new(),
        [only] => vec![
            *only,
            Coord {
                x: only.x + config.lone_point_offset,
                y: only.y + config.lone_point_offset,
            },
        ],
        [first, rest @ ..] if rest.iter().all(|p| p == first) => points
            .iter()
            .enumerate()
            .map(|(i, p)| Coord {
                x: p.x + i as f64 * config.identical_jitter,
                y: p.y + i as f64 * config.identical_jitter,
            })
            .collect(),
        _ => points.to_vec(),
    }
}

fn control_point(a: Coord, b: Coord, offset_ratio: f64) -> Coord {
    let mid = Coord {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    };
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    Coord {
        x: mid.x - dy * offset_ratio,
        y: mid.y + dx * offset_ratio,
    }
}

fn quadratic_bezier(a: Coord, c: Coord, b: Coord, t: f64) -> Coord {
    let u = 1.0 - t;
    Coord {
        x: u * u * a.x + 2.0 * u * t * c.x + t * t * b.x,
        y: u * u * a.y + 2.0 * u * t * c.y + t * t * b.y,
    }
}

/// Geodesic circle of `radius_km` around `center`, as a closed polygon.
pub fn activity_circle(center: LngLat, radius_km: f64, vertices: usize) -> Polygon<f64> {
    let origin = Point::new(center.lng, center.lat);
    let vertices = vertices.max(8);
    let meters = radius_km.max(0.0) * 1000.0;

    let mut ring: Vec<Coord> = (0..vertices)
        .map(|i| {
            let bearing = 360.0 * i as f64 / vertices as f64;
            Haversine::destination(origin, bearing, meters).0
        })
        .collect();
    ring.push(ring[0]);

    Polygon::new(LineString::new(ring), Vec::new())
}
