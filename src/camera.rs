//! Camera decisions.
//!
//! The director turns "which steps are visible" and "which day is active"
//! into at most one [`CameraTransition`] per change:
//!
//! 1. No active day, several distinct points: fit the bounding box
//! 2. Active day changed: fly to the first step of that day
//! 3. No active day, all points identical: center on that point
//!
//! The last target is remembered, so re-evaluating with unchanged inputs
//! yields no transition.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::visible_steps;
use crate::{Bounds, LngLat, Step};

/// Tuning for camera transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Padding around fitted bounds, in pixels. Default: 60.0
    pub fit_padding: f64,
    /// Default: 1000
    pub fit_duration_ms: u64,
    /// Zoom cap for bounds fits so close stops don't zoom to street level.
    /// Default: 12.0
    pub fit_max_zoom: f64,
    /// Default: 11.0
    pub fly_zoom: f64,
    /// Default: 45.0
    pub fly_pitch: f64,
    /// Default: 0.0
    pub fly_bearing: f64,
    /// Default: 1800
    pub fly_duration_ms: u64,
    /// Zoom when centering on a single point. Default: 12.0
    pub center_zoom: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fit_padding: 60.0,
            fit_duration_ms: 1000,
            fit_max_zoom: 12.0,
            fly_zoom: 11.0,
            fly_pitch: 45.0,
            fly_bearing: 0.0,
            fly_duration_ms: 1800,
            center_zoom: 12.0,
        }
    }
}

/// A camera operation to execute on the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraTransition {
    /// Instant recenter
    JumpTo { center: LngLat, zoom: f64 },
    /// Smooth focused transition onto one point
    FlyTo {
        center: LngLat,
        zoom: f64,
        pitch: f64,
        bearing: f64,
        duration_ms: u64,
    },
    /// Smooth transition framing a box
    FitBounds {
        bounds: Bounds,
        padding: f64,
        duration_ms: u64,
        max_zoom: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum CameraTarget {
    Day(u32),
    Overview(Bounds),
    Point(LngLat),
}

/// Decides camera transitions and remembers where it last went.
#[derive(Debug, Clone)]
pub struct CameraDirector {
    config: CameraConfig,
    last: Option<CameraTarget>,
}

impl CameraDirector {
    pub fn new(config: CameraConfig) -> Self {
        Self { config, last: None }
    }

    /// Day the camera last flew to, if the last move was a fly-to.
    pub fn last_day(&self) -> Option<u32> {
        match self.last {
            Some(CameraTarget::Day(day)) => Some(day),
            _ => None,
        }
    }

    /// Forget the last target so the next update moves the camera.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Evaluate the decision rule for the current inputs.
    ///
    /// `steps` is the full step list; `cutoff` selects the visible ones for
    /// the overview. Returns `None` when no movement is needed.
    pub fn update(
        &mut self,
        steps: &[Step],
        cutoff: Option<u32>,
        active_day: Option<u32>,
    ) -> Option<CameraTransition> {
        match active_day {
            Some(day) => self.fly_to_day(steps, day),
            None => self.overview(steps, cutoff),
        }
    }

    /// Center on a fixed point (single-location mode).
    pub fn focus(&mut self, center: LngLat, zoom: f64) -> Option<CameraTransition> {
        self.commit(CameraTarget::Point(center), || CameraTransition::JumpTo {
            center,
            zoom,
        })
    }

    fn fly_to_day(&mut self, steps: &[Step], day: u32) -> Option<CameraTransition> {
        if self.last == Some(CameraTarget::Day(day)) {
            return None;
        }

        let Some(target) = steps.iter().find(|s| s.day == day) else {
            debug!("[Camera] No step for active day {}, holding position", day);
            return None;
        };

        let config = &self.config;
        let transition = CameraTransition::FlyTo {
            center: target.position(),
            zoom: config.fly_zoom,
            pitch: config.fly_pitch,
            bearing: config.fly_bearing,
            duration_ms: config.fly_duration_ms,
        };
        debug!("[Camera] Fly to day {} ('{}')", day, target.id);
        self.last = Some(CameraTarget::Day(day));
        Some(transition)
    }

    fn overview(&mut self, steps: &[Step], cutoff: Option<u32>) -> Option<CameraTransition> {
        let points: Vec<LngLat> = visible_steps(steps, cutoff)
            .into_iter()
            .map(Step::position)
            .collect();

        let Some(bounds) = Bounds::from_points(&points) else {
            self.last = None;
            return None;
        };

        if bounds.is_degenerate() {
            let center = bounds.center();
            let zoom = self.config.center_zoom;
            return self.commit(CameraTarget::Point(center), || CameraTransition::JumpTo {
                center,
                zoom,
            });
        }

        let config = self.config.clone();
        self.commit(CameraTarget::Overview(bounds), || CameraTransition::FitBounds {
            bounds,
            padding: config.fit_padding,
            duration_ms: config.fit_duration_ms,
            max_zoom: config.fit_max_zoom,
        })
    }

    fn commit(
        &mut self,
        target: CameraTarget,
        transition: impl FnOnce() -> CameraTransition,
    ) -> Option<CameraTransition> {
        if self.last.as_ref() == Some(&target) {
            return None;
        }
        self.last = Some(target);
        Some(transition())
    }
}

/// Zoom level that frames a circle of `radius_km`.
pub fn zoom_for_radius(radius_km: f64) -> f64 {
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return 14.0;
    }
    (14.0 - radius_km.log2()).clamp(3.0, 16.0)
}
