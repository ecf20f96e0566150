//! Map configuration.
//!
//! All tunable constants live here or in the per-component config structs
//! ([`CurveConfig`], [`CameraConfig`], [`OverlayConfig`]). Every field has a
//! default, so a partial JSON document is enough to override a single value.

use serde::{Deserialize, Serialize};

use crate::camera::CameraConfig;
use crate::error::Result;
use crate::geometry::CurveConfig;
use crate::overlay::OverlayConfig;
use crate::LngLat;

/// Environment variable holding the rendering-engine access credential.
pub const ACCESS_TOKEN_ENV: &str = "MAPBOX_ACCESS_TOKEN";

/// Top-level configuration for a [`MapController`](crate::MapController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Rendering-engine access credential. `None` leaves the map unconfigured.
    pub access_token: Option<String>,

    /// Style document loaded by the engine.
    /// Default: "mapbox://styles/mapbox/light-v11"
    pub style_url: String,

    /// Initial center when there are no steps to look at.
    /// Default: (104.06, 30.67)
    pub default_center: LngLat,

    /// Initial zoom when there are no steps to look at.
    /// Default: 4.0
    pub default_zoom: f64,

    /// Circle-of-activity radius in kilometres when the host gives none.
    /// Default: 2.0
    pub default_radius_km: f64,

    pub curve: CurveConfig,
    pub camera: CameraConfig,
    pub overlay: OverlayConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            style_url: "mapbox://styles/mapbox/light-v11".to_string(),
            default_center: LngLat::new(104.06, 30.67),
            default_zoom: 4.0,
            default_radius_km: 2.0,
            curve: CurveConfig::default(),
            camera: CameraConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl MapConfig {
    /// Default configuration with the access token taken from
    /// [`ACCESS_TOKEN_ENV`]. A blank value counts as absent.
    pub fn from_env() -> Self {
        Self::default().with_access_token(std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    /// Parse a (possibly partial) JSON configuration over the defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MapConfig = serde_json::from_str(json)?;
        let token = config.access_token.clone();
        Ok(config.with_access_token(token))
    }

    /// Replace the access token, normalizing blank strings to `None`.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    /// The credential, if one is configured.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}
