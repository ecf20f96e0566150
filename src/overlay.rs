//! Optional precomputed route overlays.
//!
//! A route overlay is a GeoJSON path prepared out of band (for example a
//! road-snapped track). It is nice to have and never required: every failure
//! (missing reference, network error, non-success status, bad JSON, no path,
//! slow server) resolves to [`OverlayOutcome::Unavailable`] and a warning in
//! the log, and the map falls back to the generated curve.
//!
//! ## Accepted documents
//! - A `Feature` whose geometry is a `LineString` or `MultiLineString`
//! - A `FeatureCollection` (the first path-shaped feature wins)
//! - A bare `LineString` / `MultiLineString` geometry
//!
//! ## Caching
//! The loader remembers one result for the current reference and reuses it
//! until the reference changes or is removed. Timeouts are not cached, so a
//! later load can still pick the overlay up.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use geo::{Coord, LineString};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MapError, Result};
use crate::LngLat;

/// Tuning for overlay loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Ceiling on how long a fetch may take before the overlay counts as
    /// unavailable. Default: 5000
    pub timeout_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// A loaded overlay path (at least two valid coordinates).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOverlay {
    coordinates: Vec<LngLat>,
}

impl RouteOverlay {
    /// Build an overlay from coordinates, skipping invalid ones.
    /// Returns `None` if fewer than two valid coordinates remain.
    pub fn new(coordinates: Vec<LngLat>) -> Option<Self> {
        let coordinates: Vec<LngLat> = coordinates.into_iter().filter(LngLat::is_valid).collect();
        if coordinates.len() < 2 {
            return None;
        }
        Some(Self { coordinates })
    }

    pub fn coordinates(&self) -> &[LngLat] {
        &self.coordinates
    }

    pub fn line_string(&self) -> LineString<f64> {
        LineString::new(self.coordinates.iter().map(|&p| Coord::from(p)).collect())
    }
}

/// Raw response handed back by a fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayResponse {
    pub status: u16,
    pub body: String,
}

impl OverlayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport for overlay documents.
///
/// Transport-level failures are returned as errors; HTTP status codes are
/// reported in [`OverlayResponse::status`].
pub trait OverlayFetcher {
    fn fetch(&self, reference: &str) -> impl Future<Output = Result<OverlayResponse>>;
}

/// Why an overlay could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum UnavailableReason {
    MissingReference,
    Network(String),
    Status(u16),
    Parse(String),
    TimedOut,
}

/// Result of an overlay load. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayOutcome {
    Available(Arc<RouteOverlay>),
    Unavailable(UnavailableReason),
}

impl OverlayOutcome {
    pub fn overlay(&self) -> Option<&Arc<RouteOverlay>> {
        match self {
            OverlayOutcome::Available(overlay) => Some(overlay),
            OverlayOutcome::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, OverlayOutcome::Available(_))
    }
}

#[derive(Debug)]
struct CachedOverlay {
    reference: String,
    outcome: OverlayOutcome,
}

/// Fetches, parses and caches route overlays with a bounded wait.
pub struct OverlayLoader<F> {
    fetcher: F,
    config: OverlayConfig,
    cache: Mutex<Option<CachedOverlay>>,
}

impl<F: OverlayFetcher> OverlayLoader<F> {
    pub fn new(fetcher: F, config: OverlayConfig) -> Self {
        Self {
            fetcher,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Tell the loader which reference is current. A different (or absent)
    /// reference clears the cache.
    pub fn set_reference(&self, reference: Option<&str>) {
        if let Ok(mut cache) = self.cache.lock() {
            let stale = match (cache.as_ref(), reference) {
                (Some(cached), Some(current)) => cached.reference != current,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if stale {
                debug!("[OverlayLoader] Reference changed, clearing cache");
                *cache = None;
            }
        }
    }

    /// Cached outcome for `reference`, if any.
    pub fn cached(&self, reference: &str) -> Option<OverlayOutcome> {
        let cache = self.cache.lock().ok()?;
        let outcome = cache
            .as_ref()
            .filter(|c| c.reference == reference)
            .map(|c| c.outcome.clone());
        outcome
    }

    /// Load the overlay for `reference`.
    ///
    /// Resolves within the configured timeout and never fails: anything that
    /// goes wrong yields [`OverlayOutcome::Unavailable`].
    pub async fn load(&self, reference: Option<&str>) -> OverlayOutcome {
        self.set_reference(reference);

        let Some(reference) = reference else {
            return OverlayOutcome::Unavailable(UnavailableReason::MissingReference);
        };

        if let Some(outcome) = self.cached(reference) {
            debug!("[OverlayLoader] Cache hit for {}", reference);
            return outcome;
        }

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let outcome = match tokio::time::timeout(timeout, self.fetcher.fetch(reference)).await {
            Err(_) => OverlayOutcome::Unavailable(UnavailableReason::TimedOut),
            Ok(Err(e)) => OverlayOutcome::Unavailable(UnavailableReason::Network(e.to_string())),
            Ok(Ok(response)) if !response.is_success() => {
                OverlayOutcome::Unavailable(UnavailableReason::Status(response.status))
            }
            Ok(Ok(response)) => match parse_route_overlay(&response.body) {
                Ok(overlay) => OverlayOutcome::Available(Arc::new(overlay)),
                Err(e) => OverlayOutcome::Unavailable(UnavailableReason::Parse(e.to_string())),
            },
        };

        match &outcome {
            OverlayOutcome::Available(overlay) => info!(
                "[OverlayLoader] Loaded {} ({} points) in {:?}",
                reference,
                overlay.coordinates().len(),
                start.elapsed()
            ),
            OverlayOutcome::Unavailable(reason) => warn!(
                "[OverlayLoader] Overlay {} unavailable ({:?}), using generated curve",
                reference, reason
            ),
        }

        if outcome != OverlayOutcome::Unavailable(UnavailableReason::TimedOut) {
            if let Ok(mut cache) = self.cache.lock() {
                *cache = Some(CachedOverlay {
                    reference: reference.to_string(),
                    outcome: outcome.clone(),
                });
            }
        }

        outcome
    }
}

/// Parse a GeoJSON document into a route overlay.
pub fn parse_route_overlay(body: &str) -> Result<RouteOverlay> {
    let doc: Value =
        serde_json::from_str(body).map_err(|e| MapError::overlay_parse(e.to_string()))?;

    let overlay = match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.iter().find_map(feature_path)),
        Some("Feature") => feature_path(&doc),
        Some(_) => geometry_path(&doc),
        None => None,
    };

    overlay.ok_or_else(|| MapError::overlay_parse("no path-shaped feature found"))
}

fn feature_path(feature: &Value) -> Option<RouteOverlay> {
    geometry_path(feature.get("geometry")?)
}

fn geometry_path(geometry: &Value) -> Option<RouteOverlay> {
    let coordinates = geometry.get("coordinates")?.as_array()?;
    let points = match geometry.get("type")?.as_str()? {
        "LineString" => positions(coordinates),
        "MultiLineString" => coordinates
            .iter()
            .filter_map(Value::as_array)
            .flat_map(|line| positions(line))
            .collect(),
        _ => return None,
    };
    RouteOverlay::new(points)
}

/// `[lng, lat, ...]` positions; malformed entries are skipped.
fn positions(values: &[Value]) -> Vec<LngLat> {
    values
        .iter()
        .filter_map(|position| {
            let position = position.as_array()?;
            let lng = position.first()?.as_f64()?;
            let lat = position.get(1)?.as_f64()?;
            Some(LngLat::new(lng, lat))
        })
        .collect()
}

/// Overlay fetcher over HTTP(S).
///
/// References that are not absolute URLs are resolved against `base_url`.
#[cfg(feature = "http")]
pub struct HttpOverlayFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[cfg(feature = "http")]
impl HttpOverlayFetcher {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MapError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    fn resolve(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        match &self.base_url {
            Some(base) => format!("{}/{}", base, reference.trim_start_matches('/')),
            None => reference.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl OverlayFetcher for HttpOverlayFetcher {
    async fn fetch(&self, reference: &str) -> Result<OverlayResponse> {
        let url = self.resolve(reference);
        let response = self.client.get(&url).send().await.map_err(|e| MapError::Http {
            message: format!("Request error: {}", e),
            status_code: None,
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| MapError::Http {
            message: format!("Body error: {}", e),
            status_code: Some(status),
        })?;

        Ok(OverlayResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFetcher;

    const LINE_FEATURE: &str = r#"{
        "type": "Feature",
        "properties": {"name": "day 1"},
        "geometry": {"type": "LineString", "coordinates": [[104.06, 30.67], [104.0, 30.8], [103.90, 31.00]]}
    }"#;

    #[test]
    fn test_parse_feature() {
        let overlay = parse_route_overlay(LINE_FEATURE).unwrap();
        assert_eq!(overlay.coordinates().len(), 3);
        assert_eq!(overlay.coordinates()[0], LngLat::new(104.06, 30.67));
    }

    #[test]
    fn test_parse_collection_first_path_wins() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 1]}},
                {"type": "Feature", "geometry": null},
                {"type": "Feature", "geometry": {"type": "MultiLineString",
                    "coordinates": [[[1, 1], [2, 2]], [[3, 3]]]}},
                {"type": "Feature", "geometry": {"type": "LineString",
                    "coordinates": [[9, 9], [8, 8]]}}
            ]
        }"#;
        let overlay = parse_route_overlay(body).unwrap();
        let lngs: Vec<f64> = overlay.coordinates().iter().map(|p| p.lng).collect();
        assert_eq!(lngs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parse_bare_geometry() {
        let body = r#"{"type": "LineString", "coordinates": [[0, 0], [1, 1, 120.5]]}"#;
        assert_eq!(parse_route_overlay(body).unwrap().coordinates().len(), 2);
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_route_overlay("<html>Not Found</html>").is_err());
        assert!(parse_route_overlay(r#"{"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]}}"#).is_err());
        assert!(parse_route_overlay(r#"{"type": "LineString", "coordinates": [[0, 0], [500, 0]]}"#).is_err());
        assert!(parse_route_overlay(r#"[1, 2, 3]"#).is_err());
    }

    #[tokio::test]
    async fn test_load_available_and_cached() {
        let fetcher = StaticFetcher::new().with_response("/r.geojson", 200, LINE_FEATURE);
        let loader = OverlayLoader::new(fetcher, OverlayConfig::default());

        let first = loader.load(Some("/r.geojson")).await;
        assert!(first.is_available());
        let second = loader.load(Some("/r.geojson")).await;
        assert_eq!(first, second);
        assert_eq!(loader.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_reference_change_clears_cache() {
        let fetcher = StaticFetcher::new()
            .with_response("/a.geojson", 200, LINE_FEATURE)
            .with_response("/b.geojson", 200, LINE_FEATURE);
        let loader = OverlayLoader::new(fetcher, OverlayConfig::default());

        loader.load(Some("/a.geojson")).await;
        assert!(loader.cached("/a.geojson").is_some());

        loader.set_reference(Some("/b.geojson"));
        assert!(loader.cached("/a.geojson").is_none());

        loader.load(Some("/a.geojson")).await;
        loader.set_reference(None);
        assert!(loader.cached("/a.geojson").is_none());
        assert_eq!(loader.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_resolve_unavailable() {
        let fetcher = StaticFetcher::new()
            .with_response("/html", 200, "<html></html>")
            .with_response("/server-error", 500, "oops");
        let loader = OverlayLoader::new(fetcher, OverlayConfig::default());

        assert_eq!(
            loader.load(None).await,
            OverlayOutcome::Unavailable(UnavailableReason::MissingReference)
        );
        assert_eq!(
            loader.load(Some("/missing")).await,
            OverlayOutcome::Unavailable(UnavailableReason::Status(404))
        );
        assert_eq!(
            loader.load(Some("/server-error")).await,
            OverlayOutcome::Unavailable(UnavailableReason::Status(500))
        );
        assert!(matches!(
            loader.load(Some("/html")).await,
            OverlayOutcome::Unavailable(UnavailableReason::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_network_error_unavailable() {
        let fetcher = StaticFetcher::new().failing_with("connection refused");
        let loader = OverlayLoader::new(fetcher, OverlayConfig::default());
        assert!(matches!(
            loader.load(Some("/r.geojson")).await,
            OverlayOutcome::Unavailable(UnavailableReason::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_and_is_not_cached() {
        let fetcher = StaticFetcher::new()
            .with_response("/slow", 200, LINE_FEATURE)
            .with_delay(Duration::from_millis(500));
        let loader = OverlayLoader::new(fetcher, OverlayConfig { timeout_ms: 20 });

        let start = Instant::now();
        assert_eq!(
            loader.load(Some("/slow")).await,
            OverlayOutcome::Unavailable(UnavailableReason::TimedOut)
        );
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(loader.cached("/slow").is_none());
    }
}
