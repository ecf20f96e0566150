//! # Map Controller
//!
//! Owns the rendering engine instance end to end and drives every other
//! component from host input and engine events.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --mount (engine not loaded)--> ScriptLoading
//! Uninitialized/ScriptLoading --engine available + token--> EngineReady
//! Uninitialized/ScriptLoading --engine available, no token--> Unconfigured
//! EngineReady --Loaded--> LayersInitialized
//! LayersInitialized --StyleReloaded--> LayersInitialized (full rebuild)
//! any --unmount--> Teardown
//! ```
//!
//! ## Failure Policy
//!
//! Nothing here returns an error to the host. A missing token is reported
//! through [`MapController::status_message`]; engine errors are logged and
//! counted while the map keeps its last good state.
//!
//! ## Overlays
//!
//! Overlay fetches happen outside the controller. The host asks for an
//! [`OverlayRequest`], loads it (see [`OverlayLoader`]) and hands the outcome
//! back with [`MapController::apply_overlay`]. Results for a superseded
//! reference, or arriving after teardown, are discarded. Rendering never
//! waits on the overlay: the generated curve is drawn first and replaced
//! when an overlay arrives.

use std::sync::Arc;

use geo::LineString;
use log::{debug, info, warn};

use crate::camera::{zoom_for_radius, CameraDirector, CameraTransition};
use crate::config::MapConfig;
use crate::error::MapError;
use crate::geometry::{activity_circle, build_route_path};
use crate::input::HostInput;
use crate::markers::MarkerManager;
use crate::normalize::{
    normalize_day_groups, normalize_single_location, ContentKey, Diagnostic, Normalized,
};
use crate::overlay::{
    OverlayFetcher, OverlayLoader, OverlayOutcome, RouteOverlay, UnavailableReason,
};
use crate::surface::{
    ensure_layer, remove_layer_and_source, upsert_source, EngineEvent, LayerSpec, MapSurface,
    SourceData, SurfaceFactory, SurfaceOptions,
};
use crate::{Bounds, DayGroup, Mode, RawLocation, Step};

pub const ROUTE_SOURCE: &str = "itinerary-route";
pub const ROUTE_LAYER: &str = "itinerary-route-line";
pub const AREA_SOURCE: &str = "activity-area";
pub const AREA_FILL_LAYER: &str = "activity-area-fill";
pub const AREA_OUTLINE_LAYER: &str = "activity-area-outline";

const ROUTE_COLOR: &str = "#e8590c";
const AREA_COLOR: &str = "#1c7ed6";
const CIRCLE_VERTICES: usize = 64;

const UNCONFIGURED_MESSAGE: &str =
    "Map unavailable: no map access token is configured for this site.";

/// Lifecycle state of the engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    /// Waiting for the engine runtime to load
    ScriptLoading,
    /// No access token; terminal until reconfigured
    Unconfigured,
    /// Engine instance exists, style not loaded yet
    EngineReady,
    LayersInitialized,
    Teardown,
}

/// An overlay load the host should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    pub reference: String,
    generation: u64,
}

/// What a batch of state changes needs redrawn.
#[derive(Debug, Default, Clone, Copy)]
struct Changes {
    steps: bool,
    route: bool,
    highlight: bool,
    camera: bool,
}

impl Changes {
    fn any(&self) -> bool {
        self.steps || self.route || self.highlight || self.camera
    }
}

/// Owner of the engine instance and all map state.
pub struct MapController<F: SurfaceFactory> {
    config: MapConfig,
    factory: F,
    surface: Option<F::Surface>,
    state: LifecycleState,
    status_message: Option<String>,

    // Itinerary state
    mode: Mode,
    radius_km: Option<f64>,
    steps: Vec<Step>,
    diagnostics: Vec<Diagnostic>,
    content_key: Option<ContentKey>,
    active_day: Option<u32>,
    current_day: Option<u32>,

    // Overlay state
    overlay_reference: Option<String>,
    overlay: Option<Arc<RouteOverlay>>,
    overlay_generation: u64,
    overlay_settled: bool,

    // Rendered state
    markers: MarkerManager,
    camera: CameraDirector,
    rendered_route: Option<LineString<f64>>,
    engine_errors: usize,
}

impl<F: SurfaceFactory> MapController<F> {
    pub fn new(config: MapConfig, factory: F) -> Self {
        let camera = CameraDirector::new(config.camera.clone());
        Self {
            config,
            factory,
            surface: None,
            state: LifecycleState::Uninitialized,
            status_message: None,
            mode: Mode::default(),
            radius_km: None,
            steps: Vec::new(),
            diagnostics: Vec::new(),
            content_key: None,
            active_day: None,
            current_day: None,
            overlay_reference: None,
            overlay: None,
            overlay_generation: 0,
            overlay_settled: false,
            markers: MarkerManager::new(),
            camera,
            rendered_route: None,
            engine_errors: 0,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mount the map: create the engine now if its runtime is loaded,
    /// otherwise wait in `ScriptLoading`.
    pub fn mount(&mut self) {
        if self.state != LifecycleState::Uninitialized {
            debug!("[MapController] mount ignored in {:?}", self.state);
            return;
        }

        if self.factory.is_available() {
            self.create_engine();
        } else {
            info!("[MapController] Engine runtime not loaded yet, waiting");
            self.state = LifecycleState::ScriptLoading;
        }
    }

    /// The engine runtime finished loading.
    pub fn on_engine_available(&mut self) {
        if self.state == LifecycleState::ScriptLoading {
            self.create_engine();
        } else {
            debug!("[MapController] engine availability ignored in {:?}", self.state);
        }
    }

    /// Forward an engine lifecycle or error event.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Loaded => match self.state {
                LifecycleState::EngineReady => {
                    self.camera.reset();
                    self.initialize_layers();
                    self.state = LifecycleState::LayersInitialized;
                    info!(
                        "[MapController] Layers initialized ({} steps, {:?})",
                        self.steps.len(),
                        self.mode
                    );
                }
                state => debug!("[MapController] Loaded ignored in {:?}", state),
            },
            EngineEvent::StyleReloaded => match self.state {
                LifecycleState::EngineReady | LifecycleState::LayersInitialized => {
                    info!("[MapController] Style reloaded, rebuilding layers and markers");
                    self.teardown_layers();
                    self.initialize_layers();
                    self.state = LifecycleState::LayersInitialized;
                }
                state => debug!("[MapController] StyleReloaded ignored in {:?}", state),
            },
            EngineEvent::Error(message) => {
                self.record_engine_error(&MapError::engine(message));
            }
        }
    }

    /// Remove all markers and release the engine instance.
    pub fn unmount(&mut self) {
        if self.state == LifecycleState::Teardown {
            return;
        }

        if let Some(mut surface) = self.surface.take() {
            self.markers.clear(&mut surface);
            surface.release();
        }
        self.rendered_route = None;
        // In-flight overlay results must not land after this point
        self.overlay_generation += 1;
        self.state = LifecycleState::Teardown;
        info!("[MapController] Torn down");
    }

    fn create_engine(&mut self) {
        let Some(token) = self.config.access_token().map(str::to_string) else {
            warn!("[MapController] {}", MapError::MissingAccessToken);
            self.status_message = Some(UNCONFIGURED_MESSAGE.to_string());
            self.state = LifecycleState::Unconfigured;
            return;
        };

        let points: Vec<_> = self.steps.iter().map(Step::position).collect();
        let center = Bounds::from_points(&points)
            .map(|b| b.center())
            .unwrap_or(self.config.default_center);
        let options = SurfaceOptions {
            access_token: token,
            style_url: self.config.style_url.clone(),
            center,
            zoom: self.config.default_zoom,
        };

        match self.factory.create(&options) {
            Ok(surface) => {
                self.surface = Some(surface);
                self.status_message = None;
                self.state = LifecycleState::EngineReady;
                info!("[MapController] Engine created at {:?}", center);
            }
            Err(e) => {
                // Stay where we are; a later availability signal can retry
                self.record_engine_error(&e);
                self.state = LifecycleState::ScriptLoading;
            }
        }
    }

    // ========================================================================
    // Host Input
    // ========================================================================

    /// Apply a full host snapshot, redrawing only what changed.
    pub fn update_input(&mut self, input: &HostInput) {
        let mut changes = Changes::default();

        if input.mode != self.mode {
            info!("[MapController] Mode {:?} -> {:?}", self.mode, input.mode);
            self.mode = input.mode;
            self.content_key = None;
            self.rendered_route = None;
            if let Some(surface) = self.surface.as_mut() {
                Self::remove_mode_layers(surface, &mut self.engine_errors);
            }
            changes.steps = true;
        }

        if input.radius != self.radius_km {
            self.radius_km = input.radius;
            if self.mode == Mode::SingleLocation {
                self.camera.reset();
                changes.steps = true;
            }
        }

        let normalized = match self.mode {
            Mode::MultiStopRoute => normalize_day_groups(&input.day_groups()),
            Mode::SingleLocation => {
                let flat: Vec<RawLocation> = if input.locations.is_empty() {
                    input
                        .day_locations
                        .iter()
                        .flat_map(|g| g.locations.iter().cloned())
                        .collect()
                } else {
                    input.locations.clone()
                };
                normalize_single_location(&flat)
            }
        };
        changes.steps |= self.replace_steps(normalized);

        changes.route |= self.set_reference(input.overlay_reference());
        self.apply_days(input.current_day, input.active_day, &mut changes);

        self.sync(changes);
    }

    /// Replace the itinerary (multi-stop mode).
    pub fn set_itinerary(&mut self, groups: &[DayGroup]) {
        let changed = self.replace_steps(normalize_day_groups(groups));
        self.sync(Changes {
            steps: changed,
            ..Changes::default()
        });
    }

    /// Set the day in focus. Unchanged values are a no-op.
    pub fn set_active_day(&mut self, active_day: Option<u32>) {
        let mut changes = Changes::default();
        self.apply_days(self.current_day, active_day, &mut changes);
        self.sync(changes);
    }

    /// Set the progressive-reveal cutoff.
    pub fn set_current_day(&mut self, current_day: Option<u32>) {
        let mut changes = Changes::default();
        self.apply_days(current_day, self.active_day, &mut changes);
        self.sync(changes);
    }

    /// Set or clear the overlay reference.
    pub fn set_overlay_reference(&mut self, reference: Option<&str>) {
        let route = self.set_reference(reference);
        self.sync(Changes {
            route,
            ..Changes::default()
        });
    }

    fn replace_steps(&mut self, normalized: Normalized) -> bool {
        let key = normalized.content_key();
        if self.content_key == Some(key) {
            return false;
        }

        debug!(
            "[MapController] Steps rebuilt: {} steps, key {}",
            normalized.steps.len(),
            &key.to_hex()[..12]
        );
        self.steps = normalized.steps;
        self.diagnostics = normalized.diagnostics;
        self.content_key = Some(key);
        self.camera.reset();
        true
    }

    fn apply_days(&mut self, current_day: Option<u32>, active_day: Option<u32>, changes: &mut Changes) {
        let old_cutoff = self.route_cutoff_value();
        if active_day != self.active_day {
            self.active_day = active_day;
            changes.highlight = true;
            changes.camera = true;
        }
        self.current_day = current_day;
        if self.route_cutoff_value() != old_cutoff {
            changes.route = true;
            changes.camera = true;
        }
    }

    /// Returns true if the route must be redrawn.
    fn set_reference(&mut self, reference: Option<&str>) -> bool {
        if self.overlay_reference.as_deref() == reference {
            return false;
        }

        debug!("[MapController] Overlay reference -> {:?}", reference);
        self.overlay_reference = reference.map(str::to_string);
        self.overlay_generation += 1;
        self.overlay_settled = false;
        // A dropped overlay falls back to the generated curve
        self.overlay.take().is_some()
    }

    // ========================================================================
    // Overlays
    // ========================================================================

    /// The overlay load the host should run next, if any.
    pub fn overlay_request(&self) -> Option<OverlayRequest> {
        if self.state == LifecycleState::Teardown
            || self.mode != Mode::MultiStopRoute
            || self.overlay_settled
        {
            return None;
        }
        self.overlay_reference.as_ref().map(|reference| OverlayRequest {
            reference: reference.clone(),
            generation: self.overlay_generation,
        })
    }

    /// Deliver the outcome of an overlay load.
    ///
    /// Returns true if the outcome was accepted. Stale results (reference
    /// changed since the request, or the map was torn down) are dropped.
    pub fn apply_overlay(&mut self, request: &OverlayRequest, outcome: OverlayOutcome) -> bool {
        if self.state == LifecycleState::Teardown
            || request.generation != self.overlay_generation
            || self.overlay_reference.as_deref() != Some(request.reference.as_str())
        {
            debug!(
                "[MapController] Discarding stale overlay result for {}",
                request.reference
            );
            return false;
        }

        // A timed-out load may still succeed on a later attempt
        self.overlay_settled = outcome != OverlayOutcome::Unavailable(UnavailableReason::TimedOut);
        match outcome {
            OverlayOutcome::Available(overlay) => {
                self.overlay = Some(overlay);
                self.sync(Changes {
                    route: true,
                    ..Changes::default()
                });
            }
            OverlayOutcome::Unavailable(reason) => {
                debug!(
                    "[MapController] Overlay {} unavailable: {:?}",
                    request.reference, reason
                );
            }
        }
        true
    }

    /// Run the pending overlay load (if any) through `loader` and apply it.
    ///
    /// The controller stays mutably borrowed until the load resolves, which
    /// can take up to the loader's timeout. Hosts that keep feeding active-day
    /// updates while a load is in flight should use [`overlay_request`] and
    /// [`apply_overlay`] instead, running the load without holding the
    /// controller.
    ///
    /// [`overlay_request`]: MapController::overlay_request
    /// [`apply_overlay`]: MapController::apply_overlay
    pub async fn sync_overlay<Fe: OverlayFetcher>(&mut self, loader: &OverlayLoader<Fe>) -> bool {
        loader.set_reference(self.overlay_reference.as_deref());
        let Some(request) = self.overlay_request() else {
            return false;
        };
        let outcome = loader.load(Some(request.reference.as_str())).await;
        self.apply_overlay(&request, outcome)
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    fn sync(&mut self, changes: Changes) {
        if self.state != LifecycleState::LayersInitialized || !changes.any() {
            return;
        }
        let cutoff = self.route_cutoff_value();
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        if changes.steps {
            self.markers.initialize(surface, &self.steps);
            Self::render_mode_layers(
                surface,
                &self.config,
                self.mode,
                self.radius_km,
                &self.steps,
                cutoff,
                self.overlay.as_deref(),
                &mut self.rendered_route,
                &mut self.engine_errors,
            );
        } else if changes.route && self.mode == Mode::MultiStopRoute {
            Self::render_route(
                surface,
                &self.config,
                &self.steps,
                cutoff,
                self.overlay.as_deref(),
                &mut self.rendered_route,
                &mut self.engine_errors,
            );
        }

        if changes.steps || changes.highlight {
            self.markers.highlight(surface, self.active_day);
        }

        if changes.steps || changes.camera {
            self.update_camera();
        }
    }

    fn initialize_layers(&mut self) {
        let cutoff = self.route_cutoff_value();
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        self.markers.initialize(surface, &self.steps);
        self.markers.highlight(surface, self.active_day);
        Self::render_mode_layers(
            surface,
            &self.config,
            self.mode,
            self.radius_km,
            &self.steps,
            cutoff,
            self.overlay.as_deref(),
            &mut self.rendered_route,
            &mut self.engine_errors,
        );
        self.update_camera();
    }

    fn teardown_layers(&mut self) {
        self.rendered_route = None;
        if let Some(surface) = self.surface.as_mut() {
            self.markers.clear(surface);
            Self::remove_mode_layers(surface, &mut self.engine_errors);
        }
    }

    fn update_camera(&mut self) {
        let cutoff = self.route_cutoff_value();
        let transition = match self.mode {
            Mode::MultiStopRoute => self.camera.update(&self.steps, cutoff, self.active_day),
            Mode::SingleLocation => match self.steps.first() {
                Some(step) => {
                    let radius = self.radius_km.unwrap_or(self.config.default_radius_km);
                    self.camera.focus(step.position(), zoom_for_radius(radius))
                }
                None => None,
            },
        };

        if let Some(transition) = transition {
            self.execute_camera(transition);
        }
    }

    fn execute_camera(&mut self, transition: CameraTransition) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        if let Err(e) = surface.transition_camera(transition) {
            Self::log_engine_error(&mut self.engine_errors, &e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_mode_layers(
        surface: &mut F::Surface,
        config: &MapConfig,
        mode: Mode,
        radius_km: Option<f64>,
        steps: &[Step],
        cutoff: Option<u32>,
        overlay: Option<&RouteOverlay>,
        rendered_route: &mut Option<LineString<f64>>,
        errors: &mut usize,
    ) {
        match mode {
            Mode::MultiStopRoute => {
                Self::render_route(surface, config, steps, cutoff, overlay, rendered_route, errors)
            }
            Mode::SingleLocation => Self::render_area(surface, config, radius_km, steps, errors),
        }
    }

    fn render_route(
        surface: &mut F::Surface,
        config: &MapConfig,
        steps: &[Step],
        cutoff: Option<u32>,
        overlay: Option<&RouteOverlay>,
        rendered_route: &mut Option<LineString<f64>>,
        errors: &mut usize,
    ) {
        let path = build_route_path(steps, cutoff, overlay, &config.curve);
        if path == *rendered_route && (path.is_none() || surface.has_source(ROUTE_SOURCE)) {
            return;
        }

        let result = match &path {
            Some(line) => upsert_source(surface, ROUTE_SOURCE, SourceData::Line(line.clone()))
                .and_then(|_| {
                    ensure_layer(
                        surface,
                        LayerSpec::line(ROUTE_LAYER, ROUTE_SOURCE, ROUTE_COLOR, 3.0),
                    )
                }),
            None => remove_layer_and_source(surface, &[ROUTE_LAYER], ROUTE_SOURCE),
        };

        match result {
            Ok(()) => {
                debug!(
                    "[MapController] Route committed: {} points{}",
                    path.as_ref().map_or(0, |l| l.0.len()),
                    if overlay.is_some() { " (overlay)" } else { "" }
                );
                *rendered_route = path;
            }
            Err(e) => Self::log_engine_error(errors, &e),
        }
    }

    fn render_area(
        surface: &mut F::Surface,
        config: &MapConfig,
        radius_km: Option<f64>,
        steps: &[Step],
        errors: &mut usize,
    ) {
        let result = match steps.first() {
            Some(step) => {
                let radius = radius_km.unwrap_or(config.default_radius_km);
                let circle = activity_circle(step.position(), radius, CIRCLE_VERTICES);
                upsert_source(surface, AREA_SOURCE, SourceData::Area(circle))
                    .and_then(|_| {
                        ensure_layer(
                            surface,
                            LayerSpec::fill(AREA_FILL_LAYER, AREA_SOURCE, AREA_COLOR, 0.15),
                        )
                    })
                    .and_then(|_| {
                        ensure_layer(
                            surface,
                            LayerSpec::line(AREA_OUTLINE_LAYER, AREA_SOURCE, AREA_COLOR, 2.0),
                        )
                    })
            }
            None => remove_layer_and_source(
                surface,
                &[AREA_FILL_LAYER, AREA_OUTLINE_LAYER],
                AREA_SOURCE,
            ),
        };

        if let Err(e) = result {
            Self::log_engine_error(errors, &e);
        }
    }

    fn remove_mode_layers(surface: &mut F::Surface, errors: &mut usize) {
        let result = remove_layer_and_source(surface, &[ROUTE_LAYER], ROUTE_SOURCE).and_then(
            |_| {
                remove_layer_and_source(
                    surface,
                    &[AREA_FILL_LAYER, AREA_OUTLINE_LAYER],
                    AREA_SOURCE,
                )
            },
        );
        if let Err(e) = result {
            Self::log_engine_error(errors, &e);
        }
    }

    fn record_engine_error(&mut self, error: &MapError) {
        Self::log_engine_error(&mut self.engine_errors, error);
    }

    fn log_engine_error(errors: &mut usize, error: &MapError) {
        *errors += 1;
        warn!("[MapController] {} (keeping last good state)", error);
    }

    fn route_cutoff_value(&self) -> Option<u32> {
        self.current_day.or(self.active_day)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Message to show in place of the map, if it cannot be shown.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Diagnostics from the last step rebuild.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn content_key(&self) -> Option<ContentKey> {
        self.content_key
    }

    pub fn active_day(&self) -> Option<u32> {
        self.active_day
    }

    /// Day up to which the route is drawn (`None` = all days).
    pub fn route_cutoff(&self) -> Option<u32> {
        self.route_cutoff_value()
    }

    pub fn overlay(&self) -> Option<&RouteOverlay> {
        self.overlay.as_deref()
    }

    pub fn markers(&self) -> &MarkerManager {
        &self.markers
    }

    /// The path last committed to the route source.
    pub fn rendered_route(&self) -> Option<&LineString<f64>> {
        self.rendered_route.as_ref()
    }

    pub fn surface(&self) -> Option<&F::Surface> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut F::Surface> {
        self.surface.as_mut()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    pub fn engine_error_count(&self) -> usize {
        self.engine_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingFactory;
    use crate::{LngLat, RawLocation};

    fn config() -> MapConfig {
        MapConfig::default().with_access_token(Some("pk.test".to_string()))
    }

    fn groups() -> Vec<DayGroup> {
        vec![
            DayGroup::new(1, vec![RawLocation::new("a", 104.06, 30.67)]),
            DayGroup::new(2, vec![RawLocation::new("b", 103.90, 31.00)]),
        ]
    }

    fn ready_controller() -> MapController<RecordingFactory> {
        let mut controller = MapController::new(config(), RecordingFactory::available());
        controller.set_itinerary(&groups());
        controller.mount();
        controller.handle_event(EngineEvent::Loaded);
        controller
    }

    #[test]
    fn test_mount_waits_for_script() {
        let mut controller = MapController::new(config(), RecordingFactory::loading());
        controller.mount();
        assert_eq!(controller.state(), LifecycleState::ScriptLoading);
        assert!(controller.surface().is_none());

        controller.factory_mut().set_available();
        controller.on_engine_available();
        assert_eq!(controller.state(), LifecycleState::EngineReady);

        controller.handle_event(EngineEvent::Loaded);
        assert_eq!(controller.state(), LifecycleState::LayersInitialized);
    }

    #[test]
    fn test_missing_token_is_contained() {
        let mut controller = MapController::new(MapConfig::default(), RecordingFactory::available());
        controller.set_itinerary(&groups());
        controller.mount();

        assert_eq!(controller.state(), LifecycleState::Unconfigured);
        assert!(controller.status_message().unwrap().contains("access token"));
        assert!(controller.factory().created().is_empty());

        // Later events and input are harmless
        controller.handle_event(EngineEvent::Loaded);
        controller.set_active_day(Some(1));
        controller.unmount();
        assert_eq!(controller.state(), LifecycleState::Teardown);
    }

    #[test]
    fn test_engine_created_at_itinerary_center() {
        let controller = ready_controller();
        let options = &controller.factory().created()[0];
        assert_eq!(options.access_token, "pk.test");
        assert!((options.center.lng - 103.98).abs() < 1e-9);
    }

    #[test]
    fn test_create_failure_is_logged_not_raised() {
        let mut controller = MapController::new(config(), RecordingFactory::failing());
        controller.mount();
        assert_eq!(controller.state(), LifecycleState::ScriptLoading);
        assert_eq!(controller.engine_error_count(), 1);
    }

    #[test]
    fn test_layers_initialized_on_load() {
        let controller = ready_controller();
        let surface = controller.surface().unwrap();

        assert_eq!(surface.marker_count(), 2);
        assert!(surface.has_layer(ROUTE_LAYER));
        assert!(matches!(surface.source(ROUTE_SOURCE), Some(SourceData::Line(_))));
        // No active day: one bounds fit
        assert!(matches!(
            surface.transitions(),
            [CameraTransition::FitBounds { .. }]
        ));
    }

    #[test]
    fn test_equal_input_does_not_rebuild() {
        let mut controller = ready_controller();
        let writes = controller.surface().unwrap().source_writes();

        controller.set_itinerary(&groups());
        controller.set_itinerary(&groups());

        let surface = controller.surface().unwrap();
        assert_eq!(surface.removed_marker_count(), 0);
        assert_eq!(surface.source_writes(), writes);
        assert_eq!(surface.transitions().len(), 1);
    }

    #[test]
    fn test_active_day_drives_markers_and_camera() {
        let mut controller = ready_controller();

        controller.set_active_day(Some(2));
        controller.set_active_day(Some(2));

        let surface = controller.surface().unwrap();
        assert_eq!(surface.active_labels(), vec!["Day 2"]);
        let flights: Vec<&CameraTransition> = surface
            .transitions()
            .iter()
            .filter(|t| matches!(t, CameraTransition::FlyTo { .. }))
            .collect();
        assert_eq!(flights.len(), 1);
        assert!(matches!(
            flights[0],
            CameraTransition::FlyTo { center, .. } if *center == LngLat::new(103.90, 31.00)
        ));
    }

    #[test]
    fn test_style_reload_rebuilds_everything() {
        let mut controller = ready_controller();
        controller.set_active_day(Some(1));
        let transitions = controller.surface().unwrap().transitions().len();

        controller.surface_mut().unwrap().simulate_style_reload();
        controller.handle_event(EngineEvent::StyleReloaded);
        controller.handle_event(EngineEvent::StyleReloaded);

        let surface = controller.surface().unwrap();
        assert_eq!(controller.state(), LifecycleState::LayersInitialized);
        assert_eq!(surface.marker_count(), 2);
        assert_eq!(controller.markers().len(), 2);
        assert!(surface.has_layer(ROUTE_LAYER));
        assert_eq!(surface.active_labels(), vec!["Day 1"]);
        // Camera already at day 1
        assert_eq!(surface.transitions().len(), transitions);
    }

    #[test]
    fn test_engine_error_keeps_state() {
        let mut controller = ready_controller();
        controller.handle_event(EngineEvent::Error("tile fetch failed".to_string()));

        assert_eq!(controller.engine_error_count(), 1);
        assert_eq!(controller.state(), LifecycleState::LayersInitialized);
        assert_eq!(controller.surface().unwrap().marker_count(), 2);
    }

    #[test]
    fn test_unmount_releases_engine() {
        let mut controller = ready_controller();
        controller.unmount();

        assert_eq!(controller.state(), LifecycleState::Teardown);
        assert!(controller.surface().is_none());
        assert!(controller.markers().is_empty());
        assert!(controller.factory().all_released());

        // Events after teardown are ignored
        controller.handle_event(EngineEvent::StyleReloaded);
        controller.set_active_day(Some(1));
        assert_eq!(controller.state(), LifecycleState::Teardown);
    }

    #[test]
    fn test_zero_steps() {
        let mut controller = MapController::new(config(), RecordingFactory::available());
        controller.mount();
        controller.handle_event(EngineEvent::Loaded);
        controller.set_active_day(Some(1));

        let surface = controller.surface().unwrap();
        assert_eq!(surface.marker_count(), 0);
        assert!(surface.source(ROUTE_SOURCE).is_none());
        assert!(surface.transitions().is_empty());
        assert_eq!(controller.factory().created()[0].center, config().default_center);
    }

    #[test]
    fn test_itinerary_cleared_removes_route() {
        let mut controller = ready_controller();
        controller.set_itinerary(&[]);

        let surface = controller.surface().unwrap();
        assert_eq!(surface.marker_count(), 0);
        assert!(!surface.has_layer(ROUTE_LAYER));
        assert!(surface.source(ROUTE_SOURCE).is_none());
        assert!(controller.rendered_route().is_none());
    }

    #[test]
    fn test_single_location_mode() {
        let mut controller = MapController::new(config(), RecordingFactory::available());
        controller.update_input(&HostInput {
            mode: Mode::SingleLocation,
            locations: vec![RawLocation::new("hotel", 2.35, 48.85).with_name("Hotel Lutetia")],
            radius: Some(4.0),
            ..HostInput::default()
        });
        controller.mount();
        controller.handle_event(EngineEvent::Loaded);

        let surface = controller.surface().unwrap();
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.layer_ids(), vec![AREA_FILL_LAYER, AREA_OUTLINE_LAYER]);
        assert!(matches!(
            surface.transitions(),
            [CameraTransition::JumpTo { zoom, .. }] if *zoom == 12.0
        ));
        assert!(controller.overlay_request().is_none());
    }

    #[test]
    fn test_mode_switch_swaps_layers() {
        let mut controller = ready_controller();
        controller.update_input(&HostInput {
            mode: Mode::SingleLocation,
            locations: vec![RawLocation::new("hotel", 2.35, 48.85)],
            ..HostInput::default()
        });

        let surface = controller.surface().unwrap();
        assert!(!surface.has_layer(ROUTE_LAYER));
        assert!(surface.has_layer(AREA_FILL_LAYER));
        assert_eq!(surface.marker_count(), 1);
    }

    #[test]
    fn test_overlay_without_steps_draws_nothing() {
        let mut controller = MapController::new(config(), RecordingFactory::available());
        controller.mount();
        controller.handle_event(EngineEvent::Loaded);
        controller.set_overlay_reference(Some("/a.geojson"));
        let request = controller.overlay_request().unwrap();

        let overlay = RouteOverlay::new(vec![LngLat::new(0.0, 0.0), LngLat::new(1.0, 1.0)]).unwrap();
        assert!(controller.apply_overlay(&request, OverlayOutcome::Available(Arc::new(overlay))));

        let surface = controller.surface().unwrap();
        assert!(controller.steps().is_empty());
        assert!(surface.source(ROUTE_SOURCE).is_none());
        assert!(!surface.has_layer(ROUTE_LAYER));
        assert!(controller.rendered_route().is_none());
    }

    #[test]
    fn test_colliding_duplicate_ids_keep_one_marker_per_step() {
        let mut controller = MapController::new(config(), RecordingFactory::available());
        controller.set_itinerary(&[DayGroup::new(
            1,
            vec![
                RawLocation::new("a", 1.0, 1.0),
                RawLocation::new("a", 2.0, 2.0),
                RawLocation::new("a#2", 3.0, 3.0),
            ],
        )]);
        controller.mount();
        controller.handle_event(EngineEvent::Loaded);

        assert_eq!(controller.steps().len(), 3);
        assert_eq!(controller.markers().len(), 3);
        assert!(controller.markers().matches_steps(controller.steps()));
        assert_eq!(controller.surface().unwrap().marker_count(), 3);
    }

    #[test]
    fn test_stale_overlay_discarded() {
        let mut controller = ready_controller();
        controller.set_overlay_reference(Some("/a.geojson"));
        let request = controller.overlay_request().unwrap();

        controller.set_overlay_reference(Some("/b.geojson"));
        let overlay = RouteOverlay::new(vec![LngLat::new(0.0, 0.0), LngLat::new(1.0, 1.0)]).unwrap();
        assert!(!controller.apply_overlay(&request, OverlayOutcome::Available(Arc::new(overlay))));
        assert!(controller.overlay().is_none());
    }
}
