//! In-memory doubles for the engine and the overlay transport.
//!
//! [`RecordingSurface`] keeps sources, layers, markers and camera transitions
//! in plain collections so tests (and hosts wiring up a new engine) can
//! assert on what the synchronization logic did.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::camera::CameraTransition;
use crate::error::{MapError, Result};
use crate::overlay::{OverlayFetcher, OverlayResponse};
use crate::surface::{
    LayerSpec, MapSurface, MarkerHandle, MarkerSpec, SourceData, SurfaceFactory, SurfaceOptions,
};

/// A marker as the recording surface holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMarker {
    pub spec: MarkerSpec,
    pub active: bool,
}

/// Engine double that records every capability call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    sources: BTreeMap<String, SourceData>,
    layers: Vec<LayerSpec>,
    markers: HashMap<MarkerHandle, RecordedMarker>,
    next_handle: u64,
    removed_markers: usize,
    source_writes: usize,
    transitions: Vec<CameraTransition>,
    released: Rc<Cell<bool>>,
    reject_markers: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `add_marker` call fail.
    pub fn rejecting_markers(mut self) -> Self {
        self.reject_markers = true;
        self
    }

    /// Drop everything a style swap discards: sources, layers and markers.
    pub fn simulate_style_reload(&mut self) {
        self.sources.clear();
        self.layers.clear();
        self.markers.clear();
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn removed_marker_count(&self) -> usize {
        self.removed_markers
    }

    pub fn marker(&self, handle: MarkerHandle) -> Option<&RecordedMarker> {
        self.markers.get(&handle)
    }

    pub fn is_marker_active(&self, handle: MarkerHandle) -> bool {
        self.markers.get(&handle).is_some_and(|m| m.active)
    }

    /// Labels of active markers, sorted.
    pub fn active_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .markers
            .values()
            .filter(|m| m.active)
            .map(|m| m.spec.label.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn source(&self, id: &str) -> Option<&SourceData> {
        self.sources.get(id)
    }

    /// Number of add/replace writes made to any source.
    pub fn source_writes(&self) -> usize {
        self.source_writes
    }

    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    pub fn transitions(&self) -> &[CameraTransition] {
        &self.transitions
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    fn check_live(&self) -> Result<()> {
        if self.released.get() {
            Err(MapError::engine("engine instance released"))
        } else {
            Ok(())
        }
    }
}

impl MapSurface for RecordingSurface {
    fn add_source(&mut self, id: &str, data: SourceData) -> Result<()> {
        self.check_live()?;
        if self.sources.contains_key(id) {
            return Err(MapError::engine(format!("source '{}' already exists", id)));
        }
        self.sources.insert(id.to_string(), data);
        self.source_writes += 1;
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: SourceData) -> Result<()> {
        self.check_live()?;
        match self.sources.get_mut(id) {
            Some(existing) => {
                *existing = data;
                self.source_writes += 1;
                Ok(())
            }
            None => Err(MapError::engine(format!("no source '{}'", id))),
        }
    }

    fn remove_source(&mut self, id: &str) -> Result<()> {
        self.check_live()?;
        if self.layers.iter().any(|l| l.source == id) {
            return Err(MapError::engine(format!("source '{}' is in use", id)));
        }
        self.sources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MapError::engine(format!("no source '{}'", id)))
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_layer(&mut self, layer: LayerSpec) -> Result<()> {
        self.check_live()?;
        if !self.sources.contains_key(&layer.source) {
            return Err(MapError::engine(format!("no source '{}'", layer.source)));
        }
        if self.has_layer(&layer.id) {
            return Err(MapError::engine(format!("layer '{}' already exists", layer.id)));
        }
        self.layers.push(layer);
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<()> {
        self.check_live()?;
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        if self.layers.len() == before {
            return Err(MapError::engine(format!("no layer '{}'", id)));
        }
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.id == id)
    }

    fn add_marker(&mut self, marker: MarkerSpec) -> Result<MarkerHandle> {
        self.check_live()?;
        if self.reject_markers {
            return Err(MapError::engine("marker rejected"));
        }
        self.next_handle += 1;
        let handle = MarkerHandle(self.next_handle);
        self.markers.insert(
            handle,
            RecordedMarker {
                spec: marker,
                active: false,
            },
        );
        Ok(handle)
    }

    fn remove_marker(&mut self, handle: MarkerHandle) -> Result<()> {
        self.check_live()?;
        // Markers discarded by a style reload are already gone
        if self.markers.remove(&handle).is_some() {
            self.removed_markers += 1;
        }
        Ok(())
    }

    fn set_marker_active(&mut self, handle: MarkerHandle, active: bool) -> Result<()> {
        self.check_live()?;
        match self.markers.get_mut(&handle) {
            Some(marker) => {
                marker.active = active;
                Ok(())
            }
            None => Err(MapError::engine(format!("no marker {:?}", handle))),
        }
    }

    fn transition_camera(&mut self, transition: CameraTransition) -> Result<()> {
        self.check_live()?;
        self.transitions.push(transition);
        Ok(())
    }

    fn release(&mut self) {
        self.markers.clear();
        self.released.set(true);
    }
}

/// Factory handing out [`RecordingSurface`]s.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    available: bool,
    fail_create: bool,
    created: Vec<SurfaceOptions>,
    released: Vec<Rc<Cell<bool>>>,
}

impl RecordingFactory {
    /// A factory whose engine runtime is already loaded.
    pub fn available() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    /// A factory whose engine runtime has not loaded yet.
    pub fn loading() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            available: true,
            fail_create: true,
            ..Self::default()
        }
    }

    /// Flip to available, as when the engine script finishes loading.
    pub fn set_available(&mut self) {
        self.available = true;
    }

    /// Options of every created surface, in order.
    pub fn created(&self) -> &[SurfaceOptions] {
        &self.created
    }

    /// Whether every surface created so far has been released.
    pub fn all_released(&self) -> bool {
        self.released.iter().all(|r| r.get())
    }
}

impl SurfaceFactory for RecordingFactory {
    type Surface = RecordingSurface;

    fn is_available(&self) -> bool {
        self.available
    }

    fn create(&mut self, options: &SurfaceOptions) -> Result<RecordingSurface> {
        if self.fail_create {
            return Err(MapError::engine("WebGL context unavailable"));
        }
        let surface = RecordingSurface::new();
        self.created.push(options.clone());
        self.released.push(Rc::clone(&surface.released));
        Ok(surface)
    }
}

/// Overlay transport serving canned responses. Unknown references get 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, (u16, String)>,
    delay: Option<Duration>,
    error: Option<String>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, reference: &str, status: u16, body: &str) -> Self {
        self.responses
            .insert(reference.to_string(), (status, body.to_string()));
        self
    }

    /// Delay every response, to exercise the loader's timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every request at the transport level.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl OverlayFetcher for StaticFetcher {
    async fn fetch(&self, reference: &str) -> Result<OverlayResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.error {
            return Err(MapError::Http {
                message: message.clone(),
                status_code: None,
            });
        }

        let (status, body) = self
            .responses
            .get(reference)
            .cloned()
            .unwrap_or((404, "Not Found".to_string()));
        Ok(OverlayResponse { status, body })
    }
}
