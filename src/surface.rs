//! Rendering engine facade.
//!
//! The map engine is an external, mutable resource. Everything in this crate
//! talks to it through [`MapSurface`], which covers exactly the capabilities
//! the synchronization logic needs: data sources, layers, markers and camera
//! transitions. Lifecycle notifications flow the other way as [`EngineEvent`]s
//! that the host forwards to the [`MapController`](crate::MapController).

use geo::{LineString, Polygon};

use crate::camera::CameraTransition;
use crate::error::Result;
use crate::LngLat;

/// Opaque handle to a marker placed on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerHandle(pub u64);

/// Geometry held by a data source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    Line(LineString<f64>),
    Area(Polygon<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Line,
    Fill,
}

/// A visual layer bound to a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub kind: LayerKind,
    /// CSS color string
    pub color: String,
    /// Line width in pixels (ignored for fills)
    pub width: f64,
    pub opacity: f64,
}

impl LayerSpec {
    pub fn line(id: &str, source: &str, color: &str, width: f64) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            kind: LayerKind::Line,
            color: color.to_string(),
            width,
            opacity: 1.0,
        }
    }

    pub fn fill(id: &str, source: &str, color: &str, opacity: f64) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            kind: LayerKind::Fill,
            color: color.to_string(),
            width: 0.0,
            opacity,
        }
    }
}

/// A marker to place: a small indicator dot plus a text label.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub position: LngLat,
    pub label: String,
    pub day: u32,
}

/// Options used to create the engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOptions {
    pub access_token: String,
    pub style_url: String,
    pub center: LngLat,
    pub zoom: f64,
}

/// Lifecycle and error notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Style finished loading for the first time
    Loaded,
    /// Style was swapped or reloaded; all sources, layers and markers are gone
    StyleReloaded,
    /// Runtime error reported by the engine
    Error(String),
}

/// Capability interface of the rendering engine.
///
/// Implementations wrap a real map engine; [`RecordingSurface`](crate::testing::RecordingSurface)
/// is an in-memory double.
pub trait MapSurface {
    /// Create a data source. Fails if the id is already in use.
    fn add_source(&mut self, id: &str, data: SourceData) -> Result<()>;

    /// Replace the contents of an existing data source.
    fn set_source_data(&mut self, id: &str, data: SourceData) -> Result<()>;

    fn remove_source(&mut self, id: &str) -> Result<()>;

    fn has_source(&self, id: &str) -> bool;

    /// Create a layer drawing an existing source.
    fn add_layer(&mut self, layer: LayerSpec) -> Result<()>;

    fn remove_layer(&mut self, id: &str) -> Result<()>;

    fn has_layer(&self, id: &str) -> bool;

    fn add_marker(&mut self, marker: MarkerSpec) -> Result<MarkerHandle>;

    fn remove_marker(&mut self, handle: MarkerHandle) -> Result<()>;

    /// Toggle the marker's active (highlighted) appearance.
    fn set_marker_active(&mut self, handle: MarkerHandle, active: bool) -> Result<()>;

    fn transition_camera(&mut self, transition: CameraTransition) -> Result<()>;

    /// Release the engine instance. No other call is made afterwards.
    fn release(&mut self);
}

/// Creates engine instances once the engine runtime is available.
pub trait SurfaceFactory {
    type Surface: MapSurface;

    /// Whether the engine runtime (script/library) has finished loading.
    fn is_available(&self) -> bool;

    fn create(&mut self, options: &SurfaceOptions) -> Result<Self::Surface>;
}

/// Add a source or replace its contents if it already exists.
pub(crate) fn upsert_source<S: MapSurface + ?Sized>(
    surface: &mut S,
    id: &str,
    data: SourceData,
) -> Result<()> {
    if surface.has_source(id) {
        surface.set_source_data(id, data)
    } else {
        surface.add_source(id, data)
    }
}

/// Add a layer unless one with the same id exists.
pub(crate) fn ensure_layer<S: MapSurface + ?Sized>(surface: &mut S, layer: LayerSpec) -> Result<()> {
    if surface.has_layer(&layer.id) {
        Ok(())
    } else {
        surface.add_layer(layer)
    }
}

/// Remove a layer and its source, tolerating either being absent.
pub(crate) fn remove_layer_and_source<S: MapSurface + ?Sized>(
    surface: &mut S,
    layer_ids: &[&str],
    source_id: &str,
) -> Result<()> {
    for id in layer_ids {
        if surface.has_layer(id) {
            surface.remove_layer(id)?;
        }
    }
    if surface.has_source(source_id) {
        surface.remove_source(source_id)?;
    }
    Ok(())
}
