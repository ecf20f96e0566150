//! Marker registry.
//!
//! One marker per step, keyed by `(day, id)`. Markers are never patched in
//! place: [`MarkerManager::initialize`] tears down the whole set and builds a
//! new one. The active highlight is derived from the active day on each
//! [`MarkerManager::highlight`] call rather than stored on the marker.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::surface::{MapSurface, MarkerHandle, MarkerSpec};
use crate::{Step, StepKey};

/// A placed marker and a copy of the step it points back to.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub handle: MarkerHandle,
    pub step: Step,
}

/// Registry of markers currently on the surface.
#[derive(Debug, Default)]
pub struct MarkerManager {
    markers: BTreeMap<StepKey, Marker>,
}

impl MarkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all markers with one per step.
    ///
    /// Existing markers are removed first (a no-op if there are none). A
    /// marker the surface refuses to place is logged and skipped; the rest
    /// are still created.
    pub fn initialize<S: MapSurface + ?Sized>(&mut self, surface: &mut S, steps: &[Step]) {
        self.clear(surface);

        for step in steps {
            let key = step.key();
            if self.markers.contains_key(&key) {
                warn!(
                    "[MarkerManager] Duplicate marker key day {} id '{}', skipping",
                    key.day, key.id
                );
                continue;
            }

            let spec = MarkerSpec {
                position: step.position(),
                label: step.label.clone(),
                day: step.day,
            };
            match surface.add_marker(spec) {
                Ok(handle) => {
                    self.markers.insert(
                        key,
                        Marker {
                            handle,
                            step: step.clone(),
                        },
                    );
                }
                Err(e) => warn!("[MarkerManager] Failed to place marker '{}': {}", step.id, e),
            }
        }

        debug!("[MarkerManager] Placed {} markers", self.markers.len());
    }

    /// Mark exactly the markers of `active_day` as active; clear the rest.
    pub fn highlight<S: MapSurface + ?Sized>(&self, surface: &mut S, active_day: Option<u32>) {
        for marker in self.markers.values() {
            let active = active_day == Some(marker.step.day);
            if let Err(e) = surface.set_marker_active(marker.handle, active) {
                warn!(
                    "[MarkerManager] Failed to update marker '{}': {}",
                    marker.step.id, e
                );
            }
        }
    }

    /// Remove every marker from the surface and the registry.
    pub fn clear<S: MapSurface + ?Sized>(&mut self, surface: &mut S) {
        for (_, marker) in std::mem::take(&mut self.markers) {
            if let Err(e) = surface.remove_marker(marker.handle) {
                warn!(
                    "[MarkerManager] Failed to remove marker '{}': {}",
                    marker.step.id, e
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, day: u32, id: &str) -> Option<&Marker> {
        self.markers.get(&StepKey {
            day,
            id: id.to_string(),
        })
    }

    /// Markers in `(day, id)` order.
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Check the registry against a step list: same count, every key present.
    pub fn matches_steps(&self, steps: &[Step]) -> bool {
        self.markers.len() == steps.len() && steps.iter().all(|s| self.markers.contains_key(&s.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSurface;

    fn step(day: u32, index: u32, id: &str) -> Step {
        Step {
            day,
            step_index: index,
            id: id.to_string(),
            lng: 100.0 + day as f64,
            lat: 30.0 + index as f64,
            label: format!("Stop {}", id),
            city: None,
        }
    }

    fn steps() -> Vec<Step> {
        vec![step(1, 0, "a"), step(1, 1, "b"), step(2, 0, "c"), step(3, 0, "d")]
    }

    #[test]
    fn test_one_marker_per_step() {
        let mut surface = RecordingSurface::new();
        let mut manager = MarkerManager::new();
        manager.initialize(&mut surface, &steps());

        assert_eq!(manager.len(), 4);
        assert_eq!(surface.marker_count(), 4);
        assert!(manager.matches_steps(&steps()));
        let label = &surface.marker(manager.get(2, "c").unwrap().handle).unwrap().spec.label;
        assert_eq!(label, "Stop c");
    }

    #[test]
    fn test_reinitialize_replaces_markers() {
        let mut surface = RecordingSurface::new();
        let mut manager = MarkerManager::new();
        manager.initialize(&mut surface, &steps());
        manager.initialize(&mut surface, &steps()[..2]);

        assert_eq!(manager.len(), 2);
        assert_eq!(surface.marker_count(), 2);
        assert_eq!(surface.removed_marker_count(), 4);
    }

    #[test]
    fn test_highlight_active_day_only() {
        let mut surface = RecordingSurface::new();
        let mut manager = MarkerManager::new();
        manager.initialize(&mut surface, &steps());

        manager.highlight(&mut surface, Some(1));
        let active: Vec<String> = manager
            .markers()
            .filter(|m| surface.is_marker_active(m.handle))
            .map(|m| m.step.id.clone())
            .collect();
        assert_eq!(active, vec!["a", "b"]);

        manager.highlight(&mut surface, Some(3));
        let active: Vec<String> = manager
            .markers()
            .filter(|m| surface.is_marker_active(m.handle))
            .map(|m| m.step.id.clone())
            .collect();
        assert_eq!(active, vec!["d"]);

        manager.highlight(&mut surface, None);
        assert!(manager.markers().all(|m| !surface.is_marker_active(m.handle)));
        assert_eq!(surface.marker_count(), 4);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut surface = RecordingSurface::new();
        let mut manager = MarkerManager::new();
        manager.clear(&mut surface);
        manager.initialize(&mut surface, &steps());
        manager.clear(&mut surface);
        manager.clear(&mut surface);

        assert!(manager.is_empty());
        assert_eq!(surface.marker_count(), 0);
    }

    #[test]
    fn test_rejected_markers_are_skipped() {
        let mut surface = RecordingSurface::new().rejecting_markers();
        let mut manager = MarkerManager::new();
        manager.initialize(&mut surface, &steps());

        assert!(manager.is_empty());
        assert_eq!(surface.marker_count(), 0);
        assert!(!manager.matches_steps(&steps()));

        // Highlighting an empty registry touches nothing
        manager.highlight(&mut surface, Some(1));
        assert!(surface.active_labels().is_empty());
    }

    #[test]
    fn test_empty_steps() {
        let mut surface = RecordingSurface::new();
        let mut manager = MarkerManager::new();
        manager.initialize(&mut surface, &[]);
        manager.highlight(&mut surface, Some(1));
        assert!(manager.is_empty());
    }
}
