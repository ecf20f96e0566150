//! Itinerary normalization.
//!
//! Flattens day-grouped raw stops into one ordered, validated sequence of
//! [`Step`]s. Bad records are skipped with a [`Diagnostic`]; they never abort
//! the batch.
//!
//! ## Rules
//! 1. Day groups are sorted by day (stable, input untouched)
//! 2. `step_index` is the location's position within its day, in input order
//! 3. Coordinates are coerced to numbers; NaN or out-of-range drops the record
//! 4. Labels resolve city > name > label > "Day N"
//! 5. Repeated `(day, id)` keys are suffixed `#2`, `#3`, ... (skipping any
//!    suffixed id already in use) so every marker key stays unique

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::input::{DayGroup, RawLocation};
use crate::{LngLat, Step};

/// Why a record was dropped or altered.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticReason {
    /// Coordinate is not a number
    NotANumber { field: &'static str },
    /// Coordinate is a number outside its valid range
    OutOfRange { field: &'static str, value: f64 },
    /// Day is missing, fractional or below 1
    InvalidDay,
    /// Same `(day, id)` seen before; the record was kept under a new id
    DuplicateId { renamed_to: String },
}

/// One normalization finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub day: Option<u32>,
    /// Position of the record within its raw day group
    pub index: usize,
    pub id: String,
    pub reason: DiagnosticReason,
}

impl Diagnostic {
    /// True if the record did not become a step.
    pub fn is_dropped(&self) -> bool {
        !matches!(self.reason, DiagnosticReason::DuplicateId { .. })
    }
}

/// Stable fingerprint of a step sequence.
///
/// Two inputs that normalize to the same steps share a key, however they were
/// constructed, so consumers can skip rebuilds on equal-but-new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey(blake3::Hash);

impl ContentKey {
    pub fn of_steps(steps: &[Step]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for step in steps {
            hasher.update(&step.day.to_le_bytes());
            hasher.update(&step.step_index.to_le_bytes());
            hasher.update(&(step.id.len() as u64).to_le_bytes());
            hasher.update(step.id.as_bytes());
            hasher.update(&step.lng.to_bits().to_le_bytes());
            hasher.update(&step.lat.to_bits().to_le_bytes());
            hasher.update(&(step.label.len() as u64).to_le_bytes());
            hasher.update(step.label.as_bytes());
        }
        Self(hasher.finalize())
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

/// Result of normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Steps sorted by `(day, step_index)`
    pub steps: Vec<Step>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Normalized {
    pub fn content_key(&self) -> ContentKey {
        ContentKey::of_steps(&self.steps)
    }

    /// Number of raw records that did not become steps.
    pub fn dropped_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_dropped()).count()
    }
}

/// Normalize day groups into ordered steps.
///
/// # Example
/// ```
/// use itinerary_map::{normalize_day_groups, DayGroup, RawLocation};
///
/// let groups = vec![DayGroup::new(1, vec![
///     RawLocation::new("ok", 104.06, 30.67),
///     RawLocation::new("bad", 200.0, 10.0),
/// ])];
/// let normalized = normalize_day_groups(&groups);
/// assert_eq!(normalized.steps.len(), 1);
/// assert_eq!(normalized.diagnostics.len(), 1);
/// ```
pub fn normalize_day_groups(groups: &[DayGroup]) -> Normalized {
    let mut diagnostics = Vec::new();

    // Resolve days first so sorting never touches the caller's data
    let mut ordered: Vec<(u32, &DayGroup)> = Vec::with_capacity(groups.len());
    for group in groups {
        match parse_day(group.day.to_f64()) {
            Some(day) => ordered.push((day, group)),
            None => {
                for (index, location) in group.locations.iter().enumerate() {
                    diagnostics.push(Diagnostic {
                        day: None,
                        index,
                        id: location.id.as_string(),
                        reason: DiagnosticReason::InvalidDay,
                    });
                }
            }
        }
    }
    ordered.sort_by_key(|(day, _)| *day);

    let mut steps = Vec::new();
    let mut used: HashSet<(u32, String)> = HashSet::new();
    let mut next_suffix: HashMap<(u32, String), u32> = HashMap::new();
    // Steps from two groups with the same day continue the day's numbering
    let mut next_index: HashMap<u32, u32> = HashMap::new();

    for (day, group) in ordered {
        for (index, location) in group.locations.iter().enumerate() {
            let raw_id = location.id.as_string();
            let position = match coerce_position(location) {
                Ok(position) => position,
                Err(reason) => {
                    diagnostics.push(Diagnostic {
                        day: Some(day),
                        index,
                        id: raw_id,
                        reason,
                    });
                    continue;
                }
            };

            let id = if used.contains(&(day, raw_id.clone())) {
                let suffix = next_suffix.entry((day, raw_id.clone())).or_insert(1);
                // The suffixed id may itself be taken by a later raw record
                let renamed = loop {
                    *suffix += 1;
                    let candidate = format!("{}#{}", raw_id, suffix);
                    if !used.contains(&(day, candidate.clone())) {
                        break candidate;
                    }
                };
                diagnostics.push(Diagnostic {
                    day: Some(day),
                    index,
                    id: raw_id.clone(),
                    reason: DiagnosticReason::DuplicateId {
                        renamed_to: renamed.clone(),
                    },
                });
                renamed
            } else {
                raw_id
            };
            used.insert((day, id.clone()));

            let step_index = next_index.entry(day).or_insert(0);
            steps.push(Step {
                day,
                step_index: *step_index,
                id,
                lng: position.lng,
                lat: position.lat,
                label: resolve_label(location, day),
                city: non_blank(location.city.as_deref()),
            });
            *step_index += 1;
        }
    }

    for d in &diagnostics {
        warn!("[Normalizer] Day {:?} location '{}' (#{}): {:?}", d.day, d.id, d.index, d.reason);
    }
    debug!(
        "[Normalizer] {} steps from {} groups, {} diagnostics",
        steps.len(),
        groups.len(),
        diagnostics.len()
    );

    Normalized { steps, diagnostics }
}

/// Normalize a single-location configuration: the first valid location
/// becomes the only step, on day 1.
pub fn normalize_single_location(locations: &[RawLocation]) -> Normalized {
    let mut diagnostics = Vec::new();

    for (index, location) in locations.iter().enumerate() {
        match coerce_position(location) {
            Ok(position) => {
                let step = Step {
                    day: 1,
                    step_index: 0,
                    id: location.id.as_string(),
                    lng: position.lng,
                    lat: position.lat,
                    label: resolve_label(location, 1),
                    city: non_blank(location.city.as_deref()),
                };
                return Normalized {
                    steps: vec![step],
                    diagnostics,
                };
            }
            Err(reason) => {
                warn!(
                    "[Normalizer] Location '{}' (#{}): {:?}",
                    location.id.as_string(),
                    index,
                    reason
                );
                diagnostics.push(Diagnostic {
                    day: Some(1),
                    index,
                    id: location.id.as_string(),
                    reason,
                });
            }
        }
    }

    Normalized {
        steps: Vec::new(),
        diagnostics,
    }
}

fn parse_day(raw: f64) -> Option<u32> {
    if raw.is_finite() && raw >= 1.0 && raw.fract() == 0.0 && raw <= u32::MAX as f64 {
        Some(raw as u32)
    } else {
        None
    }
}

fn coerce_position(location: &RawLocation) -> Result<LngLat, DiagnosticReason> {
    let lng = location.lng.to_f64();
    let lat = location.lat.to_f64();

    if lng.is_nan() {
        return Err(DiagnosticReason::NotANumber { field: "lng" });
    }
    if lat.is_nan() {
        return Err(DiagnosticReason::NotANumber { field: "lat" });
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(DiagnosticReason::OutOfRange {
            field: "lng",
            value: lng,
        });
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(DiagnosticReason::OutOfRange {
            field: "lat",
            value: lat,
        });
    }

    Ok(LngLat::new(lng, lat))
}

fn resolve_label(location: &RawLocation, day: u32) -> String {
    non_blank(location.city.as_deref())
        .or_else(|| non_blank(location.name.as_deref()))
        .or_else(|| non_blank(location.label.as_deref()))
        .unwrap_or_else(|| format!("Day {}", day))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
