//! Geofence classification: which lane(s) or junction a footprint occupies.
//!
//! Junctions take strict priority over lanes: if a footprint touches both,
//! only the junction hits are returned. A zero Euclidean distance counts as
//! containment, so touching a polygon boundary is enough to match.

use geo::{EuclideanDistance, Polygon};
use serde::{Deserialize, Serialize};

use crate::map_index::{LaneTurn, MapIndex};

/// How far a drifted footprint may sit from the nearest geofence and still
/// be snapped onto it.
pub const NEAREST_LANE_TOLERANCE: f64 = 5.0;

/// One lane matched by a footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneHit {
    pub lane_id: String,
    pub turn: LaneTurn,
    /// Road member-lane count, with the leftmost-lane flag offset applied.
    pub lane_number: u32,
}

/// Result of a containment query. A footprint straddling two lanes yields
/// multiple lane hits; junction hits suppress lane hits entirely.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Lanes(Vec<LaneHit>),
    Junctions(Vec<String>),
}

/// Area kind tag carried on frames and obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Lane,
    Junction,
}

impl MapIndex {
    /// Classify a footprint against every junction and lane geofence.
    ///
    /// Lanes without polygons never match. Returns `None` when the footprint
    /// touches nothing.
    pub fn locate(&self, footprint: &Polygon<f64>) -> Option<Classification> {
        let junction_hits: Vec<String> = self
            .junctions()
            .filter(|j| footprint.euclidean_distance(&j.polygon) == 0.0)
            .map(|j| j.id.clone())
            .collect();
        if !junction_hits.is_empty() {
            return Some(Classification::Junctions(junction_hits));
        }

        let lane_hits: Vec<LaneHit> = self
            .lanes()
            .filter_map(|lane| {
                let polygon = lane.polygon.as_ref()?;
                (footprint.euclidean_distance(polygon) == 0.0).then(|| LaneHit {
                    lane_id: lane.id.clone(),
                    turn: lane.turn,
                    lane_number: self.lane_count_on_road(&lane.id),
                })
            })
            .collect();
        if !lane_hits.is_empty() {
            return Some(Classification::Lanes(lane_hits));
        }
        None
    }

    /// Fallback for footprints that match nothing: the nearest lane or
    /// junction within [`NEAREST_LANE_TOLERANCE`], tolerating small
    /// localization drift. `None` when everything is farther away.
    pub fn nearest_area(&self, footprint: &Polygon<f64>) -> Option<(String, AreaKind, f64)> {
        let mut best: Option<(String, AreaKind, f64)> = None;

        for lane in self.lanes() {
            let Some(polygon) = lane.polygon.as_ref() else {
                continue;
            };
            let dist = footprint.euclidean_distance(polygon);
            if best.as_ref().map_or(true, |(_, _, d)| dist < *d) {
                best = Some((lane.id.clone(), AreaKind::Lane, dist));
            }
        }
        for junction in self.junctions() {
            let dist = footprint.euclidean_distance(&junction.polygon);
            if best.as_ref().map_or(true, |(_, _, d)| dist < *d) {
                best = Some((junction.id.clone(), AreaKind::Junction, dist));
            }
        }

        best.filter(|(_, _, dist)| *dist < NEAREST_LANE_TOLERANCE)
    }
}
