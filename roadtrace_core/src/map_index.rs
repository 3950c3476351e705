//! Road-network index.
//!
//! Loads a JSON road-network description once and exposes immutable geofence
//! lookups: lane and junction polygons, crosswalks, stop-sign and signal
//! stop lines, and lane-to-road membership. Nothing here mutates after
//! construction, so the index is safe to share read-only across threads.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use geo::{Coord, LineString, Polygon};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::MapLoadError;
use crate::geometry;

/// Turn type a lane is signed for, as carried by the map description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneTurn {
    #[default]
    Unknown,
    NoTurn,
    Left,
    Right,
    UTurn,
}

impl LaneTurn {
    /// Raw description code: 1 = no turn, 2 = left, 3 = right, 4 = u-turn.
    pub fn code(self) -> u8 {
        match self {
            LaneTurn::Unknown => 0,
            LaneTurn::NoTurn => 1,
            LaneTurn::Left => 2,
            LaneTurn::Right => 3,
            LaneTurn::UTurn => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => LaneTurn::NoTurn,
            2 => LaneTurn::Left,
            3 => LaneTurn::Right,
            4 => LaneTurn::UTurn,
            _ => LaneTurn::Unknown,
        }
    }
}

/// One lane of the road network.
///
/// The polygon is built from the left boundary followed by the reversed
/// right boundary; a lane whose description omits either boundary keeps its
/// centerline but has no polygon, and downstream code treats it as
/// ungeofenceable.
#[derive(Debug, Clone)]
pub struct LaneRecord {
    pub id: String,
    pub length: f64,
    pub waypoints: Vec<Coord<f64>>,
    pub turn: LaneTurn,
    pub polygon: Option<Polygon<f64>>,
}

#[derive(Debug, Clone)]
pub struct JunctionRecord {
    pub id: String,
    pub polygon: Polygon<f64>,
}

/// A stop sign or a traffic signal with its painted stop line.
#[derive(Debug, Clone)]
pub struct StopLineRecord {
    pub id: String,
    pub stop_line: Option<LineString<f64>>,
    pub stop_line_points: Vec<(f64, f64)>,
}

/// A traffic signal; carries its sub-signal types in addition to the line.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub id: String,
    pub sub_signal_types: Vec<String>,
    pub stop_line: Option<LineString<f64>>,
    pub stop_line_points: Vec<(f64, f64)>,
}

/// Immutable geofence index over one road-network description.
#[derive(Debug)]
pub struct MapIndex {
    map_name: String,
    lanes: HashMap<String, LaneRecord>,
    junctions: HashMap<String, JunctionRecord>,
    crosswalks: HashMap<String, Polygon<f64>>,
    stop_signs: Vec<StopLineRecord>,
    signals: Vec<SignalRecord>,
    lane_to_road: HashMap<String, String>,
    road_to_lanes: HashMap<String, Vec<String>>,
    leftmost_lanes: HashSet<String>,
}

impl MapIndex {
    /// Load a map description from disk. Fatal on a missing or unparsable
    /// file; the whole run aborts.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MapLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let description: MapDescription = serde_json::from_str(&text)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_description(description, name))
    }

    /// Build the index from an already-parsed description.
    pub fn from_description(description: MapDescription, map_name: String) -> Self {
        let mut index = MapIndex {
            map_name,
            lanes: HashMap::new(),
            junctions: HashMap::new(),
            crosswalks: HashMap::new(),
            stop_signs: Vec::new(),
            signals: Vec::new(),
            lane_to_road: HashMap::new(),
            road_to_lanes: HashMap::new(),
            leftmost_lanes: HashSet::new(),
        };

        for lane in description.lane {
            index.add_lane(lane);
        }
        for junction in description.junction {
            if let Some(polygon) = geometry::polygon_from_points(&junction.polygon.coords()) {
                index.junctions.insert(
                    junction.id.id.clone(),
                    JunctionRecord { id: junction.id.id, polygon },
                );
            }
        }
        // Only well-formed 4-corner crosswalks are kept.
        for (idx, crosswalk) in description.crosswalk.into_iter().enumerate() {
            let coords = crosswalk.polygon.coords();
            if coords.len() != 4 {
                continue;
            }
            if let Some(polygon) = geometry::polygon_from_points(&coords) {
                index
                    .crosswalks
                    .insert(format!("crosswalk{}", idx + 1), polygon);
            }
        }
        for sign in description.stop_sign {
            let (stop_line, stop_line_points) = extract_stop_line(&sign.stop_line);
            index.stop_signs.push(StopLineRecord {
                id: sign.id.id,
                stop_line,
                stop_line_points,
            });
        }
        for signal in description.signal {
            let (stop_line, stop_line_points) = extract_stop_line(&signal.stop_line);
            index.signals.push(SignalRecord {
                id: signal.id.id,
                sub_signal_types: signal.subsignal.into_iter().map(|s| s.kind).collect(),
                stop_line,
                stop_line_points,
            });
        }
        for road in description.road {
            index.add_road(road);
        }

        info!(
            map = %index.map_name,
            lanes = index.lanes.len(),
            junctions = index.junctions.len(),
            crosswalks = index.crosswalks.len(),
            stop_signs = index.stop_signs.len(),
            signals = index.signals.len(),
            "map index built"
        );
        index
    }

    fn add_lane(&mut self, lane: LaneDescription) {
        let id = lane.id.id.clone();

        let mut waypoints = Vec::new();
        if let Some(curve) = &lane.central_curve {
            for segment in &curve.segment {
                if let Some(line) = &segment.line_segment {
                    waypoints.extend(line.point.iter().map(|p| Coord { x: p.x, y: p.y }));
                }
            }
        }

        let left = lane.left_boundary.as_ref().map(boundary_points).unwrap_or_default();
        let mut right = lane.right_boundary.as_ref().map(boundary_points).unwrap_or_default();
        let polygon = if !left.is_empty() && !right.is_empty() {
            right.reverse();
            let mut ring = left;
            ring.append(&mut right);
            geometry::polygon_from_points(&ring)
        } else {
            None
        };

        // A lane with no forward left neighbor is the leftmost on its road.
        if lane.left_neighbor_forward_lane_id.is_none() {
            self.leftmost_lanes.insert(id.clone());
        }

        self.lanes.insert(
            id.clone(),
            LaneRecord {
                id,
                length: lane.length,
                waypoints,
                turn: LaneTurn::from_code(lane.turn),
                polygon,
            },
        );
    }

    fn add_road(&mut self, road: RoadDescription) {
        let road_id = road.id.id;
        let mut member_lanes = Vec::new();
        for section in road.section {
            for lane_id in section.lane_id {
                if let Some(previous) = self
                    .lane_to_road
                    .insert(lane_id.id.clone(), road_id.clone())
                {
                    if previous != road_id {
                        warn!(
                            lane = %lane_id.id,
                            first = %previous,
                            second = %road_id,
                            "lane referenced by two roads; keeping the later one"
                        );
                    }
                }
                member_lanes.push(lane_id.id);
            }
        }
        self.road_to_lanes.insert(road_id, member_lanes);
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn lane(&self, id: &str) -> Option<&LaneRecord> {
        self.lanes.get(id)
    }

    pub fn lane_polygon(&self, id: &str) -> Option<&Polygon<f64>> {
        self.lanes.get(id).and_then(|l| l.polygon.as_ref())
    }

    pub fn lane_turn(&self, id: &str) -> LaneTurn {
        self.lanes.get(id).map(|l| l.turn).unwrap_or_default()
    }

    pub fn lane_waypoints(&self, id: &str) -> Option<&[Coord<f64>]> {
        self.lanes.get(id).map(|l| l.waypoints.as_slice())
    }

    pub fn junction_polygon(&self, id: &str) -> Option<&Polygon<f64>> {
        self.junctions.get(id).map(|j| &j.polygon)
    }

    pub fn lanes(&self) -> impl Iterator<Item = &LaneRecord> {
        self.lanes.values()
    }

    pub fn junctions(&self) -> impl Iterator<Item = &JunctionRecord> {
        self.junctions.values()
    }

    pub fn crosswalks(&self) -> impl Iterator<Item = (&str, &Polygon<f64>)> {
        self.crosswalks.iter().map(|(id, p)| (id.as_str(), p))
    }

    pub fn stop_signs(&self) -> &[StopLineRecord] {
        &self.stop_signs
    }

    pub fn signals(&self) -> &[SignalRecord] {
        &self.signals
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn junction_count(&self) -> usize {
        self.junctions.len()
    }

    /// Member-lane count of the road `lane_id` belongs to. The leftmost lane
    /// is flagged by reporting `count * 100 + 1` so downstream consumers can
    /// tell it apart; unknown lanes report 0.
    pub fn lane_count_on_road(&self, lane_id: &str) -> u32 {
        let Some(road_id) = self.lane_to_road.get(lane_id) else {
            return 0;
        };
        let Some(lanes) = self.road_to_lanes.get(road_id) else {
            return 0;
        };
        let count = lanes.len() as u32;
        if self.leftmost_lanes.contains(lane_id) {
            count * 100 + 1
        } else {
            count
        }
    }

    /// Whether two lanes belong to the same road. False if either is unknown.
    pub fn same_road(&self, lane_a: &str, lane_b: &str) -> bool {
        match (self.lane_to_road.get(lane_a), self.lane_to_road.get(lane_b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn boundary_points(boundary: &BoundaryDescription) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    for segment in &boundary.curve.segment {
        if let Some(line) = &segment.line_segment {
            points.extend(line.point.iter().map(|p| (p.x, p.y)));
        }
    }
    points
}

fn extract_stop_line(
    stop_lines: &[StopLineDescription],
) -> (Option<LineString<f64>>, Vec<(f64, f64)>) {
    // Only the first stop line's first segment carries the painted line.
    let points: Vec<(f64, f64)> = stop_lines
        .first()
        .and_then(|sl| sl.segment.first())
        .and_then(|seg| seg.line_segment.as_ref())
        .map(|line| line.point.iter().map(|p| (p.x, p.y)).collect())
        .unwrap_or_default();
    let line = if points.len() >= 2 {
        Some(LineString::from(points.clone()))
    } else {
        None
    };
    (line, points)
}

// ---------------------------------------------------------------------------
// Description document shapes. Both camelCase and snake_case spellings occur
// in the wild, so every nested key carries an alias.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct MapDescription {
    #[serde(default)]
    pub lane: Vec<LaneDescription>,
    #[serde(default)]
    pub junction: Vec<JunctionDescription>,
    #[serde(default)]
    pub crosswalk: Vec<CrosswalkDescription>,
    #[serde(default, rename = "stopSign", alias = "stop_sign")]
    pub stop_sign: Vec<StopSignDescription>,
    #[serde(default)]
    pub signal: Vec<SignalDescription>,
    #[serde(default)]
    pub road: Vec<RoadDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdDescription {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LaneDescription {
    pub id: IdDescription,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub turn: i32,
    #[serde(default, rename = "centralCurve", alias = "central_curve")]
    pub central_curve: Option<CurveDescription>,
    #[serde(default, rename = "leftBoundary", alias = "left_boundary")]
    pub left_boundary: Option<BoundaryDescription>,
    #[serde(default, rename = "rightBoundary", alias = "right_boundary")]
    pub right_boundary: Option<BoundaryDescription>,
    #[serde(
        default,
        rename = "leftNeighborForwardLaneId",
        alias = "left_neighbor_forward_lane_id"
    )]
    pub left_neighbor_forward_lane_id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CurveDescription {
    #[serde(default)]
    pub segment: Vec<CurveSegmentDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CurveSegmentDescription {
    #[serde(default, rename = "lineSegment", alias = "line_segment")]
    pub line_segment: Option<LineSegmentDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LineSegmentDescription {
    #[serde(default)]
    pub point: Vec<PointDescription>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PointDescription {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoundaryDescription {
    #[serde(default)]
    pub curve: CurveDescription,
}

#[derive(Debug, Default, Deserialize)]
pub struct PolygonDescription {
    #[serde(default)]
    pub point: Vec<PointDescription>,
}

impl PolygonDescription {
    fn coords(&self) -> Vec<(f64, f64)> {
        self.point.iter().map(|p| (p.x, p.y)).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JunctionDescription {
    pub id: IdDescription,
    #[serde(default)]
    pub polygon: PolygonDescription,
}

#[derive(Debug, Default, Deserialize)]
pub struct CrosswalkDescription {
    #[serde(default)]
    pub polygon: PolygonDescription,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopSignDescription {
    pub id: IdDescription,
    #[serde(default, rename = "stopLine", alias = "stop_line")]
    pub stop_line: Vec<StopLineDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopLineDescription {
    #[serde(default)]
    pub segment: Vec<CurveSegmentDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignalDescription {
    pub id: IdDescription,
    #[serde(default)]
    pub subsignal: Vec<SubSignalDescription>,
    #[serde(default, rename = "stopLine", alias = "stop_line")]
    pub stop_line: Vec<StopLineDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubSignalDescription {
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoadDescription {
    pub id: IdDescription,
    #[serde(default)]
    pub section: Vec<RoadSectionDescription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoadSectionDescription {
    #[serde(default, rename = "laneId", alias = "lane_id")]
    pub lane_id: Vec<IdDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> MapIndex {
        let description: MapDescription = serde_json::from_str(
            r#"{
            "lane": [
                {
                    "id": {"id": "lane_a"},
                    "length": 55.0,
                    "turn": 1,
                    "centralCurve": {"segment": [{"lineSegment": {"point": [
                        {"x": -5.0, "y": 0.0}, {"x": 50.0, "y": 0.0}
                    ]}}]},
                    "leftBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                        {"x": -5.0, "y": 1.0}, {"x": 50.0, "y": 1.0}
                    ]}}]}},
                    "rightBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                        {"x": -5.0, "y": -1.0}, {"x": 50.0, "y": -1.0}
                    ]}}]}}
                },
                {
                    "id": {"id": "lane_b"},
                    "length": 55.0,
                    "turn": 2,
                    "leftNeighborForwardLaneId": {"id": "lane_a"},
                    "leftBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                        {"x": -5.0, "y": -1.0}, {"x": 50.0, "y": -1.0}
                    ]}}]}},
                    "rightBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                        {"x": -5.0, "y": -3.0}, {"x": 50.0, "y": -3.0}
                    ]}}]}}
                },
                {
                    "id": {"id": "lane_bare"},
                    "length": 10.0
                }
            ],
            "junction": [
                {"id": {"id": "junction_1"}, "polygon": {"point": [
                    {"x": 50.0, "y": -10.0}, {"x": 70.0, "y": -10.0},
                    {"x": 70.0, "y": 10.0}, {"x": 50.0, "y": 10.0}
                ]}}
            ],
            "crosswalk": [
                {"polygon": {"point": [
                    {"x": 40.0, "y": -5.0}, {"x": 42.0, "y": -5.0},
                    {"x": 42.0, "y": 5.0}, {"x": 40.0, "y": 5.0}
                ]}},
                {"polygon": {"point": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 0.0}]}}
            ],
            "stopSign": [
                {"id": {"id": "stop_sign_1"}, "stopLine": [{"segment": [{"lineSegment": {"point": [
                    {"x": 45.0, "y": -2.0}, {"x": 45.0, "y": 2.0}
                ]}}]}]}
            ],
            "signal": [
                {"id": {"id": "signal_1"},
                 "subsignal": [{"type": "CIRCLE"}],
                 "stopLine": [{"segment": [{"lineSegment": {"point": [
                    {"x": 48.0, "y": -2.0}, {"x": 48.0, "y": 2.0}
                ]}}]}]}
            ],
            "road": [
                {"id": {"id": "road_1"}, "section": [{"laneId": [
                    {"id": "lane_a"}, {"id": "lane_b"}
                ]}]}
            ]
        }"#,
        )
        .unwrap();
        MapIndex::from_description(description, "test".into())
    }

    #[test]
    fn lane_polygon_closes_left_then_reversed_right() {
        let map = test_map();
        let poly = map.lane_polygon("lane_a").unwrap();
        let coords: Vec<(f64, f64)> = poly.exterior().coords().map(|c| (c.x, c.y)).collect();
        // left boundary in order, then right boundary reversed, then closure.
        assert_eq!(coords[0], (-5.0, 1.0));
        assert_eq!(coords[1], (50.0, 1.0));
        assert_eq!(coords[2], (50.0, -1.0));
        assert_eq!(coords[3], (-5.0, -1.0));
    }

    #[test]
    fn lane_without_boundaries_is_kept_but_ungeofenceable() {
        let map = test_map();
        assert!(map.lane("lane_bare").is_some());
        assert!(map.lane_polygon("lane_bare").is_none());
    }

    #[test]
    fn malformed_crosswalks_are_dropped() {
        let map = test_map();
        assert_eq!(map.crosswalks().count(), 1);
    }

    #[test]
    fn leftmost_lane_count_carries_the_flag_offset() {
        let map = test_map();
        // lane_a has no left forward neighbor: 2 lanes on the road -> 201.
        assert_eq!(map.lane_count_on_road("lane_a"), 201);
        assert_eq!(map.lane_count_on_road("lane_b"), 2);
        assert_eq!(map.lane_count_on_road("nonexistent"), 0);
    }

    #[test]
    fn same_road_is_false_for_unknown_lanes() {
        let map = test_map();
        assert!(map.same_road("lane_a", "lane_b"));
        assert!(!map.same_road("lane_a", "nonexistent"));
    }

    #[test]
    fn stop_lines_survive_loading() {
        let map = test_map();
        assert!(map.stop_signs()[0].stop_line.is_some());
        assert_eq!(map.signals()[0].sub_signal_types, vec!["CIRCLE"]);
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(matches!(
            MapIndex::load("/nonexistent/map.json"),
            Err(MapLoadError::Io { .. })
        ));
    }
}
