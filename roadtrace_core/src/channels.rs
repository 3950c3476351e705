//! Per-channel record decoding and the multi-rate channel container.
//!
//! The upstream collaborator hands over raw per-topic messages as generic
//! JSON values. Decoding is a closed set of tagged variants, one per channel;
//! a message that fails to decode is skipped and the rest of its channel
//! continues. Both camelCase and snake_case field spellings are accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;
use crate::geometry;

/// 3D point in the shared map coordinate frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Ego pose sample from the position channel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3,
    pub heading: f64,
    pub linear_velocity: Point3,
}

/// Gear selector codes as emitted by the chassis channel.
pub mod gear {
    pub const NEUTRAL: i32 = 0;
    pub const DRIVE: i32 = 1;
    pub const REVERSE: i32 = 2;
    pub const PARKING: i32 = 3;
    pub const LOW: i32 = 4;
    pub const INVALID: i32 = 5;
    pub const NONE: i32 = 6;

    pub fn from_name(name: &str) -> i32 {
        match name {
            "GEAR_NEUTRAL" => NEUTRAL,
            "GEAR_DRIVE" => DRIVE,
            "GEAR_REVERSE" => REVERSE,
            "GEAR_PARKING" => PARKING,
            "GEAR_LOW" => LOW,
            "GEAR_INVALID" => INVALID,
            _ => NONE,
        }
    }
}

/// Planned turn signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnSignal {
    #[default]
    None,
    Left,
    Right,
}

impl TurnSignal {
    pub fn from_name(name: &str) -> Self {
        match name {
            "TURN_LEFT" => TurnSignal::Left,
            "TURN_RIGHT" => TurnSignal::Right,
            _ => TurnSignal::None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TurnSignal::None => 0,
            TurnSignal::Left => 1,
            TurnSignal::Right => 2,
        }
    }
}

/// Obstacle category. Anything that is neither a vehicle nor a pedestrian is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleKind {
    Vehicle,
    Pedestrian,
    Other(String),
}

impl ObstacleKind {
    fn from_name(name: &str) -> Self {
        match name {
            "VEHICLE" => ObstacleKind::Vehicle,
            "PEDESTRIAN" => ObstacleKind::Pedestrian,
            other => ObstacleKind::Other(other.to_string()),
        }
    }
}

/// Reported traffic-light color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightColor {
    #[default]
    Unknown,
    Red,
    Yellow,
    Green,
    Black,
}

impl LightColor {
    fn from_name(name: &str) -> Self {
        match name {
            "RED" => LightColor::Red,
            "YELLOW" => LightColor::Yellow,
            "GREEN" => LightColor::Green,
            "BLACK" => LightColor::Black,
            _ => LightColor::Unknown,
        }
    }
}

/// Decoded position record.
#[derive(Debug, Clone, Default)]
pub struct PositionSample {
    pub pose: Pose,
}

/// Decoded chassis record.
#[derive(Debug, Clone, Default)]
pub struct ChassisSample {
    pub gear: i32,
    pub speed: f64,
    pub brake_percentage: f64,
}

/// Decoded planning record.
#[derive(Debug, Clone, Default)]
pub struct PlanningSample {
    pub turn_signal: TurnSignal,
    pub overtaking: bool,
}

/// One obstacle as decoded from the perception channel. The footprint is
/// taken from explicit boundary points when present, otherwise reconstructed
/// from center, size and heading; an obstacle with neither keeps an empty
/// point list and is excluded from geometric matching.
#[derive(Debug, Clone)]
pub struct ObstacleSample {
    pub id: String,
    pub kind: ObstacleKind,
    pub position: Point3,
    pub theta: f64,
    pub speed: f64,
    pub polygon_points: Vec<(f64, f64)>,
}

/// Decoded obstacles record: one perception snapshot.
#[derive(Debug, Clone, Default)]
pub struct ObstaclesSample {
    pub obstacles: Vec<ObstacleSample>,
}

/// One reported traffic light.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficLight {
    pub id: String,
    pub color: LightColor,
}

/// Decoded traffic-light record.
#[derive(Debug, Clone, Default)]
pub struct TrafficLightSample {
    pub lights: Vec<TrafficLight>,
}

/// Channel tags: the closed set of record kinds the aligner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Position,
    Chassis,
    Planning,
    Obstacles,
    TrafficLight,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Position,
        ChannelKind::Chassis,
        ChannelKind::Planning,
        ChannelKind::Obstacles,
        ChannelKind::TrafficLight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Position => "position",
            ChannelKind::Chassis => "chassis",
            ChannelKind::Planning => "planning",
            ChannelKind::Obstacles => "obstacles",
            ChannelKind::TrafficLight => "traffic_light",
        }
    }
}

/// A decoded record, tagged by its channel.
#[derive(Debug, Clone)]
pub enum ChannelRecord {
    Position(PositionSample),
    Chassis(ChassisSample),
    Planning(PlanningSample),
    Obstacles(ObstaclesSample),
    TrafficLight(TrafficLightSample),
}

/// Decode one raw message for the given channel.
pub fn decode_record(kind: ChannelKind, raw: &Value) -> Result<ChannelRecord, DecodeError> {
    match kind {
        ChannelKind::Position => decode_position(raw).map(ChannelRecord::Position),
        ChannelKind::Chassis => decode_chassis(raw).map(ChannelRecord::Chassis),
        ChannelKind::Planning => Ok(ChannelRecord::Planning(decode_planning(raw))),
        ChannelKind::Obstacles => Ok(ChannelRecord::Obstacles(decode_obstacles(raw))),
        ChannelKind::TrafficLight => Ok(ChannelRecord::TrafficLight(decode_traffic_light(raw))),
    }
}

fn decode_position(raw: &Value) -> Result<PositionSample, DecodeError> {
    #[derive(Deserialize)]
    struct RawPosition {
        pose: RawPose,
    }
    #[derive(Deserialize)]
    struct RawPose {
        #[serde(default)]
        position: Point3,
        #[serde(default)]
        heading: f64,
        #[serde(default, rename = "linearVelocity", alias = "linear_velocity")]
        linear_velocity: Point3,
    }

    let parsed: RawPosition =
        serde_json::from_value(raw.clone()).map_err(|e| DecodeError::Malformed {
            channel: "position",
            reason: e.to_string(),
        })?;
    Ok(PositionSample {
        pose: Pose {
            position: parsed.pose.position,
            heading: parsed.pose.heading,
            linear_velocity: parsed.pose.linear_velocity,
        },
    })
}

fn decode_chassis(raw: &Value) -> Result<ChassisSample, DecodeError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum GearField {
        Code(i32),
        Name(String),
    }
    #[derive(Deserialize)]
    struct RawChassis {
        #[serde(default, rename = "gearLocation", alias = "gear_location")]
        gear_location: Option<GearField>,
        #[serde(default)]
        speed: f64,
        #[serde(default, rename = "brakePercentage", alias = "brake_percentage")]
        brake_percentage: f64,
    }

    let parsed: RawChassis =
        serde_json::from_value(raw.clone()).map_err(|e| DecodeError::Malformed {
            channel: "chassis",
            reason: e.to_string(),
        })?;
    let gear = match parsed.gear_location {
        Some(GearField::Code(code)) => code,
        Some(GearField::Name(name)) => gear::from_name(&name),
        None => gear::NEUTRAL,
    };
    Ok(ChassisSample {
        gear,
        speed: parsed.speed,
        brake_percentage: parsed.brake_percentage,
    })
}

fn decode_planning(raw: &Value) -> PlanningSample {
    // The planning message is a deep decision tree; anything missing along
    // the way degrades to the default signal.
    #[derive(Default, Deserialize)]
    struct RawPlanning {
        #[serde(default)]
        decision: RawDecision,
    }
    #[derive(Default, Deserialize)]
    struct RawDecision {
        #[serde(default, rename = "vehicleSignal", alias = "vehicle_signal")]
        vehicle_signal: RawVehicleSignal,
        #[serde(default, rename = "objectDecision", alias = "object_decision")]
        object_decision: RawObjectDecisions,
    }
    #[derive(Default, Deserialize)]
    struct RawVehicleSignal {
        #[serde(default, rename = "turnSignal", alias = "turn_signal")]
        turn_signal: Option<String>,
    }
    #[derive(Default, Deserialize)]
    struct RawObjectDecisions {
        #[serde(default)]
        decision: Vec<RawDecisionItem>,
    }
    #[derive(Default, Deserialize)]
    struct RawDecisionItem {
        #[serde(default, rename = "objectDecision", alias = "object_decision")]
        object_decision: Vec<RawDecisionKind>,
    }
    #[derive(Default, Deserialize)]
    struct RawDecisionKind {
        #[serde(default)]
        overtake: Option<RawOvertake>,
        #[serde(default)]
        nudge: Option<RawNudge>,
    }
    #[derive(Default, Deserialize)]
    struct RawOvertake {
        #[serde(default, rename = "distanceS", alias = "distance_s")]
        distance_s: f64,
    }
    #[derive(Default, Deserialize)]
    struct RawNudge {
        #[serde(default, rename = "distanceL", alias = "distance_l")]
        distance_l: f64,
    }

    let parsed: RawPlanning = serde_json::from_value(raw.clone()).unwrap_or_default();
    let turn_signal = parsed
        .decision
        .vehicle_signal
        .turn_signal
        .as_deref()
        .map(TurnSignal::from_name)
        .unwrap_or_default();

    // An overtake with nonzero longitudinal offset or a nudge with nonzero
    // lateral offset both count as an overtaking maneuver.
    let overtaking = parsed
        .decision
        .object_decision
        .decision
        .iter()
        .filter_map(|item| item.object_decision.first())
        .any(|d| {
            d.overtake.as_ref().is_some_and(|o| o.distance_s != 0.0)
                || d.nudge.as_ref().is_some_and(|n| n.distance_l != 0.0)
        });

    PlanningSample {
        turn_signal,
        overtaking,
    }
}

fn decode_obstacles(raw: &Value) -> ObstaclesSample {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdField {
        Num(i64),
        Text(String),
    }
    #[derive(Default, Deserialize)]
    struct RawObstacles {
        #[serde(
            default,
            rename = "perceptionObstacle",
            alias = "perception_obstacle"
        )]
        perception_obstacle: Vec<RawObstacle>,
    }
    #[derive(Deserialize)]
    struct RawObstacle {
        id: Option<IdField>,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        position: Point3,
        #[serde(default)]
        theta: f64,
        #[serde(default)]
        velocity: Option<Point3>,
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        length: Option<f64>,
        #[serde(default)]
        width: Option<f64>,
        #[serde(default, rename = "polygonPoint", alias = "polygon_point")]
        polygon_point: Vec<Point3>,
    }

    let parsed: RawObstacles = serde_json::from_value(raw.clone()).unwrap_or_default();
    let obstacles = parsed
        .perception_obstacle
        .into_iter()
        .map(|o| {
            let speed = match (o.velocity, o.speed) {
                (Some(v), _) => geometry::vector_speed(v.x, v.y, v.z),
                (None, Some(s)) => s,
                (None, None) => 0.0,
            };
            let mut polygon_points: Vec<(f64, f64)> =
                o.polygon_point.iter().map(|p| (p.x, p.y)).collect();
            if polygon_points.is_empty() {
                if let (Some(length), Some(width)) = (o.length, o.width) {
                    let rect = geometry::rect_footprint(
                        o.position.x,
                        o.position.y,
                        length,
                        width,
                        o.theta,
                        0.0,
                    );
                    polygon_points = rect.exterior().coords().map(|c| (c.x, c.y)).collect();
                    // drop the closing coordinate geo appends
                    polygon_points.pop();
                }
            }
            ObstacleSample {
                id: match o.id {
                    Some(IdField::Num(n)) => n.to_string(),
                    Some(IdField::Text(t)) => t,
                    None => "unknown".to_string(),
                },
                kind: o
                    .kind
                    .as_deref()
                    .map(ObstacleKind::from_name)
                    .unwrap_or(ObstacleKind::Other(String::new())),
                position: o.position,
                theta: o.theta,
                speed,
                polygon_points,
            }
        })
        .collect();
    ObstaclesSample { obstacles }
}

fn decode_traffic_light(raw: &Value) -> TrafficLightSample {
    #[derive(Default, Deserialize)]
    struct RawTrafficLights {
        #[serde(default, rename = "trafficLight", alias = "traffic_light")]
        traffic_light: Vec<RawLight>,
    }
    #[derive(Deserialize)]
    struct RawLight {
        #[serde(default)]
        id: String,
        #[serde(default)]
        color: Option<String>,
    }

    let parsed: RawTrafficLights = serde_json::from_value(raw.clone()).unwrap_or_default();
    TrafficLightSample {
        lights: parsed
            .traffic_light
            .into_iter()
            .map(|l| TrafficLight {
                id: l.id,
                color: l.color.as_deref().map(LightColor::from_name).unwrap_or_default(),
            })
            .collect(),
    }
}

/// One channel's timestamped samples, kept sorted by timestamp.
#[derive(Debug, Clone)]
pub struct Series<T> {
    entries: Vec<(f64, T)>,
}

impl<T> Default for Series<T> {
    fn default() -> Self {
        Series { entries: Vec::new() }
    }
}

impl<T> Series<T> {
    pub fn insert(&mut self, timestamp: f64, value: T) {
        self.entries.push((timestamp, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    pub fn entries(&self) -> &[(f64, T)] {
        &self.entries
    }

    /// The sample at the greatest timestamp strictly less than `target`.
    /// Requires the series to be sorted.
    pub fn nearest_before(&self, target: f64) -> Option<(f64, &T)> {
        let idx = self.entries.partition_point(|(ts, _)| *ts < target);
        if idx == 0 {
            None
        } else {
            let (ts, value) = &self.entries[idx - 1];
            Some((*ts, value))
        }
    }
}

/// All five decoded channels for one recorded run.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    pub position: Series<PositionSample>,
    pub chassis: Series<ChassisSample>,
    pub planning: Series<PlanningSample>,
    pub obstacles: Series<ObstaclesSample>,
    pub traffic_light: Series<TrafficLightSample>,
}

impl ChannelSet {
    /// File a decoded record under its channel.
    pub fn insert(&mut self, timestamp: f64, record: ChannelRecord) {
        match record {
            ChannelRecord::Position(s) => self.position.insert(timestamp, s),
            ChannelRecord::Chassis(s) => self.chassis.insert(timestamp, s),
            ChannelRecord::Planning(s) => self.planning.insert(timestamp, s),
            ChannelRecord::Obstacles(s) => self.obstacles.insert(timestamp, s),
            ChannelRecord::TrafficLight(s) => self.traffic_light.insert(timestamp, s),
        }
    }

    pub fn sort(&mut self) {
        self.position.sort();
        self.chassis.sort();
        self.planning.sort();
        self.obstacles.sort();
        self.traffic_light.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn position_decodes_pose_and_velocity() {
        let raw = json!({
            "pose": {
                "position": {"x": 1.0, "y": 2.0, "z": 0.5},
                "heading": 0.3,
                "linearVelocity": {"x": 3.0, "y": 4.0, "z": 0.0}
            }
        });
        let ChannelRecord::Position(sample) =
            decode_record(ChannelKind::Position, &raw).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_relative_eq!(sample.pose.heading, 0.3);
        assert_relative_eq!(sample.pose.linear_velocity.y, 4.0);
    }

    #[test]
    fn position_without_pose_is_a_decode_error() {
        let raw = json!({"nonsense": true});
        assert!(decode_record(ChannelKind::Position, &raw).is_err());
    }

    #[test]
    fn chassis_maps_gear_names_and_passes_codes_through() {
        let named = json!({"gearLocation": "GEAR_DRIVE", "speed": 5.0, "brakePercentage": 10.0});
        let ChannelRecord::Chassis(sample) = decode_record(ChannelKind::Chassis, &named).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(sample.gear, gear::DRIVE);

        let coded = json!({"gearLocation": 3, "speed": 0.0});
        let ChannelRecord::Chassis(sample) = decode_record(ChannelKind::Chassis, &coded).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(sample.gear, gear::PARKING);
    }

    #[test]
    fn planning_extracts_turn_signal_and_overtake() {
        let raw = json!({
            "decision": {
                "vehicleSignal": {"turnSignal": "TURN_LEFT"},
                "objectDecision": {"decision": [
                    {"objectDecision": [{"overtake": {"distanceS": 4.0}}]}
                ]}
            }
        });
        let ChannelRecord::Planning(sample) =
            decode_record(ChannelKind::Planning, &raw).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(sample.turn_signal, TurnSignal::Left);
        assert!(sample.overtaking);
    }

    #[test]
    fn planning_defaults_on_garbage() {
        let ChannelRecord::Planning(sample) =
            decode_record(ChannelKind::Planning, &json!(null)).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(sample.turn_signal, TurnSignal::None);
        assert!(!sample.overtaking);
    }

    #[test]
    fn obstacle_footprint_is_reconstructed_from_size_when_points_are_absent() {
        let raw = json!({"perceptionObstacle": [{
            "id": 7,
            "type": "VEHICLE",
            "position": {"x": 20.0, "y": 0.0, "z": 0.0},
            "theta": 0.0,
            "velocity": {"x": 0.0, "y": 0.0, "z": 0.0},
            "length": 4.0,
            "width": 2.0
        }]});
        let ChannelRecord::Obstacles(sample) =
            decode_record(ChannelKind::Obstacles, &raw).unwrap()
        else {
            panic!("wrong variant");
        };
        let obstacle = &sample.obstacles[0];
        assert_eq!(obstacle.id, "7");
        assert_eq!(obstacle.kind, ObstacleKind::Vehicle);
        assert_eq!(obstacle.polygon_points.len(), 4);
        let min_x = obstacle
            .polygon_points
            .iter()
            .map(|p| p.0)
            .fold(f64::MAX, f64::min);
        assert_relative_eq!(min_x, 18.0);
    }

    #[test]
    fn obstacle_without_geometry_keeps_an_empty_point_list() {
        let raw = json!({"perceptionObstacle": [{"id": "ped_1", "type": "PEDESTRIAN",
            "position": {"x": 1.0, "y": 1.0, "z": 0.0}}]});
        let ChannelRecord::Obstacles(sample) =
            decode_record(ChannelKind::Obstacles, &raw).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(sample.obstacles[0].polygon_points.is_empty());
    }

    #[test]
    fn nearest_before_is_strictly_in_the_past() {
        let mut series = Series::default();
        series.insert(3.0, "c");
        series.insert(1.0, "a");
        series.insert(2.0, "b");
        series.sort();
        assert_eq!(series.nearest_before(2.5).map(|(t, v)| (t, *v)), Some((2.0, "b")));
        // exact match does not count: strictly less than
        assert_eq!(series.nearest_before(1.0), None);
        assert_eq!(series.nearest_before(0.5), None);
        assert_eq!(series.nearest_before(10.0).map(|(t, v)| (t, *v)), Some((3.0, "c")));
    }
}
