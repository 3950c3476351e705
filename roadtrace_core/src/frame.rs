//! The trace data model: frames, ego state, ground truth, derived signals.
//!
//! A frame is one fully time-aligned sample. `AlignedFrame` is what the
//! stream aligner produces; the derivation engine turns it into a `Frame` by
//! attaching `SceneSignals` (pass 1) and then filling `BehaviorSignals`
//! (pass 2). Making pass 1's output part of the `Frame` constructor keeps
//! the pass ordering a type-level fact.

use geo::Polygon;
use serde::{Deserialize, Serialize};

use crate::channels::{ObstacleKind, Point3, Pose, TrafficLight, TurnSignal};
use crate::classify::AreaKind;
use crate::config::DEFAULT_DISTANCE;

/// Ego physical dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VehicleSize {
    pub length: f64,
    pub width: f64,
    pub wheelbase: f64,
}

/// Chassis snapshot carried on every frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChassisSnapshot {
    pub gear: i32,
    pub speed: f64,
    pub brake_percentage: f64,
}

/// Where a footprint sits in the road network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentLane {
    pub id: Option<String>,
    pub kind: Option<AreaKind>,
    /// Encoded 8-way turn availability (ego) or the raw lane turn (obstacle).
    pub turn_code: u8,
    /// Road member-lane count with the leftmost flag offset.
    pub lane_number: u32,
}

/// Ego vehicle state at one timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgoState {
    pub pose: Pose,
    pub size: VehicleSize,
    pub chassis: ChassisSnapshot,
    pub planned_turn: TurnSignal,
    pub is_overtaking: bool,
    /// World-frame footprint. Absent only when the pose was degenerate.
    #[serde(skip)]
    pub footprint: Option<Polygon<f64>>,
}

/// One tracked obstacle, re-anchored to this frame's ego pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: String,
    pub kind: ObstacleKind,
    pub position: Point3,
    pub theta: f64,
    pub speed: f64,
    pub polygon_points: Vec<(f64, f64)>,
    #[serde(skip)]
    pub footprint: Option<Polygon<f64>>,
    pub current_lane: CurrentLane,
    pub dist_to_ego: f64,
}

/// Obstacle aggregates for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    pub min_dist_to_ego: f64,
    pub nearest_npc: Option<String>,
    pub obstacles: Vec<Obstacle>,
}

impl Default for GroundTruth {
    fn default() -> Self {
        GroundTruth {
            min_dist_to_ego: DEFAULT_DISTANCE,
            nearest_npc: None,
            obstacles: Vec::new(),
        }
    }
}

/// Traffic-light channel state for one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficLightState {
    pub lights: Vec<TrafficLight>,
    /// Index into `lights` of the signal with the nearest stop line.
    pub nearest: Option<usize>,
    /// Ego-footprint distance to that stop line.
    pub stop_line_distance: Option<f64>,
}

/// Output of the stream aligner: a frame before any signal derivation.
#[derive(Debug, Clone)]
pub struct AlignedFrame {
    pub timestamp: f64,
    pub ego: EgoState,
    pub truth: GroundTruth,
    pub traffic_lights: TrafficLightState,
}

/// Reference to an obstacle in a classification bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NpcRef {
    pub id: String,
    pub area_id: Option<String>,
    pub kind: Option<AreaKind>,
    pub turn_code: u8,
}

/// The five-way obstacle classification, branched on the (ego, obstacle)
/// area-kind pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NpcClassification {
    /// Both in lanes, same road.
    pub next_to_ego: Vec<NpcRef>,
    /// Both in lanes, different roads.
    pub on_different_road: Vec<NpcRef>,
    /// Ego in a lane, obstacle in a junction.
    pub in_the_junction: Vec<NpcRef>,
    /// Ego in a junction, obstacle in a lane.
    pub ego_in_junction_lane: Vec<NpcRef>,
    /// Both in junctions.
    pub ego_in_junction_junction: Vec<NpcRef>,
}

/// Per-frame geometric signals (pass 1). Purely a function of the frame and
/// the map index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSignals {
    pub current_lane: CurrentLane,
    pub crosswalk_ahead: f64,
    pub junction_ahead: f64,
    pub junction_ahead_id: Option<String>,
    pub stop_sign_ahead: f64,
    pub stop_line_ahead: f64,
    pub npc_ahead: Option<String>,
    pub ped_ahead: Option<String>,
    pub npc_opposite: Option<String>,
    pub classification: NpcClassification,
    pub traffic_jam: bool,
}

impl Default for SceneSignals {
    fn default() -> Self {
        SceneSignals {
            current_lane: CurrentLane::default(),
            crosswalk_ahead: DEFAULT_DISTANCE,
            junction_ahead: DEFAULT_DISTANCE,
            junction_ahead_id: None,
            stop_sign_ahead: DEFAULT_DISTANCE,
            stop_line_ahead: DEFAULT_DISTANCE,
            npc_ahead: None,
            ped_ahead: None,
            npc_opposite: None,
            classification: NpcClassification::default(),
            traffic_jam: false,
        }
    }
}

/// History-dependent signals (pass 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorSignals {
    pub lane_changing: bool,
    pub turning_around: bool,
    pub priority_npc_ahead: bool,
    pub priority_peds_ahead: bool,
    /// Declared but unsupported: destination coordinates never reach the
    /// recorded log, so this is always false.
    pub reach_destination: bool,

    pub v_ego: f64,
    pub front_dist: f64,
    pub d_safe: f64,
    pub v_rel_front: f64,
    pub thw_front: f64,
    pub ttc_front: f64,

    pub a_ego: f64,
    pub hard_brake: bool,
    pub lane_change_started: bool,
    pub lane_change_finished: bool,
    pub brake_or_lane_change: bool,

    pub lat_offset: f64,
    pub in_lane: bool,
    pub gap_safe: bool,

    pub red_light_ahead: bool,
    pub dist_to_red_stop_line: f64,
    pub should_stop_for_red: bool,
    pub stop_sign_ahead: bool,
    pub dist_to_stop_sign: f64,
    pub dist_to_stop_line: f64,
    pub should_stop_at_stop_sign: bool,
    pub ped_in_crosswalk: bool,
    pub dist_to_crosswalk: f64,

    pub stopped_duration: f64,
    pub unjustified_stop: bool,
}

/// One fully derived trace sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub ego: EgoState,
    pub truth: GroundTruth,
    pub traffic_lights: TrafficLightState,
    pub scene: SceneSignals,
    pub behavior: BehaviorSignals,
}

impl Frame {
    /// Promote an aligned frame by attaching its pass-1 scene signals.
    /// Behavior signals start at their defaults and are filled by pass 2.
    pub fn from_aligned(aligned: AlignedFrame, scene: SceneSignals) -> Self {
        Frame {
            timestamp: aligned.timestamp,
            ego: aligned.ego,
            truth: aligned.truth,
            traffic_lights: aligned.traffic_lights,
            scene,
            behavior: BehaviorSignals::default(),
        }
    }
}
