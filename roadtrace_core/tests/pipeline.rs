//! End-to-end pipeline tests: raw channel samples through alignment,
//! derivation and assembly.

use approx::assert_relative_eq;
use roadtrace_core::channels::{
    ChannelSet, ChassisSample, ObstacleKind, ObstacleSample, ObstaclesSample, PlanningSample,
    Point3, Pose, PositionSample, TurnSignal,
};
use roadtrace_core::config::{EGO_LENGTH, EGO_WHEELBASE};
use roadtrace_core::map_index::{MapDescription, MapIndex};
use roadtrace_core::{DeriveConfig, ResultAssembler, SignalEngine, StreamAligner};

fn straight_lane_map() -> MapIndex {
    let description: MapDescription = serde_json::from_str(
        r#"{
        "lane": [{
            "id": {"id": "lane_1"},
            "length": 55.0,
            "turn": 1,
            "centralCurve": {"segment": [{"lineSegment": {"point": [
                {"x": -5.0, "y": 0.0}, {"x": 50.0, "y": 0.0}
            ]}}]},
            "leftBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                {"x": -5.0, "y": 1.5}, {"x": 50.0, "y": 1.5}
            ]}}]}},
            "rightBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                {"x": -5.0, "y": -1.5}, {"x": 50.0, "y": -1.5}
            ]}}]}}
        }],
        "road": [{"id": {"id": "road_1"}, "section": [{"laneId": [{"id": "lane_1"}]}]}]
    }"#,
    )
    .unwrap();
    MapIndex::from_description(description, "straight".into())
}

fn two_lane_road_map() -> MapIndex {
    let description: MapDescription = serde_json::from_str(
        r#"{
        "lane": [
            {
                "id": {"id": "lane_a"},
                "length": 105.0,
                "turn": 1,
                "leftBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                    {"x": -5.0, "y": 4.0}, {"x": 100.0, "y": 4.0}
                ]}}]}},
                "rightBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                    {"x": -5.0, "y": 0.0}, {"x": 100.0, "y": 0.0}
                ]}}]}}
            },
            {
                "id": {"id": "lane_b"},
                "length": 105.0,
                "turn": 1,
                "leftNeighborForwardLaneId": {"id": "lane_a"},
                "leftBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                    {"x": -5.0, "y": 0.0}, {"x": 100.0, "y": 0.0}
                ]}}]}},
                "rightBoundary": {"curve": {"segment": [{"lineSegment": {"point": [
                    {"x": -5.0, "y": -4.0}, {"x": 100.0, "y": -4.0}
                ]}}]}}
            }
        ],
        "road": [{"id": {"id": "road_1"}, "section": [{"laneId": [
            {"id": "lane_a"}, {"id": "lane_b"}
        ]}]}]
    }"#,
    )
    .unwrap();
    MapIndex::from_description(description, "two_lane".into())
}

fn ego_position(ts: f64, x: f64, y: f64, speed: f64) -> (f64, PositionSample) {
    (
        ts,
        PositionSample {
            pose: Pose {
                position: Point3 { x, y, z: 0.0 },
                heading: 0.0,
                linear_velocity: Point3 { x: speed, y: 0.0, z: 0.0 },
            },
        },
    )
}

fn chassis(speed: f64) -> ChassisSample {
    ChassisSample {
        gear: 1,
        speed,
        brake_percentage: 0.0,
    }
}

fn stopped_vehicle(id: &str, x: f64) -> ObstacleSample {
    ObstacleSample {
        id: id.to_string(),
        kind: ObstacleKind::Vehicle,
        position: Point3 { x, y: 0.0, z: 0.0 },
        theta: 0.0,
        speed: 0.0,
        polygon_points: vec![
            (x - 2.0, -1.0),
            (x + 2.0, -1.0),
            (x + 2.0, 1.0),
            (x - 2.0, 1.0),
        ],
    }
}

#[test]
fn straight_lane_run_derives_longitudinal_signals() {
    let map = straight_lane_map();
    let config = DeriveConfig::default();

    let mut channels = ChannelSet::default();
    for i in 0..3 {
        let ts = 1.0 + i as f64 * 0.1;
        let (ts, sample) = ego_position(ts, 5.0 + i as f64, 0.0, 10.0);
        channels.position.insert(ts, sample);
        channels.chassis.insert(ts, chassis(10.0));
    }
    channels.obstacles.insert(
        0.5,
        ObstaclesSample {
            obstacles: vec![stopped_vehicle("npc_1", 20.0)],
        },
    );

    let aligned = StreamAligner::new(&map).align(channels);
    let frames = SignalEngine::new(&map, &config).run(aligned);
    assert_eq!(frames.len(), 3);

    let frame = &frames[0];
    assert_eq!(frame.scene.current_lane.id.as_deref(), Some("lane_1"));
    assert_eq!(frame.scene.npc_ahead.as_deref(), Some("npc_1"));

    // ego front edge sits at x + (length - wheelbase)/2 + wheelbase
    let front_edge = 5.0 + (EGO_LENGTH - EGO_WHEELBASE) / 2.0 + EGO_WHEELBASE;
    let expected_gap = 18.0 - front_edge;
    assert_relative_eq!(frame.behavior.front_dist, expected_gap, epsilon = 1e-9);
    assert_relative_eq!(frame.behavior.v_ego, 10.0);
    // the vehicle ahead is stopped, so closing speed equals ego speed
    assert_relative_eq!(frame.behavior.v_rel_front, 10.0);
    assert_relative_eq!(
        frame.behavior.ttc_front,
        expected_gap / 10.0,
        epsilon = 1e-9
    );
    // d_safe = 5 + 1.5 * 10 = 20, well above the actual gap
    assert!(!frame.behavior.gap_safe);
    assert!(frame.behavior.in_lane);

    let trace = ResultAssembler::new(&config).assemble(map.map_name().to_string(), frames);
    assert_eq!(trace.agent_names, vec!["npc_1"]);
    assert!(trace.test_failures.is_empty());
    assert!(trace.min_separation > 0.0);
    // no destination ever reaches the log, so neither completion field can
    // report success
    assert!(!trace.completed);
    assert!(!trace.destination_reached);
}

#[test]
fn overlapping_footprints_record_one_accident() {
    let map = straight_lane_map();
    let config = DeriveConfig::default();

    let mut channels = ChannelSet::default();
    for i in 0..4 {
        let ts = 1.0 + i as f64 * 0.1;
        let (ts, sample) = ego_position(ts, 19.0, 0.0, 0.0);
        channels.position.insert(ts, sample);
        channels.chassis.insert(ts, chassis(0.0));
    }
    // the obstacle footprint overlaps the ego on every frame
    channels.obstacles.insert(
        0.5,
        ObstaclesSample {
            obstacles: vec![stopped_vehicle("npc_1", 20.0)],
        },
    );

    let aligned = StreamAligner::new(&map).align(channels);
    let frames = SignalEngine::new(&map, &config).run(aligned);
    let trace = ResultAssembler::new(&config).assemble(map.map_name().to_string(), frames);

    assert_eq!(trace.min_separation, 0.0);
    assert_eq!(trace.test_failures, vec!["Accident".to_string()]);
}

#[test]
fn lane_change_is_detected_at_the_window_start() {
    let map = two_lane_road_map();
    let config = DeriveConfig::default();

    let mut channels = ChannelSet::default();
    for i in 0..12 {
        let ts = 1.0 + i as f64 * 0.1;
        // first half in lane_a, second half in lane_b (same road)
        let y = if i < 6 { 2.0 } else { -2.0 };
        let (ts, sample) = ego_position(ts, 10.0 + i as f64, y, 10.0);
        channels.position.insert(ts, sample);
        channels.chassis.insert(ts, chassis(10.0));
    }
    channels.obstacles.insert(
        0.5,
        ObstaclesSample {
            obstacles: vec![],
        },
    );
    // left signal pending only on the first frame
    channels.planning.insert(
        0.9,
        PlanningSample {
            turn_signal: TurnSignal::Left,
            overtaking: false,
        },
    );
    channels.planning.insert(
        1.05,
        PlanningSample {
            turn_signal: TurnSignal::None,
            overtaking: false,
        },
    );

    let aligned = StreamAligner::new(&map).align(channels);
    let frames = SignalEngine::new(&map, &config).run(aligned);
    assert_eq!(frames.len(), 12);

    assert_eq!(frames[0].scene.current_lane.id.as_deref(), Some("lane_a"));
    assert_eq!(frames[6].scene.current_lane.id.as_deref(), Some("lane_b"));
    assert_eq!(frames[0].ego.planned_turn, TurnSignal::Left);
    assert_eq!(frames[1].ego.planned_turn, TurnSignal::None);

    // the verdict lands on the frame where the change started, not where
    // the lane boundary was crossed
    assert!(frames[0].behavior.lane_changing);
    assert!(frames[0].behavior.lane_change_started);
    assert!(!frames[5].behavior.lane_changing);
    assert!(!frames[6].behavior.lane_changing);
    assert!(frames[1].behavior.lane_change_finished);
}
