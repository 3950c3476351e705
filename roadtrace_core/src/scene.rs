//! Pass 1: per-frame geometric signals.
//!
//! Everything here is a pure function of one aligned frame and the map
//! index; no frame reads another frame's values. Pass 2 depends on the
//! `current_lane` written here for every frame, which is why the whole
//! pass runs before any history-sensitive derivation starts.

use geo::{EuclideanDistance, Polygon};

use crate::classify::{AreaKind, Classification};
use crate::config::{DeriveConfig, DEFAULT_DISTANCE};
use crate::derive::RunDiagnostics;
use crate::frame::{
    AlignedFrame, CurrentLane, GroundTruth, NpcClassification, NpcRef, Obstacle, SceneSignals,
};
use crate::geometry::{self, normalize_angle};
use crate::map_index::{LaneTurn, MapIndex};

/// Reach of the oncoming-traffic geofence.
const OPPOSITE_REACH: f64 = 30.0;
/// Stationary vehicles in the upcoming junction needed to call a jam.
const TRAFFIC_JAM_COUNT: usize = 6;
/// Speed below which a vehicle counts as stationary for jam detection.
const STATIONARY_SPEED: f64 = 1.0;

/// Encode observed turn availability across all matched lanes into the
/// 8-way code.
pub fn encode_turn(forward: bool, left: bool, right: bool, u_turn: bool) -> u8 {
    if forward {
        if left && right {
            6
        } else if left {
            4
        } else if right {
            5
        } else {
            0
        }
    } else if left && right {
        7
    } else if left {
        1
    } else if right {
        2
    } else if u_turn {
        3
    } else {
        0
    }
}

pub(crate) fn derive(
    map: &MapIndex,
    config: &DeriveConfig,
    frame: &AlignedFrame,
    diagnostics: &mut RunDiagnostics,
) -> SceneSignals {
    let Some(footprint) = frame.ego.footprint.as_ref() else {
        diagnostics.missing_footprint();
        return SceneSignals::default();
    };

    let mut scene = SceneSignals {
        current_lane: ego_current_lane(map, footprint, diagnostics),
        ..SceneSignals::default()
    };

    let pose = &frame.ego.pose;
    let size = &frame.ego.size;
    let head = geometry::head_point(
        pose.position.x,
        pose.position.y,
        pose.heading,
        size.length,
        size.wheelbase,
    );
    let ahead = geometry::ahead_area(head, pose.heading, size.width, config.ahead_reach);

    ahead_distances(map, footprint, &ahead, &mut scene);
    ahead_obstacles(
        &frame.truth,
        footprint,
        &ahead,
        geometry::ahead_area(head, pose.heading, size.width, OPPOSITE_REACH),
        pose.heading,
        &mut scene,
    );
    scene.classification = classify_obstacles(map, &scene.current_lane, &frame.truth);
    scene.traffic_jam = traffic_jam(&scene, &frame.truth);
    scene
}

/// Which lane(s) or junction the ego occupies, with the 8-way turn code
/// OR-ed across every lane hit. Falls back to the nearest geofence within
/// tolerance when the footprint matches nothing.
fn ego_current_lane(
    map: &MapIndex,
    footprint: &Polygon<f64>,
    diagnostics: &mut RunDiagnostics,
) -> CurrentLane {
    match map.locate(footprint) {
        Some(Classification::Lanes(hits)) => {
            let mut forward = false;
            let mut left = false;
            let mut right = false;
            let mut u_turn = false;
            let mut number = 0u32;
            for hit in &hits {
                number += hit.lane_number;
                match hit.turn {
                    LaneTurn::NoTurn => forward = true,
                    LaneTurn::Left => left = true,
                    LaneTurn::Right => right = true,
                    LaneTurn::UTurn => u_turn = true,
                    LaneTurn::Unknown => {}
                }
            }
            CurrentLane {
                id: Some(hits[0].lane_id.clone()),
                kind: Some(AreaKind::Lane),
                turn_code: encode_turn(forward, left, right, u_turn),
                lane_number: number,
            }
        }
        Some(Classification::Junctions(ids)) => CurrentLane {
            id: Some(ids[0].clone()),
            kind: Some(AreaKind::Junction),
            turn_code: 0,
            lane_number: 0,
        },
        None => {
            if map.lane_count() == 0 && map.junction_count() == 0 {
                diagnostics.empty_map();
                return CurrentLane::default();
            }
            diagnostics.unclassified(map.lane_count(), map.junction_count());
            match map.nearest_area(footprint) {
                Some((id, AreaKind::Lane, _)) => CurrentLane {
                    turn_code: map.lane_turn(&id).code(),
                    lane_number: map.lane_count_on_road(&id),
                    kind: Some(AreaKind::Lane),
                    id: Some(id),
                },
                Some((id, AreaKind::Junction, _)) => CurrentLane {
                    id: Some(id),
                    kind: Some(AreaKind::Junction),
                    turn_code: 0,
                    lane_number: 0,
                },
                None => CurrentLane::default(),
            }
        }
    }
}

/// Minimum ego distance to each control-geometry class whose geofence the
/// ahead area touches. Sentinel 200 when nothing is ahead; the signal stop
/// line is additionally capped by the stop-sign distance.
fn ahead_distances(
    map: &MapIndex,
    ego: &Polygon<f64>,
    ahead: &Polygon<f64>,
    scene: &mut SceneSignals,
) {
    for (_, crosswalk) in map.crosswalks() {
        if ahead.euclidean_distance(crosswalk) == 0.0 {
            scene.crosswalk_ahead = scene.crosswalk_ahead.min(ego.euclidean_distance(crosswalk));
        }
    }

    for junction in map.junctions() {
        if ahead.euclidean_distance(&junction.polygon) == 0.0 {
            let dist = ego.euclidean_distance(&junction.polygon);
            if dist < scene.junction_ahead {
                scene.junction_ahead = dist;
                scene.junction_ahead_id = Some(junction.id.clone());
            }
        }
    }

    for sign in map.stop_signs() {
        if let Some(line) = &sign.stop_line {
            if ahead.euclidean_distance(line) == 0.0 {
                scene.stop_sign_ahead = scene.stop_sign_ahead.min(ego.euclidean_distance(line));
            }
        }
    }

    let mut signal_line = DEFAULT_DISTANCE;
    for signal in map.signals() {
        if let Some(line) = &signal.stop_line {
            if ahead.euclidean_distance(line) == 0.0 {
                signal_line = signal_line.min(ego.euclidean_distance(line));
            }
        }
    }
    scene.stop_line_ahead = signal_line.min(scene.stop_sign_ahead);
}

/// Nearest same-lane vehicle, nearest pedestrian, and nearest oncoming
/// vehicle inside their respective ahead geofences.
fn ahead_obstacles(
    truth: &GroundTruth,
    ego: &Polygon<f64>,
    ahead: &Polygon<f64>,
    ahead_opposite: Polygon<f64>,
    ego_heading: f64,
    scene: &mut SceneSignals,
) {
    let mut npc_best = f64::MAX;
    let mut ped_best = f64::MAX;
    let mut opposite_best = f64::MAX;
    let ego_heading = normalize_angle(ego_heading);

    for obstacle in &truth.obstacles {
        let Some(footprint) = obstacle.footprint.as_ref() else {
            continue;
        };
        match obstacle.kind {
            crate::channels::ObstacleKind::Vehicle => {
                if ahead.euclidean_distance(footprint) == 0.0 && in_ego_path(scene, obstacle) {
                    let dist = ego.euclidean_distance(footprint);
                    if dist < npc_best {
                        npc_best = dist;
                        scene.npc_ahead = Some(obstacle.id.clone());
                    }
                }
                if ahead_opposite.euclidean_distance(footprint) == 0.0 {
                    let diff = (normalize_angle(obstacle.theta) - ego_heading).abs();
                    if diff > 3.0 * std::f64::consts::FRAC_PI_4
                        && diff < 5.0 * std::f64::consts::FRAC_PI_4
                    {
                        let dist = ego.euclidean_distance(footprint);
                        if dist < opposite_best {
                            opposite_best = dist;
                            scene.npc_opposite = Some(obstacle.id.clone());
                        }
                    }
                }
            }
            crate::channels::ObstacleKind::Pedestrian => {
                if ahead.euclidean_distance(footprint) == 0.0 {
                    let dist = ego.euclidean_distance(footprint);
                    if dist < ped_best {
                        ped_best = dist;
                        scene.ped_ahead = Some(obstacle.id.clone());
                    }
                }
            }
            crate::channels::ObstacleKind::Other(_) => {}
        }
    }
}

/// A vehicle blocks the ego's path if it shares the ego's lane, or if the
/// ego is inside a junction where lane discipline does not apply.
fn in_ego_path(scene: &SceneSignals, obstacle: &Obstacle) -> bool {
    match scene.current_lane.kind {
        Some(AreaKind::Lane) => {
            obstacle.current_lane.kind == Some(AreaKind::Lane)
                && obstacle.current_lane.id == scene.current_lane.id
        }
        Some(AreaKind::Junction) => true,
        None => false,
    }
}

fn classify_obstacles(
    map: &MapIndex,
    ego_lane: &CurrentLane,
    truth: &GroundTruth,
) -> NpcClassification {
    let mut result = NpcClassification::default();

    for obstacle in &truth.obstacles {
        let reference = NpcRef {
            id: obstacle.id.clone(),
            area_id: obstacle.current_lane.id.clone(),
            kind: obstacle.current_lane.kind,
            turn_code: obstacle.current_lane.turn_code,
        };
        match (ego_lane.kind, obstacle.current_lane.kind) {
            (Some(AreaKind::Lane), Some(AreaKind::Lane)) => {
                let same_road = match (&ego_lane.id, &obstacle.current_lane.id) {
                    (Some(a), Some(b)) => map.same_road(a, b),
                    _ => false,
                };
                if same_road {
                    result.next_to_ego.push(reference);
                } else {
                    result.on_different_road.push(reference);
                }
            }
            (Some(AreaKind::Lane), Some(AreaKind::Junction)) => {
                result.in_the_junction.push(reference);
            }
            (Some(AreaKind::Junction), Some(AreaKind::Lane)) => {
                result.ego_in_junction_lane.push(reference);
            }
            (Some(AreaKind::Junction), Some(AreaKind::Junction)) => {
                result.ego_in_junction_junction.push(reference);
            }
            _ => {}
        }
    }
    result
}

/// Jammed when enough stationary vehicles sit inside the junction the ego
/// is approaching.
fn traffic_jam(scene: &SceneSignals, truth: &GroundTruth) -> bool {
    let Some(junction_id) = scene.junction_ahead_id.as_ref() else {
        return false;
    };
    let stationary = truth
        .obstacles
        .iter()
        .filter(|o| {
            o.kind == crate::channels::ObstacleKind::Vehicle
                && o.speed < STATIONARY_SPEED
                && o.current_lane.kind == Some(AreaKind::Junction)
                && o.current_lane.id.as_deref() == Some(junction_id.as_str())
        })
        .count();
    stationary >= TRAFFIC_JAM_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_code_table_is_exhaustive_and_deterministic() {
        // (forward, left, right, u_turn) -> code
        let table = [
            ((false, false, false, false), 0),
            ((false, true, false, false), 1),
            ((false, false, true, false), 2),
            ((false, false, false, true), 3),
            ((true, true, false, false), 4),
            ((true, false, true, false), 5),
            ((true, true, true, false), 6),
            ((false, true, true, false), 7),
            ((true, false, false, false), 0),
        ];
        for ((f, l, r, u), expected) in table {
            assert_eq!(encode_turn(f, l, r, u), expected, "({f},{l},{r},{u})");
        }
        // u-turn is masked by any other flag combination that wins first
        assert_eq!(encode_turn(true, false, false, true), 0);
        assert_eq!(encode_turn(false, true, false, true), 1);
    }

    #[test]
    fn jam_requires_six_stationary_vehicles_in_the_ahead_junction() {
        use crate::channels::{ObstacleKind, Point3};
        use crate::frame::Obstacle;

        let make = |id: usize, speed: f64| Obstacle {
            id: format!("npc_{id}"),
            kind: ObstacleKind::Vehicle,
            position: Point3::default(),
            theta: 0.0,
            speed,
            polygon_points: vec![],
            footprint: None,
            current_lane: CurrentLane {
                id: Some("junction_1".into()),
                kind: Some(AreaKind::Junction),
                turn_code: 0,
                lane_number: 0,
            },
            dist_to_ego: 10.0,
        };

        let mut scene = SceneSignals {
            junction_ahead_id: Some("junction_1".into()),
            ..SceneSignals::default()
        };
        let mut truth = GroundTruth {
            obstacles: (0..5).map(|i| make(i, 0.1)).collect(),
            ..GroundTruth::default()
        };
        assert!(!traffic_jam(&scene, &truth));

        truth.obstacles.push(make(5, 0.1));
        assert!(traffic_jam(&scene, &truth));

        // a moving vehicle does not count
        truth.obstacles[5].speed = 2.0;
        assert!(!traffic_jam(&scene, &truth));

        scene.junction_ahead_id = None;
        assert!(!traffic_jam(&scene, &truth));
    }
}
