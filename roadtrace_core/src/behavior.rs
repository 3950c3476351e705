//! Pass 2: history-sensitive behavior signals.
//!
//! Runs strictly in timestamp order. The first sweep resolves the windowed
//! event detectors (lane change, turn around), which write their verdict
//! onto the frame at the *start* of the window. The second sweep derives
//! everything that reads those finished flags or the previous frame's
//! accumulators: priority agents, longitudinal kinematics, braking edges,
//! traffic-control compliance and stall tracking.

use geo::{EuclideanDistance, LineString, Point};

use crate::channels::{LightColor, ObstacleKind, TurnSignal};
use crate::classify::AreaKind;
use crate::config::{DeriveConfig, DEFAULT_DISTANCE};
use crate::frame::Frame;
use crate::geometry::{self, normalize_angle};
use crate::map_index::MapIndex;

/// Lookback window of the lane-change detector, in frames.
const LANE_CHANGE_WINDOW: usize = 10;
/// Lookback window of the turn-around detector, in frames.
const TURN_AROUND_WINDOW: usize = 20;
/// Heading delta beyond which the ego has turned around.
const TURN_AROUND_ANGLE: f64 = 3.0 * std::f64::consts::FRAC_PI_4;

pub(crate) fn run(frames: &mut [Frame], map: &MapIndex, config: &DeriveConfig) {
    for i in 0..frames.len() {
        if i >= LANE_CHANGE_WINDOW {
            detect_lane_change(frames, i, map);
        }
        if i >= TURN_AROUND_WINDOW {
            detect_turn_around(frames, i);
        }
    }

    for i in 0..frames.len() {
        longitudinal(frames, i, config);
        braking(frames, i, config);
        lateral(frames, i, map, config);
        traffic_control(frames, i, map, config);
        stall(frames, i, config);
        priority_agents(frames, i);
    }
}

/// If the frame one window back had a pending turn signal and was not
/// already mid-change, and the ego reached a different lane on the same
/// road anywhere in the window, that frame starts a lane change. The flag
/// is write-once: a frame already marked is never revisited.
fn detect_lane_change(frames: &mut [Frame], current: usize, map: &MapIndex) {
    let start = current - LANE_CHANGE_WINDOW;
    if frames[start].behavior.lane_changing {
        return;
    }
    if frames[start].ego.planned_turn == TurnSignal::None {
        return;
    }
    let Some(start_lane) = frames[start].scene.current_lane.id.clone() else {
        return;
    };

    let changed = frames[start + 1..=current].iter().any(|frame| {
        frame
            .scene
            .current_lane
            .id
            .as_ref()
            .is_some_and(|lane| *lane != start_lane && map.same_road(&start_lane, lane))
    });
    if changed {
        frames[start].behavior.lane_changing = true;
    }
}

/// Same windowed shape as the lane-change detector, but keyed on heading:
/// a delta beyond 135 degrees relative to the window start marks that frame
/// as turning around.
fn detect_turn_around(frames: &mut [Frame], current: usize) {
    let start = current - TURN_AROUND_WINDOW;
    if frames[start].ego.planned_turn == TurnSignal::None {
        return;
    }
    let start_heading = normalize_angle(frames[start].ego.pose.heading);

    let turned = frames[start + 1..=current].iter().any(|frame| {
        (normalize_angle(frame.ego.pose.heading) - start_heading).abs() > TURN_AROUND_ANGLE
    });
    if turned {
        frames[start].behavior.turning_around = true;
    }
}

/// Ego speed, distance to the front vehicle, safe gap, THW and TTC. The
/// division floors guarantee neither ratio ever blows up near zero speed;
/// below the floor the signal is exactly the `infinity` sentinel.
fn longitudinal(frames: &mut [Frame], i: usize, config: &DeriveConfig) {
    let frame = &frames[i];
    let velocity = frame.ego.pose.linear_velocity;
    let v_ego = geometry::vector_speed(velocity.x, velocity.y, 0.0);

    let front = frame.scene.npc_ahead.as_ref().and_then(|id| {
        frame
            .truth
            .obstacles
            .iter()
            .find(|o| o.id == *id)
            .map(|o| (o.dist_to_ego, o.speed))
    });

    let behavior = &mut frames[i].behavior;
    behavior.v_ego = v_ego;
    behavior.d_safe = config.d_safe_d0 + config.d_safe_k * v_ego;

    match front {
        Some((dist, front_speed)) => {
            behavior.front_dist = dist;
            behavior.v_rel_front = v_ego - front_speed;
            behavior.thw_front = if v_ego >= config.min_velocity_thw {
                dist / v_ego
            } else {
                config.infinity
            };
            behavior.ttc_front = if behavior.v_rel_front >= config.min_velocity_ttc {
                dist / behavior.v_rel_front
            } else {
                config.infinity
            };
        }
        None => {
            behavior.front_dist = config.infinity;
            // worst case: assume the obstacle ahead, if any, is stationary
            behavior.v_rel_front = v_ego;
            behavior.thw_front = config.infinity;
            behavior.ttc_front = config.infinity;
        }
    }
    behavior.gap_safe = behavior.front_dist >= behavior.d_safe;
}

/// Finite-difference acceleration, hard-brake flag and lane-change edges.
fn braking(frames: &mut [Frame], i: usize, config: &DeriveConfig) {
    let (a_ego, prev_changing) = if i == 0 {
        (0.0, false)
    } else {
        let dt = frames[i].timestamp - frames[i - 1].timestamp;
        let accel = if dt > 0.0 {
            (frames[i].behavior.v_ego - frames[i - 1].behavior.v_ego) / dt
        } else {
            0.0
        };
        (accel, frames[i - 1].behavior.lane_changing)
    };

    let brake_pct = frames[i].ego.chassis.brake_percentage;
    let behavior = &mut frames[i].behavior;
    behavior.a_ego = a_ego;
    behavior.hard_brake =
        a_ego < config.hard_brake_accel || brake_pct > config.hard_brake_percentage;
    behavior.lane_change_started = behavior.lane_changing && !prev_changing;
    behavior.lane_change_finished = !behavior.lane_changing && prev_changing;
    behavior.brake_or_lane_change = behavior.hard_brake || behavior.lane_changing;
}

/// Offset from the current lane's centerline. Sentinel when the ego is not
/// in a lane or the lane description carries no waypoints.
fn lateral(frames: &mut [Frame], i: usize, map: &MapIndex, config: &DeriveConfig) {
    let frame = &frames[i];
    let position = Point::new(frame.ego.pose.position.x, frame.ego.pose.position.y);

    let offset = match (
        frame.scene.current_lane.kind,
        frame.scene.current_lane.id.as_ref(),
    ) {
        (Some(AreaKind::Lane), Some(lane_id)) => {
            map.lane_waypoints(lane_id).and_then(|waypoints| {
                if waypoints.len() >= 2 {
                    let centerline = LineString::from(waypoints.to_vec());
                    Some(position.euclidean_distance(&centerline))
                } else {
                    waypoints
                        .first()
                        .map(|w| position.euclidean_distance(&Point::new(w.x, w.y)))
                }
            })
        }
        _ => None,
    };

    let behavior = &mut frames[i].behavior;
    match offset {
        Some(offset) => {
            behavior.lat_offset = offset;
            behavior.in_lane = offset < config.lane_offset_threshold;
        }
        None => {
            behavior.lat_offset = config.infinity;
            behavior.in_lane = false;
        }
    }
}

/// Red-light and stop-sign hysteresis plus crosswalk occupancy.
fn traffic_control(frames: &mut [Frame], i: usize, map: &MapIndex, config: &DeriveConfig) {
    let frame = &frames[i];

    let nearest_red = frame
        .traffic_lights
        .nearest
        .and_then(|idx| frame.traffic_lights.lights.get(idx))
        .is_some_and(|light| light.color == LightColor::Red);
    let red_light_ahead = nearest_red
        && frame
            .traffic_lights
            .stop_line_distance
            .is_some_and(|d| d < config.red_light_range);
    let red_distance = frame.traffic_lights.stop_line_distance;

    let stop_sign_near = frame.scene.stop_sign_ahead < config.stop_sign_range;

    let ped_in_crosswalk = frame.truth.obstacles.iter().any(|obstacle| {
        if obstacle.kind != ObstacleKind::Pedestrian {
            return false;
        }
        let point = Point::new(obstacle.position.x, obstacle.position.y);
        map.crosswalks()
            .any(|(_, polygon)| point.euclidean_distance(polygon) <= config.crosswalk_buffer)
    });

    let scene_stop_sign = frame.scene.stop_sign_ahead;
    let scene_stop_line = frame.scene.stop_line_ahead;
    let scene_crosswalk = frame.scene.crosswalk_ahead;

    let behavior = &mut frames[i].behavior;
    behavior.red_light_ahead = red_light_ahead;
    behavior.should_stop_for_red = red_light_ahead;
    behavior.dist_to_red_stop_line = if red_light_ahead {
        red_distance.unwrap_or(config.infinity)
    } else {
        config.infinity
    };
    behavior.stop_sign_ahead = stop_sign_near;
    behavior.should_stop_at_stop_sign = stop_sign_near;
    behavior.dist_to_stop_sign = if stop_sign_near {
        scene_stop_sign
    } else {
        config.infinity
    };
    // detail distances report the infinity sentinel when nothing is ahead,
    // matching the red-light and stop-sign fields above
    behavior.dist_to_stop_line = if scene_stop_line < DEFAULT_DISTANCE {
        scene_stop_line
    } else {
        config.infinity
    };
    behavior.ped_in_crosswalk = ped_in_crosswalk;
    behavior.dist_to_crosswalk = if scene_crosswalk < DEFAULT_DISTANCE {
        scene_crosswalk
    } else {
        config.infinity
    };
}

/// Running stall accumulator and the unjustified-stop verdict. The duration
/// is carried frame to frame and reset to exactly zero the moment the ego
/// moves again.
fn stall(frames: &mut [Frame], i: usize, config: &DeriveConfig) {
    let stopped = frames[i].behavior.v_ego < config.stopped_velocity;
    let duration = if !stopped {
        0.0
    } else if i == 0 {
        0.0
    } else {
        let dt = (frames[i].timestamp - frames[i - 1].timestamp).max(0.0);
        frames[i - 1].behavior.stopped_duration + dt
    };

    let behavior = &mut frames[i].behavior;
    behavior.stopped_duration = duration;
    behavior.unjustified_stop = duration > config.unjustified_stop_duration
        && !behavior.red_light_ahead
        && !behavior.ped_in_crosswalk
        && behavior.front_dist > config.unjustified_stop_front_dist;
}

/// Vehicles and pedestrians the ego must yield to, judged against the
/// rear-axle-anchored geofences and the finished lane-change flag.
fn priority_agents(frames: &mut [Frame], i: usize) {
    let frame = &frames[i];
    if frame.ego.footprint.is_none() {
        return;
    }

    let pose = &frame.ego.pose;
    let size = &frame.ego.size;
    let back = geometry::back_point(
        pose.position.x,
        pose.position.y,
        pose.heading,
        size.length,
        size.wheelbase,
    );
    let forward = geometry::ahead_area(back, pose.heading, 200.0, 200.0);
    let forward_left = geometry::forward_left_area(back, pose.heading);
    let forward_right = geometry::forward_right_area(back, pose.heading);
    let back_left = geometry::back_left_area(back, pose.heading, size.width);
    let back_right = geometry::back_right_area(back, pose.heading, size.width);

    let planned_turn = frame.ego.planned_turn;
    let lane_changing = frame.behavior.lane_changing;
    let ego_heading = normalize_angle(pose.heading);
    let ego_speed = frame.behavior.v_ego;

    let mut priority_npc = false;
    let mut priority_peds = false;

    for obstacle in &frame.truth.obstacles {
        let Some(footprint) = obstacle.footprint.as_ref() else {
            continue;
        };
        let dist = obstacle.dist_to_ego;

        if frame.scene.npc_ahead.as_deref() == Some(obstacle.id.as_str()) && dist < 3.0 {
            priority_npc = true;
        }

        match obstacle.kind {
            ObstacleKind::Vehicle => {
                let heading_diff = (normalize_angle(obstacle.theta) - ego_heading).abs();

                // crossing traffic while the ego is turning
                if planned_turn != TurnSignal::None
                    && !lane_changing
                    && heading_diff > std::f64::consts::FRAC_PI_4
                    && heading_diff < 3.0 * std::f64::consts::FRAC_PI_4
                    && dist < 30.0
                    && forward.euclidean_distance(footprint) == 0.0
                {
                    priority_npc = true;
                }

                // faster traffic in the blind spot of an active lane change
                if lane_changing && heading_diff < std::f64::consts::FRAC_PI_4 {
                    let blind_spot = match planned_turn {
                        TurnSignal::Left => Some(&back_left),
                        TurnSignal::Right => Some(&back_right),
                        TurnSignal::None => None,
                    };
                    if let Some(area) = blind_spot {
                        if area.euclidean_distance(footprint) == 0.0
                            && dist < 10.0
                            && obstacle.speed > ego_speed
                        {
                            priority_npc = true;
                        }
                    }
                }
            }
            ObstacleKind::Pedestrian => {
                let (area, range) = match planned_turn {
                    TurnSignal::None => (&forward, 3.0),
                    TurnSignal::Left => (&forward_left, 10.0),
                    TurnSignal::Right => (&forward_right, 10.0),
                };
                if dist < range && area.euclidean_distance(footprint) == 0.0 {
                    priority_peds = true;
                }
            }
            ObstacleKind::Other(_) => {}
        }
    }

    let behavior = &mut frames[i].behavior;
    behavior.priority_npc_ahead = priority_npc;
    behavior.priority_peds_ahead = priority_peds;
}
