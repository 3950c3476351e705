//! Stream alignment: five independently sampled channels into one ordered
//! frame sequence.
//!
//! The position channel is the reference clock. Position and chassis samples
//! are emitted 1:1 by the recorder, so their sorted timestamp lists are
//! zipped after truncation to the common length. The remaining channels are
//! matched by nearest-past timestamp; a frame without an obstacle snapshot
//! is dropped, while missing planning or traffic-light records degrade to
//! defaults.

use geo::EuclideanDistance;
use tracing::{debug, info};

use crate::channels::{ChannelSet, ObstacleSample, TrafficLightSample};
use crate::classify::{AreaKind, Classification};
use crate::config::{DEFAULT_DISTANCE, EGO_LENGTH, EGO_WHEELBASE, EGO_WIDTH};
use crate::frame::{
    AlignedFrame, ChassisSnapshot, CurrentLane, EgoState, GroundTruth, Obstacle,
    TrafficLightState, VehicleSize,
};
use crate::geometry;
use crate::map_index::MapIndex;

/// Merges the decoded channels into aligned frames, re-anchoring every
/// obstacle to the frame's ego pose.
pub struct StreamAligner<'a> {
    map: &'a MapIndex,
}

impl<'a> StreamAligner<'a> {
    pub fn new(map: &'a MapIndex) -> Self {
        StreamAligner { map }
    }

    /// Consume the channel set and produce the ordered frame sequence.
    pub fn align(&self, mut channels: ChannelSet) -> Vec<AlignedFrame> {
        channels.sort();

        let paired = channels.position.len().min(channels.chassis.len());
        let mut frames = Vec::with_capacity(paired);
        let mut dropped = 0usize;
        let mut last_ts = f64::NEG_INFINITY;

        for ((pose_ts, position), (_, chassis)) in channels
            .position
            .entries()
            .iter()
            .take(paired)
            .zip(channels.chassis.entries().iter().take(paired))
        {
            let pose_ts = *pose_ts;
            // Frame timestamps must be strictly increasing and unique.
            if pose_ts <= last_ts {
                dropped += 1;
                continue;
            }

            // A frame cannot exist without an obstacle snapshot.
            let Some((_, obstacles)) = channels.obstacles.nearest_before(pose_ts) else {
                debug!(timestamp = pose_ts, "no obstacle snapshot before frame; dropping");
                dropped += 1;
                continue;
            };

            let pose = position.pose;
            let size = VehicleSize {
                length: EGO_LENGTH,
                width: EGO_WIDTH,
                wheelbase: EGO_WHEELBASE,
            };
            let footprint = geometry::rect_footprint(
                pose.position.x,
                pose.position.y,
                size.length,
                size.width,
                pose.heading,
                size.wheelbase,
            );

            let planning = channels
                .planning
                .nearest_before(pose_ts)
                .map(|(_, p)| p.clone())
                .unwrap_or_default();

            let truth = self.anchor_obstacles(&obstacles.obstacles, &footprint);

            let traffic_lights = channels
                .traffic_light
                .nearest_before(pose_ts)
                .map(|(_, sample)| self.anchor_traffic_lights(sample, &footprint))
                .unwrap_or_default();

            frames.push(AlignedFrame {
                timestamp: pose_ts,
                ego: EgoState {
                    pose,
                    size,
                    chassis: ChassisSnapshot {
                        gear: chassis.gear,
                        speed: chassis.speed,
                        brake_percentage: chassis.brake_percentage,
                    },
                    planned_turn: planning.turn_signal,
                    is_overtaking: planning.overtaking,
                    footprint: Some(footprint),
                },
                truth,
                traffic_lights,
            });
            last_ts = pose_ts;
        }

        info!(
            frames = frames.len(),
            dropped,
            "stream alignment complete"
        );
        frames
    }

    /// Recompute per-obstacle footprint, ego distance and lane classification
    /// against this frame's ego pose. The raw records were decoded with no
    /// ego context, so this runs once per frame.
    fn anchor_obstacles(
        &self,
        samples: &[ObstacleSample],
        ego_footprint: &geo::Polygon<f64>,
    ) -> GroundTruth {
        let mut obstacles = Vec::with_capacity(samples.len());
        let mut min_dist = DEFAULT_DISTANCE;
        let mut nearest: Option<String> = None;

        for sample in samples {
            let footprint = geometry::polygon_from_points(&sample.polygon_points);
            let dist_to_ego = footprint
                .as_ref()
                .map(|fp| ego_footprint.euclidean_distance(fp))
                .unwrap_or(DEFAULT_DISTANCE);

            let current_lane = footprint
                .as_ref()
                .and_then(|fp| self.map.locate(fp))
                .map(|classification| match classification {
                    Classification::Lanes(hits) => {
                        let hit = &hits[0];
                        CurrentLane {
                            id: Some(hit.lane_id.clone()),
                            kind: Some(AreaKind::Lane),
                            turn_code: hit.turn.code(),
                            lane_number: hit.lane_number,
                        }
                    }
                    Classification::Junctions(ids) => CurrentLane {
                        id: Some(ids[0].clone()),
                        kind: Some(AreaKind::Junction),
                        turn_code: 0,
                        lane_number: 0,
                    },
                })
                .unwrap_or_default();

            if dist_to_ego < min_dist {
                min_dist = dist_to_ego;
                nearest = Some(sample.id.clone());
            }

            obstacles.push(Obstacle {
                id: sample.id.clone(),
                kind: sample.kind.clone(),
                position: sample.position,
                theta: sample.theta,
                speed: sample.speed,
                polygon_points: sample.polygon_points.clone(),
                footprint,
                current_lane,
                dist_to_ego,
            });
        }

        GroundTruth {
            min_dist_to_ego: min_dist,
            nearest_npc: nearest,
            obstacles,
        }
    }

    /// Match reported lights to their map stop lines and keep the nearest.
    fn anchor_traffic_lights(
        &self,
        sample: &TrafficLightSample,
        ego_footprint: &geo::Polygon<f64>,
    ) -> TrafficLightState {
        let mut nearest = None;
        let mut min_distance: Option<f64> = None;

        for (idx, light) in sample.lights.iter().enumerate() {
            let distance = self
                .map
                .signals()
                .iter()
                .find(|signal| signal.id == light.id)
                .and_then(|signal| signal.stop_line.as_ref())
                .map(|line| ego_footprint.euclidean_distance(line));
            if let Some(distance) = distance {
                if min_distance.map_or(true, |d| distance < d) {
                    min_distance = Some(distance);
                    nearest = Some(idx);
                }
            }
        }

        TrafficLightState {
            lights: sample.lights.clone(),
            nearest,
            stop_line_distance: min_distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{
        ChassisSample, LightColor, ObstaclesSample, PlanningSample, PositionSample, TrafficLight,
        TurnSignal,
    };
    use crate::channels::{Point3, Pose};
    use crate::map_index::{MapDescription, MapIndex};
    use approx::assert_relative_eq;

    fn empty_map() -> MapIndex {
        MapIndex::from_description(MapDescription::default(), "empty".into())
    }

    fn position_at(x: f64) -> PositionSample {
        PositionSample {
            pose: Pose {
                position: Point3 { x, y: 0.0, z: 0.0 },
                heading: 0.0,
                linear_velocity: Point3 { x: 10.0, y: 0.0, z: 0.0 },
            },
        }
    }

    fn vehicle_at(x: f64) -> ObstacleSample {
        ObstacleSample {
            id: "npc_1".into(),
            kind: crate::channels::ObstacleKind::Vehicle,
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

    fn channels_with(n_pos: usize, n_chassis: usize) -> ChannelSet {
        let mut channels = ChannelSet::default();
        for i in 0..n_pos {
            channels
                .position
                .insert(1.0 + i as f64, position_at(i as f64));
        }
        for i in 0..n_chassis {
            channels.chassis.insert(
                1.0 + i as f64,
                ChassisSample {
                    gear: 1,
                    speed: 10.0,
                    brake_percentage: 0.0,
                },
            );
        }
        channels.obstacles.insert(
            0.5,
            ObstaclesSample {
                obstacles: vec![vehicle_at(20.0)],
            },
        );
        channels
    }

    #[test]
    fn position_and_chassis_truncate_to_common_length() {
        let map = empty_map();
        let frames = StreamAligner::new(&map).align(channels_with(5, 3));
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn frames_without_an_obstacle_snapshot_are_dropped() {
        let map = empty_map();
        let mut channels = channels_with(3, 3);
        // move the only obstacle snapshot after every pose timestamp
        channels.obstacles = Default::default();
        channels.obstacles.insert(
            99.0,
            ObstaclesSample {
                obstacles: vec![vehicle_at(20.0)],
            },
        );
        let frames = StreamAligner::new(&map).align(channels);
        assert!(frames.is_empty());
    }

    #[test]
    fn missing_planning_degrades_to_defaults() {
        let map = empty_map();
        let frames = StreamAligner::new(&map).align(channels_with(2, 2));
        assert_eq!(frames[0].ego.planned_turn, TurnSignal::None);
        assert!(!frames[0].ego.is_overtaking);
    }

    #[test]
    fn planning_uses_the_nearest_past_record() {
        let map = empty_map();
        let mut channels = channels_with(3, 3);
        channels.planning.insert(
            1.5,
            PlanningSample {
                turn_signal: TurnSignal::Left,
                overtaking: false,
            },
        );
        let frames = StreamAligner::new(&map).align(channels);
        // frame at ts=1.0 precedes the planning record, ts=2.0 follows it
        assert_eq!(frames[0].ego.planned_turn, TurnSignal::None);
        assert_eq!(frames[1].ego.planned_turn, TurnSignal::Left);
    }

    #[test]
    fn obstacles_are_re_anchored_per_frame() {
        let map = empty_map();
        let frames = StreamAligner::new(&map).align(channels_with(2, 2));
        // ego at x=0, front edge ~3.70; obstacle rear edge at 18.0
        let frame = &frames[0];
        assert_eq!(frame.truth.nearest_npc.as_deref(), Some("npc_1"));
        assert_relative_eq!(
            frame.truth.min_dist_to_ego,
            18.0 - ((EGO_LENGTH - EGO_WHEELBASE) / 2.0 + EGO_WHEELBASE),
            epsilon = 1e-9
        );
        // second frame's ego moved 1 unit closer
        assert!(frames[1].truth.min_dist_to_ego < frame.truth.min_dist_to_ego);
    }

    #[test]
    fn duplicate_reference_timestamps_are_skipped() {
        let map = empty_map();
        let mut channels = channels_with(2, 3);
        channels.position.insert(2.0, position_at(5.0));
        let frames = StreamAligner::new(&map).align(channels);
        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn traffic_lights_default_when_channel_is_silent() {
        let map = empty_map();
        let frames = StreamAligner::new(&map).align(channels_with(1, 1));
        assert!(frames[0].traffic_lights.lights.is_empty());
        assert!(frames[0].traffic_lights.nearest.is_none());
    }

    #[test]
    fn traffic_light_state_is_carried_through() {
        let map = empty_map();
        let mut channels = channels_with(2, 2);
        channels.traffic_light.insert(
            0.9,
            TrafficLightSample {
                lights: vec![TrafficLight {
                    id: "signal_1".into(),
                    color: LightColor::Red,
                }],
            },
        );
        let frames = StreamAligner::new(&map).align(channels);
        assert_eq!(frames[0].traffic_lights.lights.len(), 1);
        assert_eq!(frames[0].traffic_lights.lights[0].color, LightColor::Red);
        // empty map: no stop line to anchor against
        assert!(frames[0].traffic_lights.stop_line_distance.is_none());
    }
}
