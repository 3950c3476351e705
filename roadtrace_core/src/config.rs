//! Tunable thresholds for signal derivation.
//!
//! A flat key/value object; every knob named here is recognized when
//! deserializing a JSON config file, and anything omitted falls back to the
//! defaults below.

use serde::{Deserialize, Serialize};

/// Ego physical constants. The recorded position channel does not carry the
/// vehicle's true dimensions, so the footprint is built from these.
pub const EGO_LENGTH: f64 = 4.7;
pub const EGO_WIDTH: f64 = 2.06;
pub const EGO_WHEELBASE: f64 = 2.697298;

/// Sentinel for "nothing found" in ahead-geofence distance queries.
pub const DEFAULT_DISTANCE: f64 = 200.0;

/// Thresholds consumed by the derivation engine and the result assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeriveConfig {
    /// Base term of the safe following distance `d_safe = d0 + k * v_ego`.
    pub d_safe_d0: f64,
    /// Velocity gain of the safe following distance.
    pub d_safe_k: f64,
    /// Below this ego speed, time-headway is reported as `infinity`.
    pub min_velocity_thw: f64,
    /// Below this closing speed, time-to-collision is reported as `infinity`.
    pub min_velocity_ttc: f64,
    /// Longitudinal acceleration (negative) at or below which a hard brake
    /// is flagged.
    pub hard_brake_accel: f64,
    /// Brake-pedal percentage above which a hard brake is flagged.
    pub hard_brake_percentage: f64,
    /// Lateral centerline offset below which the ego counts as in-lane.
    pub lane_offset_threshold: f64,
    /// A red signal's stop line closer than this is "ahead".
    pub red_light_range: f64,
    /// A stop sign's stop line closer than this is "ahead".
    pub stop_sign_range: f64,
    /// A pedestrian this close to a crosswalk polygon counts as inside it.
    pub crosswalk_buffer: f64,
    /// Ego speed below which the vehicle counts as stopped.
    pub stopped_velocity: f64,
    /// Continuous stopped time beyond which a stop needs a justification.
    pub unjustified_stop_duration: f64,
    /// A stop is justified if something blocks the road closer than this.
    pub unjustified_stop_front_dist: f64,
    /// Sentinel reported where a ratio or distance is undefined.
    pub infinity: f64,
    /// Minimum ego-obstacle separation at or below which the run is an
    /// accident. Negative values tolerate footprint overlap.
    pub collision_threshold: f64,
    /// Forward reach of the ahead geofence.
    pub ahead_reach: f64,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            d_safe_d0: 5.0,
            d_safe_k: 1.5,
            min_velocity_thw: 0.5,
            min_velocity_ttc: 0.5,
            hard_brake_accel: -3.0,
            hard_brake_percentage: 60.0,
            lane_offset_threshold: 1.0,
            red_light_range: 30.0,
            stop_sign_range: 15.0,
            crosswalk_buffer: 0.5,
            stopped_velocity: 0.3,
            unjustified_stop_duration: 5.0,
            unjustified_stop_front_dist: 10.0,
            infinity: 999.0,
            collision_threshold: 0.0,
            ahead_reach: DEFAULT_DISTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_configs_fill_defaults() {
        let cfg: DeriveConfig =
            serde_json::from_str(r#"{"red_light_range": 42.0}"#).unwrap();
        assert_eq!(cfg.red_light_range, 42.0);
        assert_eq!(cfg.stop_sign_range, DeriveConfig::default().stop_sign_range);
    }
}
