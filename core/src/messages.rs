//! Sensor samples, per-tick inputs, and the vertical-aiding diagnostic report.
//!
//! The structures in this module are the data contract between the fusion
//! core and its collaborators: the delay buffer hands over samples already
//! time-aligned with the prediction horizon, the outer controller hands over
//! the innovations and gates it precomputed, and the core hands back a pure
//! diagnostic record that a telemetry layer may or may not consume.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// GNSS sample delayed to the prediction horizon.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GpsSample {
    /// Altitude above the reference ellipsoid (m, up positive).
    pub hgt: f64,
    /// Receiver-reported speed accuracy (m/s, 1-sigma).
    pub sacc: f64,
    /// Receiver-reported vertical position accuracy (m, 1-sigma).
    pub vacc: f64,
}

/// Barometric sample delayed to the prediction horizon.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BaroSample {
    /// Pressure altitude (m, up positive).
    pub hgt: f64,
}

/// Downward rangefinder sample delayed to the prediction horizon.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RangeSample {
    /// Measured slant range to ground (m).
    pub rng: f64,
}

/// External-vision sample delayed to the prediction horizon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisionSample {
    /// Position estimate in the local NED frame (m).
    pub pos_ned: Vector3<f64>,
    /// Reported position error (m, 1-sigma).
    pub pos_err: f64,
}

impl Default for VisionSample {
    fn default() -> Self {
        VisionSample {
            pos_ned: Vector3::zeros(),
            pos_err: 0.0,
        }
    }
}

/// Everything the caller supplies for one fusion tick besides state,
/// covariance, flags, and tuning parameters.
///
/// Velocity and horizontal-position innovations are computed by the
/// prediction step and arrive here ready to use; the height innovation is
/// computed inside the core from whichever vertical reference is active.
#[derive(Clone, Copy, Debug)]
pub struct TickInputs {
    /// Precomputed innovations for slots VN, VE, VD, PN, PE. The last entry
    /// is scratch; the core computes the height innovation itself.
    pub vel_pos_innov: [f64; 6],
    /// Auxiliary-source NE velocity innovation pair, used when
    /// `fuse_hor_vel_aux` is set without `fuse_hor_vel`.
    pub aux_vel_innov: [f64; 2],
    /// Observation variances for the NE velocity innovations (m/s)².
    pub vel_obs_var_ne: Vector2<f64>,
    /// Innovation gate for the NE velocity observations (1-sigma multiples).
    pub hvel_innov_gate: f64,
    /// Observation noise for the NE position innovations (m, 1-sigma).
    pub pos_obs_noise_ne: f64,
    /// Innovation gate for the NE position observations (1-sigma multiples).
    pub pos_innov_gate_ne: f64,
    /// Delayed GNSS sample.
    pub gps: GpsSample,
    /// Delayed barometric sample.
    pub baro: BaroSample,
    /// Delayed rangefinder sample.
    pub range: RangeSample,
    /// Delayed external-vision sample.
    pub vision: VisionSample,
    /// Current barometric height offset (m).
    pub baro_hgt_offset: f64,
    /// GNSS altitude of the local origin (m).
    pub gps_alt_ref: f64,
    /// Vertical offset of the active height sensor from the body origin (m).
    pub hgt_sensor_offset: f64,
    /// Element (2,2) of the rangefinder-to-earth rotation, i.e. the cosine of
    /// the sensor tilt from vertical.
    pub r_rng_to_earth_2_2: f64,
    /// Tick timestamp (µs); stamped into the ledger on successful fusion.
    pub time_us: u64,
}

impl Default for TickInputs {
    fn default() -> Self {
        TickInputs {
            vel_pos_innov: [0.0; 6],
            aux_vel_innov: [0.0; 2],
            vel_obs_var_ne: Vector2::zeros(),
            hvel_innov_gate: 0.0,
            pos_obs_noise_ne: 0.0,
            pos_innov_gate_ne: 0.0,
            gps: GpsSample::default(),
            baro: BaroSample::default(),
            range: RangeSample::default(),
            vision: VisionSample::default(),
            baro_hgt_offset: 0.0,
            gps_alt_ref: 0.0,
            hgt_sensor_offset: 0.0,
            r_rng_to_earth_2_2: 0.0,
            time_us: 0,
        }
    }
}

/// Which vertical reference fed the height slot this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightSource {
    Baro,
    Gps,
    Range,
    Vision,
}

/// Per-tick vertical-aiding diagnostic record.
///
/// Emitted whenever height fusion is requested. Purely observational: the
/// fusion outcome does not depend on anybody reading it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightAidingReport {
    /// Estimated down position at this tick (m).
    pub pos_d_est: f64,
    /// Baro measurement converted to the state frame (m, down positive).
    pub baro_state_frame: f64,
    /// Rangefinder measurement converted to the state frame (m, down
    /// positive), including the tilt correction and ground-clearance floor.
    pub range_state_frame: f64,
    /// Barometric height offset in effect (m).
    pub baro_hgt_offset: f64,
    /// Height-sensor vertical offset in effect (m).
    pub hgt_sensor_offset: f64,
    /// Source actually feeding the height slot, if any survived selection.
    pub source: Option<HeightSource>,
    /// Tick timestamp (µs).
    pub time_us: u64,
}
