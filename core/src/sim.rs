//! Replay utilities and CSV data handling for the fusion core.
//!
//! This module provides:
//! - A struct (`TickRecord`) holding everything one fusion tick consumes,
//!   readable from and writable to CSV files
//! - A struct (`FusionLogRecord`) capturing the per-tick outputs for
//!   offline analysis
//! - `run_replay`, a measurement-only loop that drives the fusion core over
//!   a recorded tick stream
//!
//! Replay is deliberately measurement-only: no prediction runs between
//! ticks, so the state and covariance evolve purely through the recorded
//! observations. That makes replays deterministic and directly comparable
//! across tuning changes, at the price of not being a full navigation
//! solution.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;

use nalgebra::{Vector2, Vector3};

use crate::fusion::VelPosFusion;
use crate::measurements::NUM_OBS;
use crate::messages::{BaroSample, GpsSample, RangeSample, TickInputs, VisionSample};
use crate::params::FusionParams;
use crate::{
    ControlFlags, Covariance, StateVector, STATE_POS_D, STATE_POS_E, STATE_POS_N, STATE_VEL_D,
    STATE_VEL_E, STATE_VEL_N,
};

/// One recorded fusion tick: control flags, precomputed innovations, sensor
/// samples, and offsets, flattened into CSV-friendly scalar columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickRecord {
    /// Tick timestamp in microseconds
    pub time_us: u64,
    /// Request fusion of the precomputed NE velocity innovations
    pub fuse_hor_vel: bool,
    /// Request fusion of the auxiliary NE velocity innovations
    pub fuse_hor_vel_aux: bool,
    /// Request fusion of the vertical velocity innovation
    pub fuse_vert_vel: bool,
    /// Request fusion of the NE position innovations
    pub fuse_pos: bool,
    /// Request fusion of a height observation
    pub fuse_height: bool,
    /// Horizontal position is an odometry-style delta
    pub fuse_hpos_as_odom: bool,
    /// Tilt alignment has completed
    pub tilt_align: bool,
    /// Ground effect expected; baro deadzone active
    pub gnd_effect: bool,
    /// Barometer selected as height reference
    pub baro_hgt: bool,
    /// GNSS altitude selected as height reference
    pub gps_hgt: bool,
    /// Rangefinder selected as height reference
    pub rng_hgt: bool,
    /// External vision selected as height reference
    pub ev_hgt: bool,
    /// Precomputed north velocity innovation (m/s)
    pub innov_vel_n: f64,
    /// Precomputed east velocity innovation (m/s)
    pub innov_vel_e: f64,
    /// Precomputed down velocity innovation (m/s)
    pub innov_vel_d: f64,
    /// Precomputed north position innovation (m)
    pub innov_pos_n: f64,
    /// Precomputed east position innovation (m)
    pub innov_pos_e: f64,
    /// Auxiliary north velocity innovation (m/s)
    pub aux_innov_vel_n: f64,
    /// Auxiliary east velocity innovation (m/s)
    pub aux_innov_vel_e: f64,
    /// North velocity observation variance (m/s)²
    pub vel_obs_var_n: f64,
    /// East velocity observation variance (m/s)²
    pub vel_obs_var_e: f64,
    /// NE velocity innovation gate (1-sigma multiples)
    pub hvel_innov_gate: f64,
    /// NE position observation noise (m, 1-sigma)
    pub pos_obs_noise_ne: f64,
    /// NE position innovation gate (1-sigma multiples)
    pub pos_innov_gate_ne: f64,
    /// GNSS altitude (m)
    pub gps_hgt_m: f64,
    /// GNSS speed accuracy (m/s)
    pub gps_sacc: f64,
    /// GNSS vertical accuracy (m)
    pub gps_vacc: f64,
    /// Barometric altitude (m)
    pub baro_hgt_m: f64,
    /// Rangefinder slant range (m)
    pub rng_m: f64,
    /// Vision north position (m)
    pub ev_pos_n: f64,
    /// Vision east position (m)
    pub ev_pos_e: f64,
    /// Vision down position (m)
    pub ev_pos_d: f64,
    /// Vision reported position error (m, 1-sigma)
    pub ev_pos_err: f64,
    /// Barometric height offset (m)
    pub baro_hgt_offset: f64,
    /// GNSS altitude of the local origin (m)
    pub gps_alt_ref: f64,
    /// Height sensor vertical offset (m)
    pub hgt_sensor_offset: f64,
    /// Cosine of the rangefinder tilt from vertical
    pub r_rng_to_earth_2_2: f64,
}

impl TickRecord {
    /// Reads a CSV file and returns a vector of `TickRecord` structs.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes a slice of tick records to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<(), Box<dyn Error>> {
        let mut wtr = csv::Writer::from_path(path)?;
        for record in records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Control flags for this tick.
    pub fn control_flags(&self) -> ControlFlags {
        ControlFlags {
            fuse_hor_vel: self.fuse_hor_vel,
            fuse_hor_vel_aux: self.fuse_hor_vel_aux,
            fuse_vert_vel: self.fuse_vert_vel,
            fuse_pos: self.fuse_pos,
            fuse_height: self.fuse_height,
            fuse_hpos_as_odom: self.fuse_hpos_as_odom,
            tilt_align: self.tilt_align,
            gnd_effect: self.gnd_effect,
            baro_hgt: self.baro_hgt,
            gps_hgt: self.gps_hgt,
            rng_hgt: self.rng_hgt,
            ev_hgt: self.ev_hgt,
        }
    }

    /// Per-tick fusion inputs for this record.
    pub fn tick_inputs(&self) -> TickInputs {
        TickInputs {
            vel_pos_innov: [
                self.innov_vel_n,
                self.innov_vel_e,
                self.innov_vel_d,
                self.innov_pos_n,
                self.innov_pos_e,
                0.0,
            ],
            aux_vel_innov: [self.aux_innov_vel_n, self.aux_innov_vel_e],
            vel_obs_var_ne: Vector2::new(self.vel_obs_var_n, self.vel_obs_var_e),
            hvel_innov_gate: self.hvel_innov_gate,
            pos_obs_noise_ne: self.pos_obs_noise_ne,
            pos_innov_gate_ne: self.pos_innov_gate_ne,
            gps: GpsSample {
                hgt: self.gps_hgt_m,
                sacc: self.gps_sacc,
                vacc: self.gps_vacc,
            },
            baro: BaroSample {
                hgt: self.baro_hgt_m,
            },
            range: RangeSample { rng: self.rng_m },
            vision: VisionSample {
                pos_ned: Vector3::new(self.ev_pos_n, self.ev_pos_e, self.ev_pos_d),
                pos_err: self.ev_pos_err,
            },
            baro_hgt_offset: self.baro_hgt_offset,
            gps_alt_ref: self.gps_alt_ref,
            hgt_sensor_offset: self.hgt_sensor_offset,
            r_rng_to_earth_2_2: self.r_rng_to_earth_2_2,
            time_us: self.time_us,
        }
    }
}

/// Per-tick fusion outputs, flattened for CSV export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionLogRecord {
    pub time_us: u64,
    /// Velocity estimate after this tick (m/s)
    pub vel_n: f64,
    pub vel_e: f64,
    pub vel_d: f64,
    /// Position estimate after this tick (m)
    pub pos_n: f64,
    pub pos_e: f64,
    pub pos_d: f64,
    /// Published innovations per slot
    pub innov_vel_n: f64,
    pub innov_vel_e: f64,
    pub innov_vel_d: f64,
    pub innov_pos_n: f64,
    pub innov_pos_e: f64,
    pub innov_pos_d: f64,
    /// Gate test ratios per slot
    pub test_ratio_vel_n: f64,
    pub test_ratio_vel_e: f64,
    pub test_ratio_vel_d: f64,
    pub test_ratio_pos_n: f64,
    pub test_ratio_pos_e: f64,
    pub test_ratio_pos_d: f64,
    /// Grouped rejection flags after this tick
    pub reject_vel_ned: bool,
    pub reject_pos_ne: bool,
    pub reject_pos_d: bool,
    /// Any covariance fault flag raised after this tick
    pub covariance_fault: bool,
}

impl FusionLogRecord {
    /// Capture the fusion outputs after one tick.
    pub fn from_tick(time_us: u64, x: &StateVector, fusion: &VelPosFusion) -> Self {
        let innov: [f64; NUM_OBS] = fusion.vel_pos_innov;
        let ratio: [f64; NUM_OBS] = fusion.vel_pos_test_ratio;
        FusionLogRecord {
            time_us,
            vel_n: x[STATE_VEL_N],
            vel_e: x[STATE_VEL_E],
            vel_d: x[STATE_VEL_D],
            pos_n: x[STATE_POS_N],
            pos_e: x[STATE_POS_E],
            pos_d: x[STATE_POS_D],
            innov_vel_n: innov[0],
            innov_vel_e: innov[1],
            innov_vel_d: innov[2],
            innov_pos_n: innov[3],
            innov_pos_e: innov[4],
            innov_pos_d: innov[5],
            test_ratio_vel_n: ratio[0],
            test_ratio_vel_e: ratio[1],
            test_ratio_vel_d: ratio[2],
            test_ratio_pos_n: ratio[3],
            test_ratio_pos_e: ratio[4],
            test_ratio_pos_d: ratio[5],
            reject_vel_ned: fusion.innov_check_status.reject_vel_ned,
            reject_pos_ne: fusion.innov_check_status.reject_pos_ne,
            reject_pos_d: fusion.innov_check_status.reject_pos_d,
            covariance_fault: fusion.fault_status.any(),
        }
    }

    /// Writes a slice of log records to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<(), Box<dyn Error>> {
        let mut wtr = csv::Writer::from_path(path)?;
        for record in records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Drive the fusion core over a recorded tick stream.
///
/// The caller provides the initial state and covariance; both are mutated in
/// place tick by tick. Returns one log record per input record.
pub fn run_replay(
    fusion: &mut VelPosFusion,
    x: &mut StateVector,
    p: &mut Covariance,
    params: &FusionParams,
    records: &[TickRecord],
) -> Vec<FusionLogRecord> {
    let mut log = Vec::with_capacity(records.len());
    for record in records {
        let mut flags = record.control_flags();
        let inputs = record.tick_inputs();
        fusion.fuse_vel_pos_height(x, p, &mut flags, &inputs, params);
        log.push(FusionLogRecord::from_tick(record.time_us, x, fusion));
    }
    log
}
