//! Measurement-fusion core for a strapdown UAV navigation filter
//!
//! This crate implements the correction half of a 24-state navigation filter:
//! once per filter tick it folds horizontal velocity, vertical velocity,
//! horizontal position, and vertical height observations into a previously
//! predicted state and covariance. The prediction half (IMU mechanization and
//! covariance propagation), the delay-buffered sample pipeline, and the
//! scheduler that decides when a tick happens all live outside this crate and
//! interact with it through plain data structures.
//!
//! The crate is primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra)
//! for the fixed-size linear algebra, [`serde`](https://crates.io/crates/serde)
//! for parameter files and replay records, and [`log`](https://crates.io/crates/log)
//! for diagnostics. Floating point work is `f64` throughout.
//!
//! ## Crate overview
//!
//! - [linalg]: fixed-size covariance primitives (row/column collapse,
//!   symmetry enforcement, variance clamping).
//! - [measurements]: the six-slot observation record and the assembler that
//!   populates it from sensor samples and control flags, including the
//!   vertical reference selection.
//! - [fusion]: innovation gating and the sequential scalar Kalman updater,
//!   entered through [`fusion::VelPosFusion::fuse_vel_pos_height`].
//! - [health]: per-sensor fault flags, innovation-check flags, and last-fuse
//!   timestamps.
//! - [messages]: delayed sensor samples, per-tick inputs, and the vertical
//!   aiding diagnostic report.
//! - [params]: tuning parameters with JSON/YAML/TOML file support.
//! - [sim]: CSV tick records and a measurement-only replay loop for offline
//!   analysis and testing.
//!
//! ## State vector layout
//!
//! The companion filter carries 24 states. This crate reads and writes only
//! the velocity and position block, but the Kalman gain couples every state
//! through the covariance columns:
//!
//! | index | state |
//! |-------|-------|
//! | 0..4  | attitude states (opaque here) |
//! | 4..7  | velocity north, east, down (m/s) |
//! | 7..10 | position north, east, down (m) |
//! | 10..  | bias and wind states (opaque here) |
//!
//! Positions use the NED convention: `pos_d` grows downward, so an aircraft
//! at 10 m altitude has `pos_d = -10`.
//!
//! ## Sign convention
//!
//! Innovations handed to and produced by this crate are *predicted minus
//! measured* quantities. The state-correction primitive therefore applies
//! `x ← x − K · innovation`; a positive height innovation (the filter thinks
//! it is lower than the barometer does) pushes `pos_d` further negative.
//!
//! ## Sequential scalar fusion
//!
//! Observations are fused one scalar at a time in a fixed slot order
//! (VN, VE, VD, PN, PE, PD). Each accepted slot updates the covariance before
//! the next slot computes its gain, which avoids a joint innovation-matrix
//! inverse and keeps the per-slot health decisions independent. A
//! positive-definiteness guard inspects every diagonal element before a
//! covariance decrement is applied and collapses offending rows and columns
//! instead of letting a negative variance poison the filter.

pub mod fusion;
pub mod health;
pub mod linalg;
pub mod measurements;
pub mod messages;
pub mod params;
pub mod sim;

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/// Number of states carried by the companion navigation filter.
pub const NUM_STATES: usize = 24;

/// Full navigation state vector.
pub type StateVector = SVector<f64, NUM_STATES>;

/// Navigation covariance matrix, maintained symmetric positive semi-definite.
pub type Covariance = SMatrix<f64, NUM_STATES, NUM_STATES>;

/// State-vector index of the north velocity component.
pub const STATE_VEL_N: usize = 4;
/// State-vector index of the east velocity component.
pub const STATE_VEL_E: usize = 5;
/// State-vector index of the down velocity component.
pub const STATE_VEL_D: usize = 6;
/// State-vector index of the north position component.
pub const STATE_POS_N: usize = 7;
/// State-vector index of the east position component.
pub const STATE_POS_E: usize = 8;
/// State-vector index of the down position component.
pub const STATE_POS_D: usize = 9;

/// Control flags steering a single fusion tick.
///
/// The five `fuse_*` request flags are one-shot: the caller sets them before
/// invoking the fusion routine and the routine clears them before returning,
/// whether or not the requested fusion was accepted. The height-source bits
/// (`baro_hgt`, `gps_hgt`, `rng_hgt`, `ev_hgt`) select the vertical
/// reference; exactly one is expected to be set, and when several are set the
/// first in priority order baro > gps > range > vision wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    /// Fuse the precomputed NE velocity innovations this tick.
    pub fuse_hor_vel: bool,
    /// Fuse the auxiliary-source NE velocity innovations this tick.
    pub fuse_hor_vel_aux: bool,
    /// Fuse the vertical velocity innovation this tick.
    pub fuse_vert_vel: bool,
    /// Fuse the precomputed NE position innovations this tick.
    pub fuse_pos: bool,
    /// Fuse a height observation this tick.
    pub fuse_height: bool,
    /// Horizontal position is an odometry-style delta, not an absolute fix.
    pub fuse_hpos_as_odom: bool,
    /// Tilt alignment has completed; position and height gates are enforced.
    pub tilt_align: bool,
    /// Rotor-wash ground effect is expected; apply the baro deadzone.
    pub gnd_effect: bool,
    /// Barometer is the height reference.
    pub baro_hgt: bool,
    /// GNSS altitude is the height reference.
    pub gps_hgt: bool,
    /// Downward rangefinder is the height reference.
    pub rng_hgt: bool,
    /// External vision is the height reference.
    pub ev_hgt: bool,
}

impl ControlFlags {
    /// Clear the one-shot fusion request flags.
    ///
    /// Mode flags (`fuse_hpos_as_odom`, `tilt_align`, `gnd_effect`) and the
    /// height-source selection persist across ticks and are left untouched.
    pub fn clear_fusion_requests(&mut self) {
        self.fuse_hor_vel = false;
        self.fuse_hor_vel_aux = false;
        self.fuse_vert_vel = false;
        self.fuse_pos = false;
        self.fuse_height = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_fusion_requests_is_one_shot() {
        let mut flags = ControlFlags {
            fuse_hor_vel: true,
            fuse_hor_vel_aux: true,
            fuse_vert_vel: true,
            fuse_pos: true,
            fuse_height: true,
            fuse_hpos_as_odom: true,
            tilt_align: true,
            gnd_effect: true,
            baro_hgt: true,
            ..Default::default()
        };
        flags.clear_fusion_requests();
        assert!(!flags.fuse_hor_vel);
        assert!(!flags.fuse_hor_vel_aux);
        assert!(!flags.fuse_vert_vel);
        assert!(!flags.fuse_pos);
        assert!(!flags.fuse_height);
        // mode flags survive
        assert!(flags.fuse_hpos_as_odom);
        assert!(flags.tilt_align);
        assert!(flags.gnd_effect);
        assert!(flags.baro_hgt);
    }

    #[test]
    fn observation_slots_map_onto_velocity_position_block() {
        assert_eq!(STATE_VEL_N, 4);
        assert_eq!(STATE_POS_D, 9);
        assert_eq!(STATE_POS_D - STATE_VEL_N + 1, 6);
    }
}
