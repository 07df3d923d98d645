//! Per-sensor health flags and fusion timestamps.
//!
//! The ledger is the only error surface of the fusion core: nothing on the
//! tick path returns a `Result`. Gate rejections raise `reject_*` bits,
//! covariance degeneracy raises `bad_*` bits, and successful fusions advance
//! the matching timestamp. The flags are plain booleans rather than a packed
//! bitfield; the core is single-threaded so atomicity buys nothing.

use serde::{Deserialize, Serialize};

/// Per-axis covariance fault flags, one per observation slot.
///
/// A flag is raised when the positive-definiteness guard fires while fusing
/// that slot and cleared again the next time the same slot fuses cleanly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultStatus {
    pub bad_vel_n: bool,
    pub bad_vel_e: bool,
    pub bad_vel_d: bool,
    pub bad_pos_n: bool,
    pub bad_pos_e: bool,
    pub bad_pos_d: bool,
}

impl FaultStatus {
    /// Set or clear the fault flag belonging to observation slot
    /// `obs_index` (0..6 for VN, VE, VD, PN, PE, PD).
    pub(crate) fn set_bad(&mut self, obs_index: usize, bad: bool) {
        match obs_index {
            0 => self.bad_vel_n = bad,
            1 => self.bad_vel_e = bad,
            2 => self.bad_vel_d = bad,
            3 => self.bad_pos_n = bad,
            4 => self.bad_pos_e = bad,
            5 => self.bad_pos_d = bad,
            _ => {}
        }
    }

    /// True when any axis is currently flagged.
    pub fn any(&self) -> bool {
        self.bad_vel_n
            || self.bad_vel_e
            || self.bad_vel_d
            || self.bad_pos_n
            || self.bad_pos_e
            || self.bad_pos_d
    }
}

/// Innovation-consistency rejection flags, grouped the way the gate groups
/// its decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnovCheckStatus {
    /// The NED velocity group failed its gate this tick.
    pub reject_vel_ned: bool,
    /// The NE horizontal-position group failed its gate this tick.
    pub reject_pos_ne: bool,
    /// The height observation failed its gate this tick.
    pub reject_pos_d: bool,
}

/// Timestamps (µs) of the most recent successful fusion per sensor class.
///
/// A stale entry is how callers detect that an aiding source has dropped out;
/// the core itself never reads these back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionTimestamps {
    pub time_last_vel_fuse: u64,
    pub time_last_pos_fuse: u64,
    pub time_last_delpos_fuse: u64,
    pub time_last_hgt_fuse: u64,
}
