//! Innovation gating and the sequential scalar Kalman updater.
//!
//! [`VelPosFusion`] is the entry point of the crate: one call to
//! [`VelPosFusion::fuse_vel_pos_height`] per filter tick, after the
//! prediction step has produced the prior state and covariance. The routine
//! assembles the live observation slots, gates them against the filter's own
//! predicted uncertainty, folds the survivors in one scalar at a time, and
//! records the outcome in the health ledger.
//!
//! Scalar sequential fusion is deliberate, not an optimisation: the slot
//! innovations are mutually uncorrelated given the state, so applying them
//! one at a time with a covariance refresh in between is numerically stabler
//! than a batched update, needs no matrix inverse, and keeps the
//! per-observation health repair local to the slot that triggered it.

use log::{debug, warn};

use crate::health::{FaultStatus, FusionTimestamps, InnovCheckStatus};
use crate::linalg::{fix_covariance_errors, zero_cols, zero_rows};
use crate::measurements::{
    assemble_observations, obs_state_index, NUM_OBS, OBS_POS_D, OBS_POS_E, OBS_POS_N, OBS_VEL_D,
    OBS_VEL_N,
};
use crate::messages::{HeightAidingReport, TickInputs};
use crate::params::FusionParams;
use crate::{ControlFlags, Covariance, StateVector, NUM_STATES, STATE_POS_D};

/// Apply the scalar state correction `x ← x − K · innovation`.
///
/// Innovations are predicted minus measured, hence the subtraction. Exposed
/// as a standalone primitive because attitude components corrected through
/// the gain column must be renormalised by the surrounding filter, not here.
pub fn fuse(x: &mut StateVector, gain: &StateVector, innovation: f64) {
    *x -= gain * innovation;
}

/// Sequential velocity/position/height fusion stage of the navigation filter.
///
/// Owns the per-slot innovation scratch published for logging and the health
/// ledger. The navigation state and covariance stay with the caller and are
/// borrowed mutably for the duration of a tick; the caller must serialise
/// prediction and fusion on a single filter instance.
#[derive(Clone, Debug)]
pub struct VelPosFusion {
    /// Innovations for slots VN..PE as supplied by the caller, and the height
    /// innovation (post-deadzone) computed here.
    pub vel_pos_innov: [f64; NUM_OBS],
    /// Innovation variances for the slots active on their most recent tick.
    pub vel_pos_innov_var: [f64; NUM_OBS],
    /// Gate test ratios for the slots active on their most recent tick.
    pub vel_pos_test_ratio: [f64; NUM_OBS],
    /// Per-axis covariance fault flags.
    pub fault_status: FaultStatus,
    /// Grouped innovation-consistency rejection flags.
    pub innov_check_status: InnovCheckStatus,
    /// Last successful fusion time per sensor class.
    pub timestamps: FusionTimestamps,
    /// Vertical-aiding diagnostic record from the most recent tick on which
    /// height fusion was requested.
    pub height_report: Option<HeightAidingReport>,
}

impl Default for VelPosFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl VelPosFusion {
    pub fn new() -> Self {
        VelPosFusion {
            vel_pos_innov: [0.0; NUM_OBS],
            vel_pos_innov_var: [0.0; NUM_OBS],
            vel_pos_test_ratio: [0.0; NUM_OBS],
            fault_status: FaultStatus::default(),
            innov_check_status: InnovCheckStatus::default(),
            timestamps: FusionTimestamps::default(),
            height_report: None,
        }
    }

    /// Fuse the requested velocity, position, and height observations into
    /// the predicted state and covariance.
    ///
    /// On return the one-shot request flags in `flags` are cleared, the
    /// ledger reflects this tick's outcomes, and `x`/`p` contain the
    /// corrected estimate. Rejected or unhealthy slots leave the state
    /// untouched; covariance repair may still have collapsed rows and
    /// columns. The routine never allocates and never returns an error; the
    /// ledger is the only outcome surface.
    pub fn fuse_vel_pos_height(
        &mut self,
        x: &mut StateVector,
        p: &mut Covariance,
        flags: &mut ControlFlags,
        inputs: &TickInputs,
        params: &FusionParams,
    ) {
        let (mut obs, height_source) = assemble_observations(x, flags, inputs, params);

        // retain the caller's innovations for logging; the height slot is the
        // only one computed in-house
        self.vel_pos_innov[..OBS_POS_D].copy_from_slice(&inputs.vel_pos_innov[..OBS_POS_D]);
        if obs[OBS_POS_D].fuse {
            self.vel_pos_innov[OBS_POS_D] = obs[OBS_POS_D].innovation;
        }

        // the diagnostic record reflects the prior estimate, before any of
        // this tick's corrections land
        if flags.fuse_height {
            let range_to_ground = (inputs.range.rng * inputs.r_rng_to_earth_2_2)
                .max(params.rng_gnd_clearance);
            self.height_report = Some(HeightAidingReport {
                pos_d_est: x[STATE_POS_D],
                baro_state_frame: -inputs.baro.hgt
                    - inputs.baro_hgt_offset
                    - inputs.hgt_sensor_offset,
                range_state_frame: -range_to_ground - inputs.hgt_sensor_offset,
                baro_hgt_offset: inputs.baro_hgt_offset,
                hgt_sensor_offset: inputs.hgt_sensor_offset,
                source: height_source,
                time_us: inputs.time_us,
            });
        }

        // innovation variances and gate test ratios for the live slots
        for (index, slot) in obs.iter_mut().enumerate() {
            if !slot.fuse {
                continue;
            }
            let s = obs_state_index(index);
            slot.innov_var = p[(s, s)] + slot.variance;
            slot.test_ratio =
                slot.innovation * slot.innovation / (slot.gate * slot.gate * slot.innov_var);
            self.vel_pos_innov_var[index] = slot.innov_var;
            self.vel_pos_test_ratio[index] = slot.test_ratio;
        }

        // Grouped consistency decisions over the slots live this tick.
        // Velocity axes and horizontal position axes are physically
        // correlated pairs; accepting one axis while rejecting its partner
        // would bias the state, so the decision is all-or-nothing per group.
        // Position and height force-pass until tilt alignment completes,
        // otherwise the filter could never converge far enough to open its
        // own gates.
        let vel_requested = obs[OBS_VEL_N].fuse || obs[OBS_VEL_D].fuse;
        let vel_pass = obs[OBS_VEL_N..=OBS_VEL_D]
            .iter()
            .all(|slot| !slot.fuse || slot.test_ratio <= 1.0);
        for slot in obs[OBS_VEL_N..=OBS_VEL_D].iter_mut() {
            if slot.fuse {
                slot.accepted = vel_pass;
            }
        }

        let pos_pass = (obs[OBS_POS_N].test_ratio <= 1.0 && obs[OBS_POS_E].test_ratio <= 1.0)
            || !flags.tilt_align;
        if obs[OBS_POS_N].fuse {
            obs[OBS_POS_N].accepted = pos_pass;
            obs[OBS_POS_E].accepted = pos_pass;
        }

        let hgt_pass = obs[OBS_POS_D].test_ratio <= 1.0 || !flags.tilt_align;
        if obs[OBS_POS_D].fuse {
            obs[OBS_POS_D].accepted = hgt_pass;
        }

        // sequential scalar updates; P reflects all preceding fusions by the
        // time each slot computes its gain
        for index in 0..NUM_OBS {
            if !obs[index].fuse {
                continue;
            }
            if !obs[index].accepted {
                debug!(
                    "observation slot {} rejected, test ratio {:.3}",
                    index, obs[index].test_ratio
                );
                continue;
            }

            let s = obs_state_index(index);
            let gain: StateVector = p.column(s).into_owned() / obs[index].innov_var;
            let khp: Covariance = gain * p.row(s).into_owned();

            // a diagonal that would go negative marks the covariance as
            // unhealthy; collapse the offending state and abandon this slot
            let mut healthy = true;
            for i in 0..NUM_STATES {
                if p[(i, i)] < khp[(i, i)] {
                    zero_rows(p, i, i);
                    zero_cols(p, i, i);
                    healthy = false;
                }
            }

            if healthy {
                self.fault_status.set_bad(index, false);
                *p -= khp;
                fix_covariance_errors(p);
                fuse(x, &gain, obs[index].innovation);
            } else {
                self.fault_status.set_bad(index, true);
                warn!(
                    "unhealthy covariance while fusing observation slot {}; \
                     offending rows and columns collapsed",
                    index
                );
            }
        }

        // health and timing ledger; only sensor classes that actually had a
        // live slot this tick are touched
        if vel_requested {
            if vel_pass {
                self.timestamps.time_last_vel_fuse = inputs.time_us;
                self.innov_check_status.reject_vel_ned = false;
            } else {
                self.innov_check_status.reject_vel_ned = true;
            }
        }

        if obs[OBS_POS_N].fuse {
            if pos_pass {
                if !flags.fuse_hpos_as_odom {
                    self.timestamps.time_last_pos_fuse = inputs.time_us;
                } else {
                    self.timestamps.time_last_delpos_fuse = inputs.time_us;
                }
                self.innov_check_status.reject_pos_ne = false;
            } else {
                self.innov_check_status.reject_pos_ne = true;
            }
        }

        if obs[OBS_POS_D].fuse {
            if hgt_pass {
                self.timestamps.time_last_hgt_fuse = inputs.time_us;
                self.innov_check_status.reject_pos_d = false;
            } else {
                self.innov_check_status.reject_pos_d = true;
            }
        }

        flags.clear_fusion_requests();
    }
}
