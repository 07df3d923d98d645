//! Observation slots and the per-tick assembler.
//!
//! Observations are kept as a fixed array of six slot records in the order
//! VN, VE, VD, PN, PE, PD; slot `i` always constrains state `i + 4`. The
//! assembler decides which slots are live this tick, copies or computes their
//! innovations, and attaches the observation variance and gate size each slot
//! will be judged against. Velocity and horizontal-position innovations
//! arrive precomputed from the prediction step; the height innovation is
//! derived here from whichever vertical reference survives selection.

use crate::messages::{HeightSource, TickInputs};
use crate::params::FusionParams;
use crate::{ControlFlags, StateVector, STATE_POS_D, STATE_VEL_N};

/// Number of observation slots.
pub const NUM_OBS: usize = 6;

/// North velocity slot.
pub const OBS_VEL_N: usize = 0;
/// East velocity slot.
pub const OBS_VEL_E: usize = 1;
/// Down velocity slot.
pub const OBS_VEL_D: usize = 2;
/// North position slot.
pub const OBS_POS_N: usize = 3;
/// East position slot.
pub const OBS_POS_E: usize = 4;
/// Down position (height) slot.
pub const OBS_POS_D: usize = 5;

/// State-vector index constrained by observation slot `obs_index`.
#[inline]
pub fn obs_state_index(obs_index: usize) -> usize {
    obs_index + STATE_VEL_N
}

/// One scalar observation slot.
///
/// `fuse`, `innovation`, `variance`, and `gate` are filled by the assembler;
/// `innov_var`, `test_ratio`, and `accepted` by the innovation gate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Observation {
    /// Slot is live this tick.
    pub fuse: bool,
    /// Predicted minus measured, in measurement units.
    pub innovation: f64,
    /// Observation variance R.
    pub variance: f64,
    /// Innovation gate size (1-sigma multiples).
    pub gate: f64,
    /// Innovation variance `P[s][s] + R`.
    pub innov_var: f64,
    /// `innovation² / (gate² · innov_var)`.
    pub test_ratio: f64,
    /// Gated and grouped pass decision.
    pub accepted: bool,
}

/// The six observation slots of one fusion tick.
pub type ObservationSet = [Observation; NUM_OBS];

/// Saturate a negative baro innovation while ground effect is expected.
///
/// Rotor-wash overpressure at the static port reads as a spuriously low
/// pressure altitude, dragging the innovation negative. Innovations inside
/// `(-deadzone, 0)` are zeroed; anything beyond the deadzone is shifted
/// toward zero by the full deadzone width. Positive innovations pass through
/// untouched, so the mapping is continuous.
pub fn gnd_effect_deadzone(innovation: f64, deadzone: f64) -> f64 {
    if innovation < 0.0 {
        if innovation <= -deadzone {
            innovation + deadzone
        } else {
            0.0
        }
    } else {
        innovation
    }
}

/// Populate the observation slots for one tick.
///
/// Returns the slot array together with the vertical reference that fed the
/// height slot, if any. A height request whose selected source is
/// disqualified (rangefinder tilted past its usable cone, or no source flag
/// set at all) leaves slot PD inactive; the caller sees that as a stale
/// height-fusion timestamp, not as an error.
pub fn assemble_observations(
    x: &StateVector,
    flags: &ControlFlags,
    inputs: &TickInputs,
    params: &FusionParams,
) -> (ObservationSet, Option<HeightSource>) {
    let mut obs: ObservationSet = [Observation::default(); NUM_OBS];

    if flags.fuse_hor_vel || flags.fuse_hor_vel_aux {
        obs[OBS_VEL_N].fuse = true;
        obs[OBS_VEL_E].fuse = true;

        // an auxiliary velocity source replaces the primary innovations only
        // when the primary was not requested this tick
        let (innov_n, innov_e) = if !flags.fuse_hor_vel {
            (inputs.aux_vel_innov[0], inputs.aux_vel_innov[1])
        } else {
            (inputs.vel_pos_innov[OBS_VEL_N], inputs.vel_pos_innov[OBS_VEL_E])
        };
        obs[OBS_VEL_N].innovation = innov_n;
        obs[OBS_VEL_E].innovation = innov_e;

        obs[OBS_VEL_N].variance = inputs.vel_obs_var_ne[0];
        obs[OBS_VEL_E].variance = inputs.vel_obs_var_ne[1];
        obs[OBS_VEL_N].gate = inputs.hvel_innov_gate;
        obs[OBS_VEL_E].gate = inputs.hvel_innov_gate;
    }

    if flags.fuse_vert_vel {
        obs[OBS_VEL_D].fuse = true;
        obs[OBS_VEL_D].innovation = inputs.vel_pos_innov[OBS_VEL_D];
        // receiver-reported accuracy floored by the tuning parameter, scaled
        // by the typical VDOP/HDOP ratio
        let noise = 1.5 * params.gps_vel_noise.max(0.01).max(inputs.gps.sacc);
        obs[OBS_VEL_D].variance = noise * noise;
        obs[OBS_VEL_D].gate = params.vel_innov_gate.max(1.0);
    }

    if flags.fuse_pos {
        obs[OBS_POS_N].fuse = true;
        obs[OBS_POS_E].fuse = true;
        obs[OBS_POS_N].innovation = inputs.vel_pos_innov[OBS_POS_N];
        obs[OBS_POS_E].innovation = inputs.vel_pos_innov[OBS_POS_E];
        let variance = inputs.pos_obs_noise_ne * inputs.pos_obs_noise_ne;
        obs[OBS_POS_N].variance = variance;
        obs[OBS_POS_E].variance = variance;
        obs[OBS_POS_N].gate = inputs.pos_innov_gate_ne;
        obs[OBS_POS_E].gate = inputs.pos_innov_gate_ne;
    }

    let mut source = None;
    if flags.fuse_height {
        if let Some((height_obs, selected)) = height_observation(x, flags, inputs, params) {
            obs[OBS_POS_D] = height_obs;
            source = Some(selected);
        }
    }

    (obs, source)
}

/// Build the height observation from the active vertical reference.
///
/// Source priority is baro > gps > range > vision; the first active flag
/// wins. Each source measures altitude with its own sign and offset
/// conventions, so each branch forms its own innovation against `pos_d`.
fn height_observation(
    x: &StateVector,
    flags: &ControlFlags,
    inputs: &TickInputs,
    params: &FusionParams,
) -> Option<(Observation, HeightSource)> {
    let pos_d = x[STATE_POS_D];

    if flags.baro_hgt {
        // baro altitude has opposite sign to the earth z axis
        let mut innovation =
            pos_d + inputs.baro.hgt - inputs.baro_hgt_offset - inputs.hgt_sensor_offset;
        if flags.gnd_effect {
            innovation = gnd_effect_deadzone(innovation, params.gnd_effect_deadzone);
        }
        let noise = params.baro_noise.max(0.01);
        Some((
            Observation {
                fuse: true,
                innovation,
                variance: noise * noise,
                gate: params.baro_innov_gate.max(1.0),
                ..Default::default()
            },
            HeightSource::Baro,
        ))
    } else if flags.gps_hgt {
        let innovation =
            pos_d + inputs.gps.hgt - inputs.gps_alt_ref - inputs.hgt_sensor_offset;
        // receiver-reported vertical accuracy, parameter limited, scaled by
        // the typical VDOP/HDOP ratio
        let lower_limit = params.gps_pos_noise.max(0.01);
        let upper_limit = params.pos_noaid_noise.max(lower_limit);
        let noise = 1.5 * inputs.gps.vacc.clamp(lower_limit, upper_limit);
        // TODO: the gate reuses the baro gate parameter here; confirm with
        // the tuning owners whether GNSS height should get its own gate
        Some((
            Observation {
                fuse: true,
                innovation,
                variance: noise * noise,
                gate: params.baro_innov_gate.max(1.0),
                ..Default::default()
            },
            HeightSource::Gps,
        ))
    } else if flags.rng_hgt && inputs.r_rng_to_earth_2_2 > params.range_cos_max_tilt {
        // tilt-corrected range, floored at the minimum ground clearance
        let range_to_ground =
            (inputs.range.rng * inputs.r_rng_to_earth_2_2).max(params.rng_gnd_clearance);
        let innovation = pos_d - (-range_to_ground) - inputs.hgt_sensor_offset;
        let variance = ((params.range_noise.powi(2)
            + (params.range_noise_scaler * inputs.range.rng).powi(2))
            * inputs.r_rng_to_earth_2_2.powi(2))
        .max(0.01);
        Some((
            Observation {
                fuse: true,
                innovation,
                variance,
                gate: params.range_innov_gate.max(1.0),
                ..Default::default()
            },
            HeightSource::Range,
        ))
    } else if flags.ev_hgt {
        // vision position is already in the local NED frame
        let innovation = pos_d - inputs.vision.pos_ned[2];
        let noise = inputs.vision.pos_err.max(0.01);
        Some((
            Observation {
                fuse: true,
                innovation,
                variance: noise * noise,
                gate: params.ev_innov_gate.max(1.0),
                ..Default::default()
            },
            HeightSource::Vision,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BaroSample, GpsSample, RangeSample, VisionSample};
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::{Vector2, Vector3};

    fn state_with_pos_d(pos_d: f64) -> StateVector {
        let mut x = StateVector::zeros();
        x[STATE_POS_D] = pos_d;
        x
    }

    fn base_inputs() -> TickInputs {
        TickInputs {
            vel_pos_innov: [0.1, 0.2, 0.3, 0.4, 0.5, 0.0],
            aux_vel_innov: [9.1, 9.2],
            vel_obs_var_ne: Vector2::new(0.04, 0.05),
            hvel_innov_gate: 3.0,
            pos_obs_noise_ne: 0.5,
            pos_innov_gate_ne: 5.0,
            ..Default::default()
        }
    }

    #[test]
    fn horizontal_velocity_slots_use_precomputed_innovations() {
        let flags = ControlFlags {
            fuse_hor_vel: true,
            ..Default::default()
        };
        let (obs, _) = assemble_observations(
            &StateVector::zeros(),
            &flags,
            &base_inputs(),
            &FusionParams::default(),
        );
        assert!(obs[OBS_VEL_N].fuse && obs[OBS_VEL_E].fuse);
        assert!(!obs[OBS_VEL_D].fuse && !obs[OBS_POS_N].fuse);
        assert_approx_eq!(obs[OBS_VEL_N].innovation, 0.1, 1e-12);
        assert_approx_eq!(obs[OBS_VEL_E].innovation, 0.2, 1e-12);
        assert_approx_eq!(obs[OBS_VEL_N].variance, 0.04, 1e-12);
        assert_approx_eq!(obs[OBS_VEL_E].variance, 0.05, 1e-12);
        assert_eq!(obs[OBS_VEL_N].gate, 3.0);
    }

    #[test]
    fn auxiliary_velocity_overrides_only_without_primary() {
        let aux_only = ControlFlags {
            fuse_hor_vel_aux: true,
            ..Default::default()
        };
        let (obs, _) = assemble_observations(
            &StateVector::zeros(),
            &aux_only,
            &base_inputs(),
            &FusionParams::default(),
        );
        assert_approx_eq!(obs[OBS_VEL_N].innovation, 9.1, 1e-12);
        assert_approx_eq!(obs[OBS_VEL_E].innovation, 9.2, 1e-12);

        let both = ControlFlags {
            fuse_hor_vel: true,
            fuse_hor_vel_aux: true,
            ..Default::default()
        };
        let (obs, _) = assemble_observations(
            &StateVector::zeros(),
            &both,
            &base_inputs(),
            &FusionParams::default(),
        );
        assert_approx_eq!(obs[OBS_VEL_N].innovation, 0.1, 1e-12);
    }

    #[test]
    fn vertical_velocity_variance_uses_receiver_accuracy_floor() {
        let flags = ControlFlags {
            fuse_vert_vel: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.gps = GpsSample {
            sacc: 0.4,
            ..Default::default()
        };
        let params = FusionParams {
            gps_vel_noise: 0.3,
            vel_innov_gate: 0.5,
            ..Default::default()
        };
        let (obs, _) = assemble_observations(&StateVector::zeros(), &flags, &inputs, &params);
        assert!(obs[OBS_VEL_D].fuse);
        // sacc dominates the parameter floor
        assert_approx_eq!(obs[OBS_VEL_D].variance, (1.5_f64 * 0.4).powi(2), 1e-12);
        // gate is floored at one sigma
        assert_eq!(obs[OBS_VEL_D].gate, 1.0);
    }

    #[test]
    fn baro_height_innovation_and_gate() {
        let flags = ControlFlags {
            fuse_height: true,
            baro_hgt: true,
            tilt_align: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.baro = BaroSample { hgt: 10.1 };
        inputs.baro_hgt_offset = 0.3;
        inputs.hgt_sensor_offset = 0.1;
        let params = FusionParams {
            baro_noise: 0.2,
            baro_innov_gate: 5.0,
            ..Default::default()
        };
        let (obs, source) =
            assemble_observations(&state_with_pos_d(-10.0), &flags, &inputs, &params);
        assert_eq!(source, Some(HeightSource::Baro));
        assert_approx_eq!(obs[OBS_POS_D].innovation, -10.0 + 10.1 - 0.3 - 0.1, 1e-12);
        assert_approx_eq!(obs[OBS_POS_D].variance, 0.04, 1e-12);
        assert_eq!(obs[OBS_POS_D].gate, 5.0);
    }

    #[test]
    fn gps_height_noise_is_clamped_and_gate_follows_baro() {
        let flags = ControlFlags {
            fuse_height: true,
            gps_hgt: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.gps = GpsSample {
            hgt: 100.0,
            vacc: 50.0,
            ..Default::default()
        };
        inputs.gps_alt_ref = 90.0;
        let params = FusionParams {
            gps_pos_noise: 0.5,
            pos_noaid_noise: 10.0,
            baro_innov_gate: 4.0,
            range_innov_gate: 9.0,
            ..Default::default()
        };
        let (obs, source) =
            assemble_observations(&state_with_pos_d(-10.0), &flags, &inputs, &params);
        assert_eq!(source, Some(HeightSource::Gps));
        assert_approx_eq!(obs[OBS_POS_D].innovation, 0.0, 1e-12);
        // vacc clamps to pos_noaid_noise before scaling
        assert_approx_eq!(obs[OBS_POS_D].variance, (1.5_f64 * 10.0).powi(2), 1e-12);
        assert_eq!(obs[OBS_POS_D].gate, 4.0);
    }

    #[test]
    fn height_source_priority_prefers_baro() {
        let flags = ControlFlags {
            fuse_height: true,
            baro_hgt: true,
            gps_hgt: true,
            ev_hgt: true,
            ..Default::default()
        };
        let (_, source) = assemble_observations(
            &state_with_pos_d(-10.0),
            &flags,
            &base_inputs(),
            &FusionParams::default(),
        );
        assert_eq!(source, Some(HeightSource::Baro));
    }

    #[test]
    fn range_height_requires_near_vertical_sensor() {
        let flags = ControlFlags {
            fuse_height: true,
            rng_hgt: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.range = RangeSample { rng: 10.0 };
        inputs.r_rng_to_earth_2_2 = 0.5;
        let params = FusionParams {
            range_cos_max_tilt: 0.7,
            ..Default::default()
        };

        let (obs, source) =
            assemble_observations(&state_with_pos_d(-9.0), &flags, &inputs, &params);
        assert!(!obs[OBS_POS_D].fuse);
        assert_eq!(source, None);

        inputs.r_rng_to_earth_2_2 = 0.9;
        let (obs, source) =
            assemble_observations(&state_with_pos_d(-9.0), &flags, &inputs, &params);
        assert_eq!(source, Some(HeightSource::Range));
        // tilt-corrected range: 10 * 0.9 = 9 m above ground
        assert_approx_eq!(obs[OBS_POS_D].innovation, -9.0 + 9.0, 1e-12);
    }

    #[test]
    fn range_variance_scales_with_range_and_tilt() {
        let flags = ControlFlags {
            fuse_height: true,
            rng_hgt: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.range = RangeSample { rng: 20.0 };
        inputs.r_rng_to_earth_2_2 = 0.8;
        let params = FusionParams {
            range_noise: 0.3,
            range_noise_scaler: 0.05,
            range_cos_max_tilt: 0.7,
            ..Default::default()
        };
        let (obs, _) = assemble_observations(&state_with_pos_d(-9.0), &flags, &inputs, &params);
        let expected = (0.3_f64.powi(2) + (0.05_f64 * 20.0).powi(2)) * 0.8_f64.powi(2);
        assert_approx_eq!(obs[OBS_POS_D].variance, expected, 1e-12);
    }

    #[test]
    fn vision_height_uses_reported_error_floor() {
        let flags = ControlFlags {
            fuse_height: true,
            ev_hgt: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.vision = VisionSample {
            pos_ned: Vector3::new(1.0, 2.0, -9.5),
            pos_err: 0.001,
        };
        let (obs, source) = assemble_observations(
            &state_with_pos_d(-10.0),
            &flags,
            &inputs,
            &FusionParams::default(),
        );
        assert_eq!(source, Some(HeightSource::Vision));
        assert_approx_eq!(obs[OBS_POS_D].innovation, -0.5, 1e-12);
        assert_approx_eq!(obs[OBS_POS_D].variance, 0.01_f64.powi(2), 1e-12);
    }

    #[test]
    fn no_height_source_leaves_slot_inactive() {
        let flags = ControlFlags {
            fuse_height: true,
            ..Default::default()
        };
        let (obs, source) = assemble_observations(
            &state_with_pos_d(-10.0),
            &flags,
            &base_inputs(),
            &FusionParams::default(),
        );
        assert!(!obs[OBS_POS_D].fuse);
        assert_eq!(source, None);
    }

    #[test]
    fn deadzone_mapping_shape() {
        let d = 0.5;
        // identity for non-negative innovations
        assert_eq!(gnd_effect_deadzone(0.0, d), 0.0);
        assert_eq!(gnd_effect_deadzone(0.3, d), 0.3);
        // zero inside the deadzone
        assert_eq!(gnd_effect_deadzone(-0.2, d), 0.0);
        assert_eq!(gnd_effect_deadzone(-0.499, d), 0.0);
        // shifted toward zero beyond it; continuous at the boundary
        assert_approx_eq!(gnd_effect_deadzone(-0.5, d), 0.0, 1e-12);
        assert_approx_eq!(gnd_effect_deadzone(-0.8, d), -0.3, 1e-12);
    }

    #[test]
    fn deadzone_applied_only_with_gnd_effect() {
        let mut flags = ControlFlags {
            fuse_height: true,
            baro_hgt: true,
            ..Default::default()
        };
        let mut inputs = base_inputs();
        inputs.baro = BaroSample { hgt: 9.7 };
        let params = FusionParams {
            gnd_effect_deadzone: 0.5,
            ..Default::default()
        };

        let (obs, _) = assemble_observations(&state_with_pos_d(-10.0), &flags, &inputs, &params);
        assert_approx_eq!(obs[OBS_POS_D].innovation, -0.3, 1e-12);

        flags.gnd_effect = true;
        let (obs, _) = assemble_observations(&state_with_pos_d(-10.0), &flags, &inputs, &params);
        assert_approx_eq!(obs[OBS_POS_D].innovation, 0.0, 1e-12);
    }
}
