//! Tuning parameters for the fusion core.
//!
//! All fields are plain non-negative reals so a parameter file maps onto the
//! struct one to one. Files may be JSON, YAML, or TOML; the format is chosen
//! by extension, matching how the rest of the toolchain handles its
//! configuration files.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Observation noise and gate tuning for velocity, position, and height
/// fusion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Minimum GNSS velocity observation noise (m/s, 1-sigma).
    pub gps_vel_noise: f64,
    /// Vertical velocity innovation gate (1-sigma multiples).
    pub vel_innov_gate: f64,
    /// Barometric altitude observation noise (m, 1-sigma).
    pub baro_noise: f64,
    /// Barometric height innovation gate (1-sigma multiples).
    pub baro_innov_gate: f64,
    /// Minimum GNSS position observation noise (m, 1-sigma).
    pub gps_pos_noise: f64,
    /// Position observation noise used when no aiding is available (m).
    pub pos_noaid_noise: f64,
    /// Rangefinder observation noise (m, 1-sigma).
    pub range_noise: f64,
    /// Rangefinder noise growth per metre of range (1/m).
    pub range_noise_scaler: f64,
    /// Minimum assumed ground clearance for the rangefinder (m).
    pub rng_gnd_clearance: f64,
    /// Cosine of the maximum tilt at which rangefinder data is usable.
    pub range_cos_max_tilt: f64,
    /// Rangefinder height innovation gate (1-sigma multiples).
    pub range_innov_gate: f64,
    /// External-vision height innovation gate (1-sigma multiples).
    pub ev_innov_gate: f64,
    /// Width of the baro deadzone applied while ground effect is expected (m).
    pub gnd_effect_deadzone: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        FusionParams {
            gps_vel_noise: 0.3,
            vel_innov_gate: 5.0,
            baro_noise: 2.0,
            baro_innov_gate: 5.0,
            gps_pos_noise: 0.5,
            pos_noaid_noise: 10.0,
            range_noise: 0.1,
            range_noise_scaler: 0.0,
            rng_gnd_clearance: 0.1,
            range_cos_max_tilt: 0.7071,
            range_innov_gate: 5.0,
            ev_innov_gate: 5.0,
            gnd_effect_deadzone: 5.0,
        }
    }
}

impl FusionParams {
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        let mut file = File::create(path)?;
        file.write_all(s.as_bytes())
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let s = toml::to_string(self).map_err(io::Error::other)?;
        let mut file = File::create(path)?;
        file.write_all(s.as_bytes())
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut s = String::new();
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match p.extension().and_then(|e| e.to_str()) {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported parameter file extension: {:?}", other),
            )),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match p.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported parameter file extension: {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_non_negative() {
        let p = FusionParams::default();
        assert!(p.gps_vel_noise >= 0.0);
        assert!(p.vel_innov_gate >= 1.0);
        assert!(p.baro_noise >= 0.0);
        assert!(p.baro_innov_gate >= 1.0);
        assert!(p.range_cos_max_tilt > 0.0 && p.range_cos_max_tilt < 1.0);
        assert!(p.gnd_effect_deadzone >= 0.0);
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = FusionParams::default();
        cfg.baro_noise = 0.25;
        cfg.range_innov_gate = 3.0;
        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        cfg.to_toml(&path).unwrap();
        let loaded = FusionParams::from_toml(&path).unwrap();
        assert_eq!(cfg, loaded);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn extension_dispatch() {
        let cfg = FusionParams::default();
        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        cfg.to_file(&path).unwrap();
        let loaded = FusionParams::from_file(&path).unwrap();
        assert_eq!(cfg, loaded);
        std::fs::remove_file(path).ok();

        let bad = f.path().with_extension("csv");
        assert!(cfg.to_file(&bad).is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        std::fs::write(&path, "baro_noise = 0.5\n").unwrap();
        let loaded = FusionParams::from_toml(&path).unwrap();
        assert_eq!(loaded.baro_noise, 0.5);
        assert_eq!(loaded.vel_innov_gate, FusionParams::default().vel_innov_gate);
        std::fs::remove_file(path).ok();
    }
}
