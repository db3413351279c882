//! # Machine Configuration
//!
//! Settings for the etcher, its raster source, the simulated board, bed
//! scanning and logging. Every field has a default, so an empty file is a
//! valid configuration.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [machine]
//! step_cal = 80.0
//! cut_speed = 2.0
//! travel_speed = 40.0
//! skew = 0.15
//!
//! [raster]
//! path = "artwork.png"
//! dpmm = 4.0
//!
//! [simulator]
//! require_homing = false
//!
//! [logging]
//! level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Power-on settings of the machine state store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    /// Actuator steps per mm.
    #[serde(default = "default_step_cal")]
    pub step_cal: f64,
    /// mm/s while the laser is enabled.
    #[serde(default = "default_cut_speed")]
    pub cut_speed: f64,
    /// mm/s for rapid and laser-off moves.
    #[serde(default = "default_travel_speed")]
    pub travel_speed: f64,
    #[serde(default = "default_bed_xmax")]
    pub bed_xmax: f64,
    #[serde(default = "default_bed_ymax")]
    pub bed_ymax: f64,
    /// Gantry skew in degrees.
    #[serde(default)]
    pub skew: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            step_cal: default_step_cal(),
            cut_speed: default_cut_speed(),
            travel_speed: default_travel_speed(),
            bed_xmax: default_bed_xmax(),
            bed_ymax: default_bed_ymax(),
            skew: 0.0,
        }
    }
}

/// Intensity mask used while cutting.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RasterConfig {
    /// Image loaded at session start. Without one the whole bed fires.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_dpmm")]
    pub dpmm: f64,
    /// Samples at or above this intensity fire the laser.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    /// Dark pixels burn.
    #[serde(default = "default_true")]
    pub invert: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            path: None,
            dpmm: default_dpmm(),
            threshold: default_threshold(),
            invert: true,
        }
    }
}

/// Physical model of the simulated board.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_step_cal")]
    pub steps_per_mm: f64,
    #[serde(default = "default_bed_xmax")]
    pub bed_xmax: f64,
    #[serde(default = "default_bed_ymax")]
    pub bed_ymax: f64,
    /// Refuse motion (status -1) until homed.
    #[serde(default = "default_true")]
    pub require_homing: bool,
    /// Sleep for the duration of every plan.
    #[serde(default)]
    pub realtime: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_step_cal(),
            bed_xmax: default_bed_xmax(),
            bed_ymax: default_bed_ymax(),
            require_homing: true,
            realtime: false,
        }
    }
}

/// Camera tile layout for bed scans.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Undistorted field of view on the focus plane, mm (x, y).
    #[serde(default = "default_fov")]
    pub fov: (f64, f64),
    /// mm/min
    #[serde(default = "default_scan_feedrate")]
    pub feedrate: f64,
    /// Fractional overlap between neighbouring tiles (x, y).
    #[serde(default = "default_overlap")]
    pub overlap: (f64, f64),
    /// Camera centre offset from the laser spot, mm.
    #[serde(default = "default_camera_offset")]
    pub offset: (f64, f64),
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fov: default_fov(),
            feedrate: default_scan_feedrate(),
            overlap: default_overlap(),
            offset: default_camera_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            ConfigError::Io(e)
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            tracing::error!("Failed to parse config TOML: {}", e);
            ConfigError::Toml(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.machine;
        positive("machine.step_cal", m.step_cal)?;
        positive("machine.cut_speed", m.cut_speed)?;
        positive("machine.travel_speed", m.travel_speed)?;
        positive("machine.bed_xmax", m.bed_xmax)?;
        positive("machine.bed_ymax", m.bed_ymax)?;
        if !m.skew.is_finite() || m.skew.abs() >= 45.0 {
            return Err(ConfigError::Invalid(format!(
                "machine.skew must be within (-45, 45) degrees, got {}",
                m.skew
            )));
        }
        positive("raster.dpmm", self.raster.dpmm)?;
        positive("simulator.steps_per_mm", self.simulator.steps_per_mm)?;
        positive("simulator.bed_xmax", self.simulator.bed_xmax)?;
        positive("simulator.bed_ymax", self.simulator.bed_ymax)?;
        positive("scan.fov.x", self.scan.fov.0)?;
        positive("scan.fov.y", self.scan.fov.1)?;
        positive("scan.feedrate", self.scan.feedrate)?;
        for (axis, overlap) in [("x", self.scan.overlap.0), ("y", self.scan.overlap.1)] {
            if !(0.0..1.0).contains(&overlap) {
                return Err(ConfigError::Invalid(format!(
                    "scan.overlap.{} must be in [0, 1), got {}",
                    axis, overlap
                )));
            }
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be > 0, got {}", name, value)))
    }
}

// Default value functions
fn default_step_cal() -> f64 { 10.0 }
fn default_cut_speed() -> f64 { 1.0 }
fn default_travel_speed() -> f64 { 30.0 }
fn default_bed_xmax() -> f64 { 200.0 }
fn default_bed_ymax() -> f64 { 250.0 }
fn default_dpmm() -> f64 { 0.00001 }
fn default_threshold() -> u8 { 128 }
fn default_true() -> bool { true }
fn default_fov() -> (f64, f64) { (12.0, 16.0) }
fn default_scan_feedrate() -> f64 { 6000.0 }
fn default_overlap() -> (f64, f64) { (0.5, 0.5) }
fn default_camera_offset() -> (f64, f64) { (30.0, 0.0) }
fn default_log_level() -> String { "info".to_string() }
