// src/machine.rs - Machine state store
use serde::Serialize;

use crate::config::Config;
use crate::raster::{Raster, RasterError, RasterMask};

/// How move coordinates are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PositioningMode {
    #[default]
    Absolute,
    Relative,
}

/// Calibration, mode and position of one physical machine.
///
/// Mutations are plain synchronous writes; nothing here moves the head.
/// Position is relative to the frame set by the last homing or `set_position`.
#[derive(Debug, Clone)]
pub struct MachineState {
    x: f64,
    y: f64,
    mode: PositioningMode,
    laser_enabled: bool,
    laser_power: f64,
    homed: bool,
    motors_enabled: bool,
    step_cal: f64,
    cut_speed: f64,
    travel_speed: f64,
    bed_xmax: f64,
    bed_ymax: f64,
    skew: f64,
    raster: Raster,
    laser_threshold: u8,
}

/// Read-only copy of the store for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    pub x: f64,
    pub y: f64,
    pub mode: PositioningMode,
    pub laser_enabled: bool,
    pub homed: bool,
    pub motors_enabled: bool,
    pub step_cal: f64,
    pub cut_speed: f64,
    pub travel_speed: f64,
}

impl MachineState {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Power-on state. The raster image, if any, is loaded separately.
    pub fn from_config(config: &Config) -> Self {
        let m = &config.machine;
        Self {
            x: 0.0,
            y: 0.0,
            mode: PositioningMode::Absolute,
            laser_enabled: false,
            laser_power: 0.0,
            homed: false,
            motors_enabled: false,
            step_cal: m.step_cal,
            cut_speed: m.cut_speed,
            travel_speed: m.travel_speed,
            bed_xmax: m.bed_xmax,
            bed_ymax: m.bed_ymax,
            skew: m.skew,
            raster: Raster::default(),
            laser_threshold: config.raster.threshold,
        }
    }

    pub fn set_mode(&mut self, mode: PositioningMode) {
        self.mode = mode;
    }

    /// Overwrite the logical position without moving.
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub fn set_step_cal(&mut self, step_cal: f64) {
        self.step_cal = step_cal;
    }

    /// Absent or zero values keep the current setting.
    pub fn set_speeds(&mut self, cut: Option<f64>, travel: Option<f64>) {
        if let Some(cut) = cut.filter(|v| *v != 0.0) {
            self.cut_speed = cut;
        }
        if let Some(travel) = travel.filter(|v| *v != 0.0) {
            self.travel_speed = travel;
        }
    }

    pub fn set_bed_limits(&mut self, xmax: f64, ymax: f64) {
        self.bed_xmax = xmax;
        self.bed_ymax = ymax;
    }

    pub fn set_skew(&mut self, degrees: f64) {
        self.skew = degrees;
    }

    pub fn set_raster(&mut self, mask: RasterMask, dpmm: f64) -> Result<(), RasterError> {
        self.raster.set(mask, dpmm)
    }

    pub fn set_laser_threshold(&mut self, threshold: u8) {
        self.laser_threshold = threshold;
    }

    /// Disabling the motors loses the home reference.
    pub fn enable_motors(&mut self, enabled: bool) {
        self.motors_enabled = enabled;
        if !enabled {
            self.homed = false;
        }
    }

    pub fn enable_laser(&mut self, enabled: bool) {
        self.laser_enabled = enabled;
    }

    pub fn set_laser_power(&mut self, power: f64) {
        self.laser_power = power;
    }

    pub(crate) fn set_homed(&mut self, homed: bool) {
        self.homed = homed;
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn mode(&self) -> PositioningMode {
        self.mode
    }

    pub fn laser_enabled(&self) -> bool {
        self.laser_enabled
    }

    pub fn laser_power(&self) -> f64 {
        self.laser_power
    }

    pub fn homed(&self) -> bool {
        self.homed
    }

    pub fn motors_enabled(&self) -> bool {
        self.motors_enabled
    }

    pub fn step_cal(&self) -> f64 {
        self.step_cal
    }

    pub fn cut_speed(&self) -> f64 {
        self.cut_speed
    }

    pub fn travel_speed(&self) -> f64 {
        self.travel_speed
    }

    pub fn bed_limits(&self) -> (f64, f64) {
        (self.bed_xmax, self.bed_ymax)
    }

    pub fn skew(&self) -> f64 {
        self.skew
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn laser_threshold(&self) -> u8 {
        self.laser_threshold
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            x: self.x,
            y: self.y,
            mode: self.mode,
            laser_enabled: self.laser_enabled,
            homed: self.homed,
            motors_enabled: self.motors_enabled,
            step_cal: self.step_cal,
            cut_speed: self.cut_speed,
            travel_speed: self.travel_speed,
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
