// src/motion/controller.rs - Motion controller driving plans through the hardware
use serde::Serialize;

use crate::gcode::MoveKind;
use crate::hardware::{DriverStatus, HardwareDriver};
use crate::machine::{MachineState, PositioningMode};
use crate::motion::kinematics::CoreXYKinematics;
use crate::motion::plan::{plan_move, ActuationPlan, LaserMode, PlanError, PlanRequest, PlanSummary, MAX_PLAN_STEPS};
use crate::motion::{MotionError, MotionFault};

/// Counters for the moves run by one controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotionStats {
    pub moves: u64,
    pub steps: u64,
    pub laser_on_steps: u64,
    pub faults: u64,
    pub last_move: Option<PlanSummary>,
}

/// A linear move as commanded, before mode resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub kind: MoveKind,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// mm/min
    pub feedrate: Option<f64>,
}

impl MoveRequest {
    pub fn rapid(x: f64, y: f64, feedrate: Option<f64>) -> Self {
        Self {
            kind: MoveKind::Rapid,
            x: Some(x),
            y: Some(y),
            feedrate,
        }
    }
}

#[derive(Debug, Default)]
pub struct MotionController {
    stats: MotionStats,
}

impl MotionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &MotionStats {
        &self.stats
    }

    /// Seek the reference switches; on success the origin is (0, 0).
    pub async fn home<D>(&mut self, state: &mut MachineState, driver: &mut D) -> Result<(), MotionFault>
    where
        D: HardwareDriver + ?Sized,
    {
        tracing::info!("Homing");
        state.enable_motors(true);
        driver.set_motors(true);
        let status = DriverStatus::from_code(driver.home().await);
        if !status.is_completed() {
            self.stats.faults += 1;
            tracing::error!("Homing failed: {}", status);
            return Err(MotionFault { status });
        }
        state.set_position(0.0, 0.0);
        state.set_homed(true);
        tracing::info!("Homed, position reset to origin");
        Ok(())
    }

    /// Run one G0/G1 move.
    ///
    /// The position is committed only when the driver reports the whole plan
    /// ran; a triggered switch or fault leaves it where it was. A move too
    /// long to plan is refused before the driver sees it.
    pub async fn linear_move<D>(
        &mut self,
        state: &mut MachineState,
        driver: &mut D,
        request: MoveRequest,
    ) -> Result<PlanSummary, MotionError>
    where
        D: HardwareDriver + ?Sized,
    {
        apply_feedrate(state, request.kind, request.feedrate);

        let (start, delta) = resolve_delta(state, request.x, request.y);
        let target = (start.0 + delta.0, start.1 + delta.1);
        let (xmax, ymax) = state.bed_limits();
        if target.0 < 0.0 || target.1 < 0.0 || target.0 > xmax || target.1 > ymax {
            tracing::warn!(
                "Move target X:{:.2} Y:{:.2} is outside the bed ({} x {})",
                target.0,
                target.1,
                xmax,
                ymax
            );
        }

        let plan = Self::plan_for(state, request.kind, delta).inspect_err(|e| {
            self.stats.faults += 1;
            tracing::error!("Move to X:{:.3} Y:{:.3} refused: {}", target.0, target.1, e);
        })?;
        let summary = plan.summary();
        tracing::debug!(
            "Move to X:{:.3} Y:{:.3}: {} steps (A {}, B {}), {} laser steps, {} us",
            target.0,
            target.1,
            summary.steps,
            summary.actuator_a,
            summary.actuator_b,
            summary.laser_on_steps,
            summary.duration_us
        );

        let status = DriverStatus::from_code(driver.execute(&plan).await);
        self.stats.moves += 1;
        self.stats.last_move = Some(summary);
        if !status.is_completed() {
            self.stats.faults += 1;
            tracing::error!("Move to X:{:.3} Y:{:.3} aborted: {}", target.0, target.1, status);
            return Err(MotionFault { status }.into());
        }

        self.stats.steps += summary.steps as u64;
        self.stats.laser_on_steps += summary.laser_on_steps as u64;
        state.set_position(target.0, target.1);
        Ok(summary)
    }

    /// Plan a Cartesian delta with the state's calibration, speeds and raster.
    ///
    /// Cutting happens only for a controlled move while the laser is enabled.
    pub fn plan_for(state: &MachineState, kind: MoveKind, delta: (f64, f64)) -> Result<ActuationPlan, PlanError> {
        let cutting = kind == MoveKind::Controlled && state.laser_enabled();
        let (speed, laser) = if cutting {
            let laser = LaserMode::Raster {
                raster: state.raster(),
                threshold: state.laser_threshold(),
            };
            (state.cut_speed(), laser)
        } else {
            (state.travel_speed(), LaserMode::Off)
        };
        let kinematics = CoreXYKinematics::new(state.step_cal(), state.skew());
        plan_move(
            &kinematics,
            &PlanRequest {
                start: state.position(),
                delta,
                speed,
                laser,
                max_steps: step_limit(state),
            },
        )
    }
}

/// Twice the actuator travel of a corner-to-corner move across the bed.
fn step_limit(state: &MachineState) -> u64 {
    let (xmax, ymax) = state.bed_limits();
    let steps = (2.0 * (xmax.abs() + ymax.abs()) * state.step_cal()).ceil();
    if steps.is_finite() {
        (steps as u64).min(MAX_PLAN_STEPS)
    } else {
        MAX_PLAN_STEPS
    }
}

/// Route an F word (mm/min) to the speed the move uses.
fn apply_feedrate(state: &mut MachineState, kind: MoveKind, feedrate: Option<f64>) {
    let Some(feedrate) = feedrate else {
        return;
    };
    if feedrate <= 0.0 {
        tracing::warn!("Ignoring non-positive feedrate F{}", feedrate);
        return;
    }
    let speed = feedrate / 60.0;
    match kind {
        MoveKind::Controlled if state.laser_enabled() => state.set_speeds(Some(speed), None),
        _ => state.set_speeds(None, Some(speed)),
    }
}

/// Start position and Cartesian delta for the requested coordinates.
pub fn resolve_delta(state: &MachineState, x: Option<f64>, y: Option<f64>) -> ((f64, f64), (f64, f64)) {
    let (cx, cy) = state.position();
    let delta = match state.mode() {
        PositioningMode::Absolute => (x.map_or(0.0, |x| x - cx), y.map_or(0.0, |y| y - cy)),
        PositioningMode::Relative => (x.unwrap_or(0.0), y.unwrap_or(0.0)),
    };
    ((cx, cy), delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterMask;

    #[test]
    fn test_absolute_delta_keeps_omitted_axis() {
        let mut state = MachineState::new();
        state.set_position(3.0, 4.0);
        assert_eq!(resolve_delta(&state, Some(5.0), None), ((3.0, 4.0), (2.0, 0.0)));
        assert_eq!(resolve_delta(&state, None, None).1, (0.0, 0.0));
    }

    #[test]
    fn test_relative_delta_is_taken_directly() {
        let mut state = MachineState::new();
        state.set_position(3.0, 4.0);
        state.set_mode(PositioningMode::Relative);
        assert_eq!(resolve_delta(&state, Some(5.0), Some(-1.0)).1, (5.0, -1.0));
        assert_eq!(resolve_delta(&state, None, Some(2.0)).1, (0.0, 2.0));
    }

    #[test]
    fn test_feedrate_routing() {
        let mut state = MachineState::new();
        apply_feedrate(&mut state, MoveKind::Controlled, Some(120.0));
        assert_eq!(state.travel_speed(), 2.0);
        assert_eq!(state.cut_speed(), 1.0);

        state.enable_laser(true);
        apply_feedrate(&mut state, MoveKind::Controlled, Some(300.0));
        assert_eq!(state.cut_speed(), 5.0);
        assert_eq!(state.travel_speed(), 2.0);

        apply_feedrate(&mut state, MoveKind::Rapid, Some(600.0));
        assert_eq!(state.travel_speed(), 10.0);
        assert_eq!(state.cut_speed(), 5.0);
    }

    #[test]
    fn test_non_positive_feedrate_ignored() {
        let mut state = MachineState::new();
        apply_feedrate(&mut state, MoveKind::Rapid, Some(0.0));
        apply_feedrate(&mut state, MoveKind::Rapid, Some(-60.0));
        assert_eq!(state.travel_speed(), 30.0);
    }

    #[test]
    fn test_rapid_never_fires_laser() {
        let mut state = MachineState::new();
        state.enable_laser(true);
        let plan = MotionController::plan_for(&state, MoveKind::Rapid, (1.0, 0.0)).unwrap();
        assert_eq!(plan.laser_on_steps(), 0);
        let plan = MotionController::plan_for(&state, MoveKind::Controlled, (1.0, 0.0)).unwrap();
        assert_eq!(plan.laser_on_steps(), plan.len());
    }

    #[test]
    fn test_step_limit_follows_bed_and_calibration() {
        let mut state = MachineState::new();
        // (200 + 250) mm, 10 steps/mm, doubled
        assert_eq!(step_limit(&state), 9_000);
        assert!(MotionController::plan_for(&state, MoveKind::Rapid, (-200.0, 250.0)).is_ok());
        assert!(matches!(
            MotionController::plan_for(&state, MoveKind::Rapid, (1e9, 0.0)),
            Err(PlanError::TooManySteps { limit: 9_000, .. })
        ));
        state.set_step_cal(1e12);
        assert_eq!(step_limit(&state), MAX_PLAN_STEPS);
    }

    #[test]
    fn test_skewed_pure_y_move_shears_actuators_and_samples_true_position() {
        // tan(skew) = 0.5, so Y2 shears into 1 mm of extra CoreXY X travel
        let mut state = MachineState::new();
        state.set_skew(0.5f64.atan().to_degrees());
        // column 0 burns, column 1 stays dark
        let mask = RasterMask::from_rows(vec![vec![255, 0]; 3]).unwrap();
        state.set_raster(mask, 1.0).unwrap();
        state.enable_laser(true);
        state.set_position(0.5, 0.0);

        let plan = MotionController::plan_for(&state, MoveKind::Controlled, (0.0, 2.0)).unwrap();
        assert_eq!(plan.actuator_totals(), (30, -10));
        assert_eq!(plan.len(), 30);
        // the head stays at x = 0.5 while the sheared frame reaches 1.5
        assert_eq!(plan.laser_on_steps(), plan.len());

        state.set_skew(0.0);
        let square = MotionController::plan_for(&state, MoveKind::Controlled, (0.0, 2.0)).unwrap();
        assert_eq!(square.actuator_totals(), (20, -20));
    }
}
