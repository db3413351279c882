// src/motion/plan.rs - Timed actuator/laser plans
use serde::Serialize;
use thiserror::Error;

use crate::motion::kinematics::CoreXYKinematics;
use crate::motion::stepper::StepGenerator;
use crate::raster::Raster;

/// One plan step: unit moves of actuators A and B, laser state and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub a: i8,
    pub b: i8,
    pub laser_on: bool,
    pub duration_us: u64,
}

/// Ordered steps for one move, consumed once by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActuationPlan {
    steps: Vec<PlanStep>,
}

/// Summary used for logging and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanSummary {
    pub steps: usize,
    pub actuator_a: i64,
    pub actuator_b: i64,
    pub laser_on_steps: usize,
    pub duration_us: u64,
}

impl ActuationPlan {
    pub fn from_steps(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Net signed steps of each actuator.
    pub fn actuator_totals(&self) -> (i64, i64) {
        self.steps
            .iter()
            .fold((0, 0), |(a, b), s| (a + s.a as i64, b + s.b as i64))
    }

    pub fn total_duration_us(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_us).sum()
    }

    pub fn laser_on_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.laser_on).count()
    }

    pub fn summary(&self) -> PlanSummary {
        let (actuator_a, actuator_b) = self.actuator_totals();
        PlanSummary {
            steps: self.len(),
            actuator_a,
            actuator_b,
            laser_on_steps: self.laser_on_steps(),
            duration_us: self.total_duration_us(),
        }
    }
}

/// Laser behaviour while a plan is built.
#[derive(Debug, Clone, Copy)]
pub enum LaserMode<'a> {
    /// Rapid or laser-disabled move.
    Off,
    /// Fire where the raster sample reaches the threshold.
    Raster { raster: &'a Raster, threshold: u8 },
}

/// Hard ceiling on the steps in one plan, whatever the bed size.
pub const MAX_PLAN_STEPS: u64 = 1 << 22;

/// A move that cannot be turned into a plan.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PlanError {
    #[error("Move delta ({dx}, {dy}) does not map to finite actuator counts")]
    NonFinite { dx: f64, dy: f64 },
    #[error("Move needs {steps} steps, more than the {limit} allowed")]
    TooManySteps { steps: u64, limit: u64 },
}

/// Everything needed to turn one Cartesian delta into a plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// Machine position at the start of the move, mm.
    pub start: (f64, f64),
    /// Requested Cartesian delta, mm.
    pub delta: (f64, f64),
    /// Active speed, mm/s.
    pub speed: f64,
    pub laser: LaserMode<'a>,
    /// Longest plan accepted, capped at [`MAX_PLAN_STEPS`].
    pub max_steps: u64,
}

/// Build the plan for one move.
///
/// Total duration is the Cartesian length over the speed, shared out so that
/// every step gets `T / n` microseconds up to integer rounding and the step
/// durations sum to `round(T)`.
///
/// Actuator counts are checked against the step limit before anything is
/// allocated.
pub fn plan_move(kinematics: &CoreXYKinematics, request: &PlanRequest<'_>) -> Result<ActuationPlan, PlanError> {
    let (dx, dy) = request.delta;
    let (da, db) = kinematics.cartesian_to_motors(dx, dy);
    if !da.is_finite() || !db.is_finite() {
        return Err(PlanError::NonFinite { dx, dy });
    }
    let limit = request.max_steps.min(MAX_PLAN_STEPS);
    let needed = da.abs().max(db.abs()).round();
    if needed > limit as f64 {
        return Err(PlanError::TooManySteps {
            steps: needed as u64,
            limit,
        });
    }

    let generator = StepGenerator::from_fractional(da, db);
    let n = generator.len() as u64;
    if n == 0 {
        return Ok(ActuationPlan::default());
    }

    let distance = dx.hypot(dy);
    let total_us = if request.speed > 0.0 {
        (distance / request.speed * 1e6).round() as u64
    } else {
        0
    };

    let mut steps = Vec::with_capacity(n as usize);
    let (mut a, mut b) = (0i64, 0i64);
    for (i, (step_a, step_b)) in generator.enumerate() {
        a += step_a as i64;
        b += step_b as i64;
        let laser_on = match request.laser {
            LaserMode::Off => false,
            LaserMode::Raster { raster, threshold } => {
                let (ox, oy) = kinematics.motors_to_cartesian(a as f64, b as f64);
                let intensity = raster.sample(request.start.0 + ox, request.start.1 + oy);
                intensity > 0 && intensity >= threshold
            }
        };
        let i = i as u64;
        let elapsed = |k: u64| (total_us as u128 * k as u128 / n as u128) as u64;
        let duration = elapsed(i + 1) - elapsed(i);
        steps.push(PlanStep {
            a: step_a,
            b: step_b,
            laser_on,
            duration_us: duration,
        });
    }
    Ok(ActuationPlan::from_steps(steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterMask;

    fn request(delta: (f64, f64), speed: f64, laser: LaserMode<'_>) -> PlanRequest<'_> {
        PlanRequest {
            start: (0.0, 0.0),
            delta,
            speed,
            laser,
            max_steps: MAX_PLAN_STEPS,
        }
    }

    #[test]
    fn test_pure_x_move_steps_both_actuators_together() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let plan = plan_move(&kin, &request((10.0, 0.0), 2.0, LaserMode::Off)).unwrap();
        assert_eq!(plan.len(), 100);
        assert_eq!(plan.actuator_totals(), (100, 100));
        assert!(plan.steps().iter().all(|s| s.a == 1 && s.b == 1 && !s.laser_on));
        // 10 mm at 2 mm/s
        assert_eq!(plan.total_duration_us(), 5_000_000);
        assert!(plan.steps().iter().all(|s| s.duration_us == 50_000));
    }

    #[test]
    fn test_pure_y_move_runs_actuators_opposite() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let plan = plan_move(&kin, &request((0.0, -2.0), 30.0, LaserMode::Off)).unwrap();
        assert_eq!(plan.actuator_totals(), (-20, 20));
        assert!(plan.steps().iter().all(|s| s.a == -1 && s.b == 1));
    }

    #[test]
    fn test_diagonal_moves_single_actuator() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let plan = plan_move(&kin, &request((1.0, 1.0), 1.0, LaserMode::Off)).unwrap();
        assert_eq!(plan.actuator_totals(), (20, 0));
        assert_eq!(plan.len(), 20);
    }

    #[test]
    fn test_duration_sums_exactly_despite_rounding() {
        let kin = CoreXYKinematics::new(3.0, 0.0);
        let plan = plan_move(&kin, &request((7.0, 0.0), 3.0, LaserMode::Off)).unwrap();
        assert_eq!(plan.len(), 21);
        assert_eq!(plan.total_duration_us(), 2_333_333);
        let min = plan.steps().iter().map(|s| s.duration_us).min().unwrap();
        let max = plan.steps().iter().map(|s| s.duration_us).max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_zero_move_is_empty() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        assert!(plan_move(&kin, &request((0.0, 0.0), 1.0, LaserMode::Off)).unwrap().is_empty());
        assert!(plan_move(&kin, &request((0.01, 0.0), 1.0, LaserMode::Off)).unwrap().is_empty());
    }

    #[test]
    fn test_raster_gates_laser_per_step() {
        // left half dark, right half burn, 1 dot per mm
        let mask = RasterMask::from_rows(vec![vec![0, 0, 255, 255]]).unwrap();
        let raster = Raster::new(mask, 1.0).unwrap();
        let kin = CoreXYKinematics::new(1.0, 0.0);
        let laser = LaserMode::Raster { raster: &raster, threshold: 128 };
        let plan = plan_move(
            &kin,
            &PlanRequest {
                start: (0.0, 0.5),
                delta: (4.0, 0.0),
                speed: 1.0,
                laser,
                max_steps: MAX_PLAN_STEPS,
            },
        )
        .unwrap();
        let fired: Vec<_> = plan.steps().iter().map(|s| s.laser_on).collect();
        // sub-positions x = 1, 2, 3, 4; x = 4 is off the mask
        assert_eq!(fired, vec![false, true, true, false]);
    }

    #[test]
    fn test_threshold_zero_still_off_outside_mask() {
        let raster = Raster::new(RasterMask::uniform(10), 1.0).unwrap();
        let kin = CoreXYKinematics::new(1.0, 0.0);
        let laser = LaserMode::Raster { raster: &raster, threshold: 0 };
        let plan = plan_move(&kin, &request((-2.0, 0.0), 1.0, laser)).unwrap();
        assert_eq!(plan.laser_on_steps(), 0);
    }

    #[test]
    fn test_slow_feed_keeps_full_duration() {
        // 1 mm at F0.001, each step far longer than u32 microseconds
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let speed = 0.001 / 60.0;
        let plan = plan_move(&kin, &request((1.0, 0.0), speed, LaserMode::Off)).unwrap();
        assert_eq!(plan.len(), 10);
        assert_eq!(plan.total_duration_us(), (1.0 / speed * 1e6).round() as u64);
        assert!(plan.total_duration_us() >= 59_999_999_999);
        assert!(plan.steps().iter().all(|s| s.duration_us > u32::MAX as u64));
    }

    #[test]
    fn test_oversized_move_is_rejected_before_allocating() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let err = plan_move(&kin, &request((1e18, 0.0), 1.0, LaserMode::Off)).unwrap_err();
        assert_eq!(
            err,
            PlanError::TooManySteps {
                steps: 10_000_000_000_000_000_000,
                limit: MAX_PLAN_STEPS
            }
        );

        let bounded = PlanRequest {
            max_steps: 100,
            ..request((10.1, 0.0), 1.0, LaserMode::Off)
        };
        assert!(matches!(
            plan_move(&kin, &bounded),
            Err(PlanError::TooManySteps { steps: 101, limit: 100 })
        ));
        let exact = PlanRequest { delta: (10.0, 0.0), ..bounded };
        assert_eq!(plan_move(&kin, &exact).unwrap().len(), 100);
    }

    #[test]
    fn test_non_finite_delta_is_rejected() {
        let kin = CoreXYKinematics::new(10.0, 0.0);
        let err = plan_move(&kin, &request((f64::MAX, f64::MAX), 1.0, LaserMode::Off)).unwrap_err();
        assert!(matches!(err, PlanError::NonFinite { .. }));
    }
}
