// src/motion/mod.rs - Motion & laser synchronization
pub mod controller;
pub mod kinematics;
pub mod plan;
pub mod stepper;

use thiserror::Error;

use crate::hardware::DriverStatus;

pub use controller::{MotionController, MotionStats, MoveRequest};
pub use kinematics::CoreXYKinematics;
pub use plan::{plan_move, ActuationPlan, LaserMode, PlanError, PlanRequest, PlanStep, PlanSummary, MAX_PLAN_STEPS};
pub use stepper::StepGenerator;

/// The driver did not complete a move or homing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Motion fault (status {code}): {status}", code = .status.code())]
pub struct MotionFault {
    pub status: DriverStatus,
}

impl MotionFault {
    pub fn code(&self) -> i32 {
        self.status.code()
    }
}

/// Why a linear move did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MotionError {
    #[error(transparent)]
    Fault(#[from] MotionFault),
    #[error(transparent)]
    Plan(#[from] PlanError),
}
