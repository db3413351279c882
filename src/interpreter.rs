// src/interpreter.rs - Command dispatcher
//! Executes parsed commands against one machine, strictly in order.
//!
//! Every abort path (motion fault, stop request, M0, M1) forces the laser off
//! and the motors off on both the state store and the driver before it
//! returns.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::gcode::{Command, Program, ProgramLine, StopKind};
use crate::hardware::{EndstopStatus, HardwareDriver};
use crate::machine::MachineState;
use crate::motion::{MotionController, MotionError, MotionFault, MoveRequest, PlanError};

/// Firmware identity reported by M115.
pub fn firmware_version() -> String {
    format!("V{} of Sketch 'n' Etch firmware", env!("CARGO_PKG_VERSION"))
}

/// Answer to a diagnostic command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Response {
    Position { x: f64, y: f64 },
    Version(String),
    Endstops(EndstopStatus),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Position { x, y } => write!(f, "X:{:.2} Y:{:.2}", x, y),
            Response::Version(version) => f.write_str(version),
            Response::Endstops(switches) => write!(f, "{}", switches.bits()),
        }
    }
}

/// How a command sequence ended without a fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    Completed { responses: Vec<Response> },
    /// M0 ran; the machine is shut down and the session must be reinitialized.
    Terminated { line: usize, responses: Vec<Response> },
}

impl Outcome {
    pub fn responses(&self) -> &[Response] {
        match self {
            Outcome::Completed { responses } | Outcome::Terminated { responses, .. } => responses,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated { .. })
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Line {line}: {fault}")]
    Motion {
        line: usize,
        #[source]
        fault: MotionFault,
    },
    #[error("Line {line}: {error}")]
    Plan {
        line: usize,
        #[source]
        error: PlanError,
    },
    #[error("Stop requested before line {line}")]
    StopRequested { line: usize },
}

impl ExecutionError {
    pub fn line(&self) -> usize {
        match self {
            ExecutionError::Motion { line, .. }
            | ExecutionError::Plan { line, .. }
            | ExecutionError::StopRequested { line } => *line,
        }
    }
}

/// Cloneable stop request, honoured before the next command runs.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Consume a pending request.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// What the caller does after one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue(Option<Response>),
    Terminate,
}

pub struct Dispatcher<'a, D: HardwareDriver + ?Sized> {
    state: &'a mut MachineState,
    motion: &'a mut MotionController,
    driver: &'a mut D,
    stop: Option<StopHandle>,
}

impl<'a, D: HardwareDriver + ?Sized> Dispatcher<'a, D> {
    pub fn new(state: &'a mut MachineState, motion: &'a mut MotionController, driver: &'a mut D) -> Self {
        Self {
            state,
            motion,
            driver,
            stop: None,
        }
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Run every line of `program`; the first fault aborts the rest.
    pub async fn run(&mut self, program: &Program) -> Result<Outcome, ExecutionError> {
        let mut responses = Vec::new();
        for line in program.lines() {
            match self.step(line).await? {
                Flow::Continue(Some(response)) => responses.push(response),
                Flow::Continue(None) => {}
                Flow::Terminate => {
                    return Ok(Outcome::Terminated {
                        line: line.line,
                        responses,
                    });
                }
            }
        }
        Ok(Outcome::Completed { responses })
    }

    /// Execute a single line.
    pub async fn step(&mut self, line: &ProgramLine) -> Result<Flow, ExecutionError> {
        if self.stop.as_ref().is_some_and(StopHandle::take) {
            tracing::warn!("Stop requested, aborting before line {}", line.line);
            self.shut_down_outputs();
            return Err(ExecutionError::StopRequested { line: line.line });
        }
        tracing::debug!("Line {}: {}", line.line, line.command);

        let response = match line.command {
            Command::Move { kind, x, y, feedrate } => {
                let request = MoveRequest { kind, x, y, feedrate };
                let result = self.motion.linear_move(self.state, self.driver, request).await;
                self.check(line.line, result)?;
                None
            }
            Command::Home => {
                let result = self.motion.home(self.state, self.driver).await;
                self.check(line.line, result)?;
                None
            }
            Command::SetMode(mode) => {
                self.state.set_mode(mode);
                None
            }
            Command::SetPosition { x, y } => {
                self.state.set_position(x, y);
                None
            }
            Command::Stop(StopKind::Unconditional) => {
                tracing::info!("M0 at line {}: shutting down", line.line);
                self.shut_down_outputs();
                return Ok(Flow::Terminate);
            }
            Command::Stop(StopKind::Sleep) => {
                tracing::info!("M1 at line {}: motors and laser off", line.line);
                self.shut_down_outputs();
                None
            }
            Command::LaserOn { power } => {
                let power = power.unwrap_or(0.0);
                self.state.set_laser_power(power);
                self.state.enable_laser(power != 0.0);
                if power == 0.0 {
                    self.driver.laser_off();
                }
                None
            }
            Command::LaserOff => {
                self.state.enable_laser(false);
                self.driver.laser_off();
                None
            }
            Command::MotorsEnable(enabled) => {
                self.state.enable_motors(enabled);
                self.driver.set_motors(enabled);
                None
            }
            Command::SetStepCal { value } => {
                match value {
                    Some(value) if value > 0.0 => self.state.set_step_cal(value),
                    Some(value) => tracing::warn!("Ignoring non-positive step calibration {}", value),
                    None => tracing::warn!("M92 without a value leaves step calibration at {}", self.state.step_cal()),
                }
                None
            }
            Command::QueryPosition => {
                let (x, y) = self.state.position();
                Some(Response::Position { x, y })
            }
            Command::QueryVersion => Some(Response::Version(firmware_version())),
            Command::QueryEndstops => Some(Response::Endstops(self.driver.read_switches())),
        };
        Ok(Flow::Continue(response))
    }

    fn check<T, E: Into<MotionError>>(&mut self, line: usize, result: Result<T, E>) -> Result<T, ExecutionError> {
        result.map_err(|error| {
            let error = error.into();
            tracing::error!("Aborting at line {}: {}", line, error);
            self.shut_down_outputs();
            match error {
                MotionError::Fault(fault) => ExecutionError::Motion { line, fault },
                MotionError::Plan(error) => ExecutionError::Plan { line, error },
            }
        })
    }

    fn shut_down_outputs(&mut self) {
        self.state.enable_laser(false);
        self.driver.laser_off();
        self.state.enable_motors(false);
        self.driver.set_motors(false);
    }
}
