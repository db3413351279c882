// src/session.rs - One machine, one driver, one owner
use std::path::Path;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::gcode::{Command, MoveKind, ParseError, Program, ProgramLine};
use crate::hardware::{HardwareDriver, HardwareError};
use crate::interpreter::{Dispatcher, ExecutionError, Flow, Outcome, StopHandle};
use crate::job::{Job, JobStatus};
use crate::machine::{MachineState, PositioningMode};
use crate::motion::{MotionController, MotionStats};
use crate::raster::{RasterError, RasterMask};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session terminated by M0; reinitialize before running more commands")]
    Terminated,
}

/// Owns the machine state and the claimed driver for one physical machine.
///
/// Dropping the session forces laser and motors off and releases the driver.
pub struct Session<D: HardwareDriver> {
    config: Config,
    state: MachineState,
    motion: MotionController,
    driver: D,
    stop: StopHandle,
    terminated: bool,
    released: bool,
}

impl<D: HardwareDriver> Session<D> {
    /// Claim `driver` and build the power-on machine state.
    pub fn new(config: Config, mut driver: D) -> Result<Self, SessionError> {
        driver.init().inspect_err(|e| tracing::error!("Hardware init failed: {}", e))?;
        let state = match initial_state(&config) {
            Ok(state) => state,
            Err(e) => {
                driver.release();
                return Err(e);
            }
        };
        tracing::info!(
            "Session started: {} steps/mm, bed {} x {} mm",
            state.step_cal(),
            config.machine.bed_xmax,
            config.machine.bed_ymax
        );
        Ok(Self {
            config,
            state,
            motion: MotionController::new(),
            driver,
            stop: StopHandle::new(),
            terminated: false,
            released: false,
        })
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn motion_stats(&self) -> &MotionStats {
        self.motion.stats()
    }

    /// Handle for requesting a stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn set_raster(&mut self, mask: RasterMask, dpmm: f64) -> Result<(), SessionError> {
        self.state.set_raster(mask, dpmm)?;
        Ok(())
    }

    pub async fn run(&mut self, program: &Program) -> Result<Outcome, SessionError> {
        self.ensure_active()?;
        let result = Dispatcher::new(&mut self.state, &mut self.motion, &mut self.driver)
            .with_stop(self.stop.clone())
            .run(program)
            .await;
        let outcome = result?;
        if outcome.is_terminated() {
            self.terminated = true;
        }
        Ok(outcome)
    }

    /// Parse all of `source`, then run it.
    ///
    /// A parse error runs nothing but still turns the laser and motors off.
    pub async fn run_source(&mut self, source: &str) -> Result<Outcome, SessionError> {
        self.ensure_active()?;
        let program = Program::parse(source).inspect_err(|e| {
            tracing::error!("Rejecting program: {}", e);
            self.shut_down_outputs();
        })?;
        self.run(&program).await
    }

    pub async fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Outcome, SessionError> {
        let source = tokio::fs::read_to_string(path.as_ref()).await?;
        self.run_source(&source).await
    }

    /// Run a job, recording the line in progress, responses and final status.
    pub async fn run_job(&mut self, job: &mut Job) -> Result<JobStatus, SessionError> {
        self.ensure_active()?;
        tracing::info!("Starting job {} ({})", job.name(), job.id());
        job.start();
        let program = job.program().clone();
        let mut dispatcher =
            Dispatcher::new(&mut self.state, &mut self.motion, &mut self.driver).with_stop(self.stop.clone());
        let mut status = JobStatus::Completed;
        let mut error = None;
        for line in program.lines() {
            job.begin_line(line.line);
            match dispatcher.step(line).await {
                Ok(Flow::Continue(response)) => job.finish_line(response),
                Ok(Flow::Terminate) => {
                    job.finish_line(None);
                    status = JobStatus::Terminated;
                    break;
                }
                Err(e) => {
                    status = match e {
                        ExecutionError::StopRequested { .. } => JobStatus::Stopped,
                        ExecutionError::Motion { .. } | ExecutionError::Plan { .. } => JobStatus::Faulted,
                    };
                    error = Some(e.to_string());
                    break;
                }
            }
        }
        if status == JobStatus::Terminated {
            self.terminated = true;
        }
        job.finish(status, error);
        Ok(status)
    }

    /// Bring a terminated (or any) session back to its power-on state.
    pub fn reinitialize(&mut self) -> Result<(), SessionError> {
        tracing::info!("Reinitializing session");
        self.power_down();
        self.driver.init()?;
        self.released = false;
        self.state = initial_state(&self.config)?;
        self.terminated = false;
        Ok(())
    }

    /// Seek the reference switches (G28).
    pub async fn home(&mut self) -> Result<(), SessionError> {
        self.execute(Command::Home).await
    }

    pub fn set_absolute_mode(&mut self) {
        self.state.set_mode(PositioningMode::Absolute);
    }

    /// Rapid move to an absolute or relative target, depending on the mode.
    pub async fn move_to(&mut self, x: f64, y: f64, feedrate: Option<f64>) -> Result<(), SessionError> {
        self.execute(Command::Move {
            kind: MoveKind::Rapid,
            x: Some(x),
            y: Some(y),
            feedrate,
        })
        .await
    }

    pub fn is_homed(&self) -> bool {
        self.state.homed()
    }

    async fn execute(&mut self, command: Command) -> Result<(), SessionError> {
        self.ensure_active()?;
        let line = ProgramLine { line: 0, command };
        Dispatcher::new(&mut self.state, &mut self.motion, &mut self.driver)
            .with_stop(self.stop.clone())
            .step(&line)
            .await?;
        Ok(())
    }

    /// Laser off, motors off, driver released. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.released {
            tracing::info!("Shutting down session");
        }
        self.power_down();
    }

    fn power_down(&mut self) {
        if self.released {
            return;
        }
        self.shut_down_outputs();
        self.driver.release();
        self.released = true;
    }

    fn shut_down_outputs(&mut self) {
        self.state.enable_laser(false);
        self.state.enable_motors(false);
        self.driver.laser_off();
        self.driver.set_motors(false);
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.terminated || self.released {
            return Err(SessionError::Terminated);
        }
        Ok(())
    }
}

impl<D: HardwareDriver> Drop for Session<D> {
    fn drop(&mut self) {
        self.power_down();
    }
}

fn initial_state(config: &Config) -> Result<MachineState, SessionError> {
    let mut state = MachineState::from_config(config);
    if let Some(path) = &config.raster.path {
        let mask = RasterMask::from_image(path, config.raster.invert)?;
        state.set_raster(mask, config.raster.dpmm)?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedBoard;

    #[tokio::test]
    async fn test_second_session_on_same_board_is_busy() {
        let board = SimulatedBoard::default();
        let first = Session::new(Config::default(), board.driver()).unwrap();
        let second = Session::new(Config::default(), board.driver());
        assert!(matches!(second, Err(SessionError::Hardware(HardwareError::Busy))));
        drop(first);
        assert!(!board.is_claimed());
        assert!(Session::new(Config::default(), board.driver()).is_ok());
    }

    #[tokio::test]
    async fn test_terminated_session_refuses_until_reinitialized() {
        let board = SimulatedBoard::default();
        let mut session = Session::new(Config::default(), board.driver()).unwrap();
        let outcome = session.run_source("M0").await.unwrap();
        assert!(outcome.is_terminated());
        assert!(matches!(session.run_source("G90").await, Err(SessionError::Terminated)));
        session.reinitialize().unwrap();
        assert!(session.run_source("G91").await.is_ok());
        assert_eq!(session.state().mode(), PositioningMode::Relative);
    }

    #[tokio::test]
    async fn test_shutdown_releases_board() {
        let board = SimulatedBoard::default();
        let mut session = Session::new(Config::default(), board.driver()).unwrap();
        session.home().await.unwrap();
        assert!(board.motors_enabled());
        session.shutdown();
        assert!(!board.is_claimed());
        assert!(!board.motors_enabled());
        assert!(!session.state().motors_enabled());
        session.shutdown();
    }

    #[tokio::test]
    async fn test_scan_contract() {
        let board = SimulatedBoard::default();
        let mut session = Session::new(Config::default(), board.driver()).unwrap();
        assert!(!session.is_homed());
        session.home().await.unwrap();
        session.set_absolute_mode();
        session.move_to(10.0, 20.0, Some(6000.0)).await.unwrap();
        assert!(session.is_homed());
        assert_eq!(session.state().position(), (10.0, 20.0));
        assert_eq!(session.state().travel_speed(), 100.0);
        assert_eq!(board.position_mm(), (10.0, 20.0));
    }

    #[tokio::test]
    async fn test_parse_error_shuts_down_outputs() {
        let board = SimulatedBoard::default();
        let mut session = Session::new(Config::default(), board.driver()).unwrap();
        session.run_source("G28\nM3 S255").await.unwrap();
        assert!(session.state().laser_enabled());
        assert!(board.motors_enabled());

        let err = session.run_source("G1 X1\nG1 Z5").await.unwrap_err();
        assert!(matches!(err, SessionError::Parse(ref e) if e.line == 2));
        assert!(!session.state().laser_enabled());
        assert!(!session.state().motors_enabled());
        assert!(!board.motors_enabled());
        assert!(!board.laser_on());
        assert_eq!(session.state().position(), (0.0, 0.0));
        assert!(board.is_claimed());
    }

    #[tokio::test]
    async fn test_contract_moves_honour_stop_requests() {
        let board = SimulatedBoard::default();
        let mut session = Session::new(Config::default(), board.driver()).unwrap();
        session.home().await.unwrap();
        session.stop_handle().request_stop();
        let err = session.move_to(10.0, 20.0, None).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Execution(ExecutionError::StopRequested { line: 0 })
        ));
        assert!(!session.stop_handle().is_stop_requested());
        assert_eq!(session.state().position(), (0.0, 0.0));
        assert!(!board.motors_enabled());

        session.home().await.unwrap();
        session.move_to(10.0, 20.0, None).await.unwrap();
        assert_eq!(session.state().position(), (10.0, 20.0));
    }

    #[test]
    fn test_init_failure_is_reported() {
        let board = SimulatedBoard::default();
        board.fail_init("GPIO unavailable");
        assert!(matches!(
            Session::new(Config::default(), board.driver()),
            Err(SessionError::Hardware(HardwareError::InitFailed(_)))
        ));
    }
}
