// src/hardware/simulator.rs - In-process model of the etcher board
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{DriverStatus, EndstopStatus, HardwareDriver, HardwareError};
use crate::config::SimulatorConfig;
use crate::motion::ActuationPlan;

/// One plan as the board saw it.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRecord {
    pub plan: ActuationPlan,
    /// Steps physically taken before the board stopped.
    pub executed: usize,
    pub status: i32,
}

#[derive(Debug, Default)]
struct BoardState {
    claimed: bool,
    init_failure: Option<String>,
    motors_enabled: bool,
    laser_on: bool,
    homed: bool,
    a: i64,
    b: i64,
    safety_feet: bool,
    injected: VecDeque<i32>,
    trip: Option<(usize, u8)>,
    records: Vec<PlanRecord>,
}

/// A simulated machine: two belt actuators, a laser, four endstops and the
/// safety-feet switch.
///
/// Clones share the same physical board. Only one [`SimulatedDriver`] may
/// hold the claim at a time.
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
    config: SimulatorConfig,
}

impl SimulatedBoard {
    pub fn new(config: SimulatorConfig) -> Self {
        tracing::debug!(
            "Simulated board {} x {} mm at {} steps/mm",
            config.bed_xmax,
            config.bed_ymax,
            config.steps_per_mm
        );
        Self {
            state: Arc::new(Mutex::new(BoardState::default())),
            config,
        }
    }

    /// A new, unclaimed driver handle for this board.
    pub fn driver(&self) -> SimulatedDriver {
        SimulatedDriver {
            board: self.clone(),
            claimed: false,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Physical head position derived from the actuator counters.
    pub fn position_mm(&self) -> (f64, f64) {
        let state = self.state.lock();
        self.head_position(state.a, state.b)
    }

    pub fn actuator_steps(&self) -> (i64, i64) {
        let state = self.state.lock();
        (state.a, state.b)
    }

    /// Latch or clear the safety-feet switch.
    pub fn set_safety_feet(&self, triggered: bool) {
        self.state.lock().safety_feet = triggered;
    }

    /// Status returned by the next motion (home or plan) instead of running it.
    pub fn inject_status(&self, code: i32) {
        self.state.lock().injected.push_back(code);
    }

    /// Stop the next plan after `steps` steps, reporting `switches`.
    pub fn trip_after(&self, steps: usize, switches: u8) {
        self.state.lock().trip = Some((steps, switches));
    }

    /// Make the next `init` fail.
    pub fn fail_init(&self, reason: impl Into<String>) {
        self.state.lock().init_failure = Some(reason.into());
    }

    pub fn records(&self) -> Vec<PlanRecord> {
        self.state.lock().records.clone()
    }

    pub fn last_record(&self) -> Option<PlanRecord> {
        self.state.lock().records.last().cloned()
    }

    pub fn is_claimed(&self) -> bool {
        self.state.lock().claimed
    }

    pub fn is_homed(&self) -> bool {
        self.state.lock().homed
    }

    pub fn motors_enabled(&self) -> bool {
        self.state.lock().motors_enabled
    }

    pub fn laser_on(&self) -> bool {
        self.state.lock().laser_on
    }

    fn head_position(&self, a: i64, b: i64) -> (f64, f64) {
        let spm = self.config.steps_per_mm;
        ((a + b) as f64 / (2.0 * spm), (a - b) as f64 / (2.0 * spm))
    }

    fn switches(&self, state: &BoardState) -> EndstopStatus {
        let (x, y) = self.head_position(state.a, state.b);
        let tolerance = 1.0 / self.config.steps_per_mm;
        let mut bits = 0;
        if x < -tolerance {
            bits |= EndstopStatus::XMIN;
        }
        if x > self.config.bed_xmax + tolerance {
            bits |= EndstopStatus::XMAX;
        }
        if y < -tolerance {
            bits |= EndstopStatus::YMIN;
        }
        if y > self.config.bed_ymax + tolerance {
            bits |= EndstopStatus::YMAX;
        }
        if state.safety_feet {
            bits |= EndstopStatus::SAFE_FEET;
        }
        EndstopStatus::from_bits(bits)
    }

    /// Run `plan` against the board; returns the status and the time it took.
    fn run_plan(&self, plan: &ActuationPlan) -> (i32, u64) {
        let mut state = self.state.lock();
        let mut executed = 0;
        let mut elapsed_us = 0u64;

        let status = if !state.claimed {
            DriverStatus::HARDWARE_FAULT
        } else if let Some(code) = state.injected.pop_front() {
            code
        } else if self.config.require_homing && !state.homed {
            DriverStatus::NOT_HOMED
        } else if state.safety_feet {
            EndstopStatus::SAFE_FEET as i32
        } else {
            let trip = state.trip.take();
            let mut status = 0;
            for step in plan.steps() {
                if let Some((after, switches)) = trip {
                    if executed == after {
                        status = switches as i32;
                        break;
                    }
                }
                state.a += step.a as i64;
                state.b += step.b as i64;
                state.laser_on = step.laser_on;
                executed += 1;
                elapsed_us += step.duration_us;
                let switches = self.switches(&state);
                if !switches.is_clear() {
                    status = switches.bits() as i32;
                    break;
                }
            }
            status
        };

        state.laser_on = false;
        state.records.push(PlanRecord {
            plan: plan.clone(),
            executed,
            status,
        });
        if status != 0 {
            tracing::debug!(
                "Simulated board stopped after {}/{} steps with status {}",
                executed,
                plan.len(),
                status
            );
        }
        (status, elapsed_us)
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

/// Driver handle for a [`SimulatedBoard`].
#[derive(Debug)]
pub struct SimulatedDriver {
    board: SimulatedBoard,
    claimed: bool,
}

impl SimulatedDriver {
    pub fn board(&self) -> &SimulatedBoard {
        &self.board
    }
}

#[async_trait]
impl HardwareDriver for SimulatedDriver {
    fn init(&mut self) -> Result<(), HardwareError> {
        if self.claimed {
            return Ok(());
        }
        let mut state = self.board.state.lock();
        if let Some(reason) = state.init_failure.take() {
            return Err(HardwareError::InitFailed(reason));
        }
        if state.claimed {
            return Err(HardwareError::Busy);
        }
        state.claimed = true;
        state.motors_enabled = false;
        state.laser_on = false;
        self.claimed = true;
        tracing::debug!("Simulated board claimed");
        Ok(())
    }

    fn release(&mut self) {
        if !self.claimed {
            return;
        }
        let mut state = self.board.state.lock();
        state.motors_enabled = false;
        state.laser_on = false;
        state.homed = false;
        state.claimed = false;
        self.claimed = false;
        tracing::debug!("Simulated board released");
    }

    fn set_motors(&mut self, enabled: bool) {
        if !self.claimed {
            tracing::warn!("Ignoring motor change on an unclaimed board");
            return;
        }
        let mut state = self.board.state.lock();
        state.motors_enabled = enabled;
        if !enabled {
            state.homed = false;
        }
    }

    fn laser_off(&mut self) {
        if self.claimed {
            self.board.state.lock().laser_on = false;
        }
    }

    fn read_switches(&mut self) -> EndstopStatus {
        let state = self.board.state.lock();
        self.board.switches(&state)
    }

    async fn home(&mut self) -> i32 {
        let mut state = self.board.state.lock();
        if !self.claimed {
            return DriverStatus::HARDWARE_FAULT;
        }
        if let Some(code) = state.injected.pop_front() {
            return code;
        }
        if state.safety_feet {
            return EndstopStatus::SAFE_FEET as i32;
        }
        state.a = 0;
        state.b = 0;
        state.homed = true;
        0
    }

    async fn execute(&mut self, plan: &ActuationPlan) -> i32 {
        if !self.claimed {
            return DriverStatus::HARDWARE_FAULT;
        }
        let (status, elapsed_us) = self.board.run_plan(plan);
        if self.board.config.realtime && elapsed_us > 0 {
            tokio::time::sleep(Duration::from_micros(elapsed_us)).await;
        }
        status
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::PlanStep;

    fn plan(a: i8, b: i8, n: usize) -> ActuationPlan {
        ActuationPlan::from_steps(vec![
            PlanStep {
                a,
                b,
                laser_on: false,
                duration_us: 10,
            };
            n
        ])
    }

    async fn homed_driver(board: &SimulatedBoard) -> SimulatedDriver {
        let mut driver = board.driver();
        driver.init().unwrap();
        driver.set_motors(true);
        assert_eq!(driver.home().await, 0);
        driver
    }

    #[tokio::test]
    async fn test_single_claim() {
        let board = SimulatedBoard::default();
        let mut first = board.driver();
        let mut second = board.driver();
        first.init().unwrap();
        assert!(matches!(second.init(), Err(HardwareError::Busy)));
        first.release();
        second.init().unwrap();
        assert!(board.is_claimed());
        drop(second);
        assert!(!board.is_claimed());
    }

    #[tokio::test]
    async fn test_move_requires_homing() {
        let board = SimulatedBoard::default();
        let mut driver = board.driver();
        assert_eq!(driver.execute(&plan(1, 1, 3)).await, DriverStatus::HARDWARE_FAULT);
        driver.init().unwrap();
        assert_eq!(driver.execute(&plan(1, 1, 3)).await, DriverStatus::NOT_HOMED);
        assert_eq!(board.actuator_steps(), (0, 0));
    }

    #[tokio::test]
    async fn test_plan_moves_head() {
        let board = SimulatedBoard::default();
        let mut driver = homed_driver(&board).await;
        assert_eq!(driver.execute(&plan(1, 1, 20)).await, 0);
        assert_eq!(board.position_mm(), (2.0, 0.0));
        assert_eq!(board.last_record().unwrap().executed, 20);
    }

    #[tokio::test]
    async fn test_endstop_stops_plan_and_keeps_displacement() {
        let board = SimulatedBoard::default();
        let mut driver = homed_driver(&board).await;
        // -x: both actuators backwards
        let status = driver.execute(&plan(-1, -1, 20)).await;
        assert_eq!(status, EndstopStatus::XMIN as i32);
        let record = board.last_record().unwrap();
        assert!(record.executed < 20);
        assert!(board.position_mm().0 < 0.0);
        assert!(driver.read_switches().contains(EndstopStatus::XMIN));
    }

    #[tokio::test]
    async fn test_injected_and_tripped_status() {
        let board = SimulatedBoard::default();
        let mut driver = homed_driver(&board).await;
        board.inject_status(-2);
        assert_eq!(driver.execute(&plan(1, 1, 5)).await, -2);
        board.trip_after(3, EndstopStatus::YMAX);
        assert_eq!(driver.execute(&plan(1, 1, 5)).await, EndstopStatus::YMAX as i32);
        assert_eq!(board.actuator_steps(), (3, 3));
        assert_eq!(driver.execute(&plan(1, 1, 5)).await, 0);
    }

    #[tokio::test]
    async fn test_safety_feet_block_motion() {
        let board = SimulatedBoard::default();
        let mut driver = homed_driver(&board).await;
        board.set_safety_feet(true);
        assert_eq!(driver.execute(&plan(1, 1, 5)).await, 16);
        assert_eq!(driver.home().await, 16);
        board.set_safety_feet(false);
        assert_eq!(driver.execute(&plan(1, 1, 5)).await, 0);
    }

    #[tokio::test]
    async fn test_disabling_motors_loses_home() {
        let board = SimulatedBoard::default();
        let mut driver = homed_driver(&board).await;
        driver.set_motors(false);
        assert!(!board.is_homed());
        assert_eq!(driver.execute(&plan(1, 1, 1)).await, DriverStatus::NOT_HOMED);
    }

    #[test]
    fn test_failed_init() {
        let board = SimulatedBoard::default();
        board.fail_init("no GPIO");
        let mut driver = board.driver();
        assert!(matches!(driver.init(), Err(HardwareError::InitFailed(_))));
        assert!(!board.is_claimed());
        driver.init().unwrap();
    }
}
