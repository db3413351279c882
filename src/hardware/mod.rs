// src/hardware/mod.rs - Driver contract between the motion engine and the pulse hardware
pub mod simulator;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::motion::ActuationPlan;

pub use simulator::{PlanRecord, SimulatedBoard, SimulatedDriver};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Hardware initialization failed: {0}")]
    InitFailed(String),
    #[error("Driver is already claimed by another session")]
    Busy,
}

/// Switch states as reported by the board, bit 0 first:
/// XMIN, XMAX, YMIN, YMAX, SAFE_FEET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EndstopStatus(u8);

impl EndstopStatus {
    pub const XMIN: u8 = 1 << 0;
    pub const XMAX: u8 = 1 << 1;
    pub const YMIN: u8 = 1 << 2;
    pub const YMAX: u8 = 1 << 3;
    pub const SAFE_FEET: u8 = 1 << 4;
    pub const MASK: u8 = 0b1_1111;

    const NAMES: [&'static str; 5] = ["XMIN", "XMAX", "YMIN", "YMAX", "SAFE_FEET"];

    /// Bits above the five defined switches are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, switch: u8) -> bool {
        self.0 & switch == switch
    }

    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    pub fn triggered(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::NAMES
            .iter()
            .enumerate()
            .filter(move |(bit, _)| self.0 & (1u8 << *bit) != 0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for EndstopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07b}", self.0)?;
        let names: Vec<_> = self.triggered().collect();
        if !names.is_empty() {
            write!(f, " ({})", names.join(", "))?;
        }
        Ok(())
    }
}

/// Interpreted driver status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverStatus {
    /// 0: the whole plan ran.
    Completed,
    /// Positive: motion stopped early. `switches` holds the known switch bits
    /// of the raw `code`.
    Triggered { code: i32, switches: EndstopStatus },
    /// Negative: not homed or a hardware fault.
    Fault(i32),
}

impl DriverStatus {
    pub const NOT_HOMED: i32 = -1;
    pub const HARDWARE_FAULT: i32 = -2;

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DriverStatus::Completed,
            c if c > 0 => DriverStatus::Triggered {
                code: c,
                switches: EndstopStatus::from_bits((c & EndstopStatus::MASK as i32) as u8),
            },
            c => DriverStatus::Fault(c),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            DriverStatus::Completed => 0,
            DriverStatus::Triggered { code, .. } => *code,
            DriverStatus::Fault(code) => *code,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DriverStatus::Completed)
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverStatus::Completed => f.write_str("completed"),
            DriverStatus::Triggered { code, switches } if *code == switches.bits() as i32 => {
                write!(f, "switch triggered {}", switches)
            }
            DriverStatus::Triggered { code, switches } => {
                write!(f, "switch triggered {} (unknown status bits in {})", switches, code)
            }
            DriverStatus::Fault(Self::NOT_HOMED) => f.write_str("machine not homed"),
            DriverStatus::Fault(code) => write!(f, "hardware fault {}", code),
        }
    }
}

/// The pulse/GPIO layer that physically runs actuation plans.
///
/// Instantaneous pin writes are synchronous; motion completes when the
/// returned future resolves with a status code (0 done, positive switch
/// bitmask, negative not homed or fault).
#[async_trait]
pub trait HardwareDriver: Send {
    /// Claim the hardware for this session and bring the pins up.
    fn init(&mut self) -> Result<(), HardwareError>;

    /// Motors off, laser off and give up the claim.
    fn release(&mut self);

    fn set_motors(&mut self, enabled: bool);

    fn laser_off(&mut self);

    fn read_switches(&mut self) -> EndstopStatus;

    /// Seek the reference switches.
    async fn home(&mut self) -> i32;

    async fn execute(&mut self, plan: &ActuationPlan) -> i32;
}
