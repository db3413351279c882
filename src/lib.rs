// sketch_etch: G-code interpreter and CoreXY motion/laser engine for a laser etcher

pub mod config;
pub mod gcode;
pub mod hardware;
pub mod interpreter;
pub mod job;
pub mod machine;
pub mod motion;
pub mod raster;
pub mod scan;
pub mod session;

pub use config::{Config, ConfigError};
pub use gcode::{Command, ParseError, Program};
pub use hardware::{DriverStatus, EndstopStatus, HardwareDriver, HardwareError, SimulatedBoard};
pub use interpreter::{Dispatcher, ExecutionError, Outcome, Response, StopHandle};
pub use job::{Job, JobStatus};
pub use machine::{MachineState, PositioningMode};
pub use motion::{ActuationPlan, MotionController, MotionError, MotionFault, PlanError, PlanStep};
pub use raster::{Raster, RasterMask};
pub use session::{Session, SessionError};
