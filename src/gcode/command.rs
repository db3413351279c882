// src/gcode/command.rs - Typed commands understood by the interpreter
use std::fmt;

use crate::machine::PositioningMode;

/// G0 or G1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Laser held off for the whole move.
    Rapid,
    /// Cuts when the laser is enabled.
    Controlled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// M0: shut down and end the session.
    Unconditional,
    /// M1: motors and laser off, execution continues.
    Sleep,
}

/// One validated command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move {
        kind: MoveKind,
        x: Option<f64>,
        y: Option<f64>,
        /// mm/min
        feedrate: Option<f64>,
    },
    Home,
    SetMode(PositioningMode),
    SetPosition { x: f64, y: f64 },
    Stop(StopKind),
    LaserOn { power: Option<f64> },
    LaserOff,
    MotorsEnable(bool),
    SetStepCal { value: Option<f64> },
    QueryPosition,
    QueryVersion,
    QueryEndstops,
}

/// Name, accepted parameter letters and constructor of a supported command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub params: &'static str,
    build: fn(&Params) -> Command,
}

impl CommandSpec {
    /// Build the command from parameters already checked against `params`.
    pub fn build(&self, params: &Params) -> Command {
        (self.build)(params)
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

const fn spec(name: &'static str, params: &'static str, build: fn(&Params) -> Command) -> CommandSpec {
    CommandSpec { name, params, build }
}

fn linear_move(kind: MoveKind, params: &Params) -> Command {
    Command::Move {
        kind,
        x: params.get('X'),
        y: params.get('Y'),
        feedrate: params.get('F'),
    }
}

pub const SUPPORTED_COMMANDS: &[CommandSpec] = &[
    spec("G0", "XYF", |p| linear_move(MoveKind::Rapid, p)),
    spec("G1", "XYF", |p| linear_move(MoveKind::Controlled, p)),
    spec("G28", "", |_| Command::Home),
    spec("G90", "", |_| Command::SetMode(PositioningMode::Absolute)),
    spec("G91", "", |_| Command::SetMode(PositioningMode::Relative)),
    // Omitted axes default to 0.
    spec("G92", "XY", |p| Command::SetPosition {
        x: p.get('X').unwrap_or(0.0),
        y: p.get('Y').unwrap_or(0.0),
    }),
    spec("M0", "", |_| Command::Stop(StopKind::Unconditional)),
    spec("M1", "", |_| Command::Stop(StopKind::Sleep)),
    spec("M3", "S", |p| Command::LaserOn { power: p.get('S') }),
    spec("M5", "", |_| Command::LaserOff),
    spec("M17", "", |_| Command::MotorsEnable(true)),
    spec("M18", "", |_| Command::MotorsEnable(false)),
    // One calibration serves both actuators; X wins when both are given.
    spec("M92", "XY", |p| Command::SetStepCal {
        value: p.get('X').or(p.get('Y')),
    }),
    spec("M114", "", |_| Command::QueryPosition),
    spec("M115", "", |_| Command::QueryVersion),
    spec("M119", "", |_| Command::QueryEndstops),
];

/// Recognized but deliberately not implemented (units, pins, tones, fans).
pub const UNIMPLEMENTED_COMMANDS: &[&str] = &["G20", "G21", "M42", "M72", "M106", "M107"];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    SUPPORTED_COMMANDS.iter().find(|spec| spec.name == name)
}

/// Parameter values of one line, keyed by letter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<(char, f64)>,
}

impl Params {
    pub fn get(&self, letter: char) -> Option<f64> {
        self.values
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, letter: char) -> bool {
        self.get(letter).is_some()
    }

    pub(crate) fn insert(&mut self, letter: char, value: f64) {
        self.values.push((letter, value));
    }
}

impl Command {
    /// Diagnostic commands answer with a value and never touch machine state.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::QueryPosition | Command::QueryVersion | Command::QueryEndstops
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { kind, x, y, feedrate } => {
                f.write_str(match kind {
                    MoveKind::Rapid => "G0",
                    MoveKind::Controlled => "G1",
                })?;
                for (letter, value) in [('X', x), ('Y', y), ('F', feedrate)] {
                    if let Some(v) = value {
                        write!(f, " {}{}", letter, v)?;
                    }
                }
                Ok(())
            }
            Command::Home => f.write_str("G28"),
            Command::SetMode(PositioningMode::Absolute) => f.write_str("G90"),
            Command::SetMode(PositioningMode::Relative) => f.write_str("G91"),
            Command::SetPosition { x, y } => write!(f, "G92 X{} Y{}", x, y),
            Command::Stop(StopKind::Unconditional) => f.write_str("M0"),
            Command::Stop(StopKind::Sleep) => f.write_str("M1"),
            Command::LaserOn { power: Some(s) } => write!(f, "M3 S{}", s),
            Command::LaserOn { power: None } => f.write_str("M3"),
            Command::LaserOff => f.write_str("M5"),
            Command::MotorsEnable(true) => f.write_str("M17"),
            Command::MotorsEnable(false) => f.write_str("M18"),
            Command::SetStepCal { value: Some(v) } => write!(f, "M92 X{}", v),
            Command::SetStepCal { value: None } => f.write_str("M92"),
            Command::QueryPosition => f.write_str("M114"),
            Command::QueryVersion => f.write_str("M115"),
            Command::QueryEndstops => f.write_str("M119"),
        }
    }
}
