// src/gcode/mod.rs
pub mod command;
pub mod parser;
pub mod program;

pub use command::{Command, CommandSpec, MoveKind, Params, StopKind, SUPPORTED_COMMANDS, UNIMPLEMENTED_COMMANDS};
pub use parser::{parse_line, GCodeParser, ParseError, ParseErrorKind};
pub use program::{Program, ProgramLine};
