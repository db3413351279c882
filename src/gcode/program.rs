// src/gcode/program.rs - A fully parsed command file
use super::command::Command;
use super::parser::{GCodeParser, ParseError};

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramLine {
    /// 1-based line in the source.
    pub line: usize,
    pub command: Command,
}

/// Every command of a source, validated before any of them runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    lines: Vec<ProgramLine>,
}

impl Program {
    /// Parse the whole source; the first bad line rejects all of it.
    pub fn parse(src: &str) -> Result<Self, ParseError> {
        let lines = GCodeParser::new(src)
            .map(|item| item.map(|(line, command)| ProgramLine { line, command }))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Parsed {} G-code commands", lines.len());
        Ok(Self { lines })
    }

    /// Commands not tied to a source file, numbered from 1.
    pub fn from_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            lines: commands
                .into_iter()
                .enumerate()
                .map(|(i, command)| ProgramLine { line: i + 1, command })
                .collect(),
        }
    }

    pub fn lines(&self) -> &[ProgramLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
