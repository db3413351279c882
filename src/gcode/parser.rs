//! Line-oriented G-code parser.
//!
//! Each raw line is normalized before tokenizing:
//!
//! 1. everything after `;` is a comment and dropped,
//! 2. a leading `N<digits>` line-number token is dropped,
//! 3. everything after `*` is a checksum and dropped,
//! 4. the rest is trimmed, uppercased and split on whitespace.
//!
//! So `N3 G1 X10.3 Y23.4 *34 ; comment` parses exactly like `G1 X10.3 Y23.4`.
//! The first token names the command; every other token is a parameter letter
//! immediately followed by a finite number.

use thiserror::Error;

use super::command::{self, Command, Params, UNIMPLEMENTED_COMMANDS};

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("command '{0}' is not implemented")]
    Unimplemented(String),
    #[error("command '{command}' does not accept parameter '{letter}'")]
    UnsupportedParameter { command: String, letter: char },
    #[error("parameter '{letter}' has non-numeric value '{value}'")]
    InvalidValue { letter: char, value: String },
    #[error("parameter '{0}' given more than once")]
    DuplicateParameter(char),
    #[error("malformed parameter '{0}'")]
    MalformedParameter(String),
}

/// A rejected line, with its 1-based line number and the text as written.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("G-code parse error at line {line}: {kind}: {text}")]
pub struct ParseError {
    pub line: usize,
    pub text: String,
    pub kind: ParseErrorKind,
}

/// Reduce a raw line to its command text, uppercased.
pub fn normalize(raw: &str) -> String {
    let without_comment = match raw.find(';') {
        Some(i) => &raw[..i],
        None => raw,
    };
    let without_number = strip_line_number(without_comment.trim_start());
    let without_checksum = match without_number.find('*') {
        Some(i) => &without_number[..i],
        None => without_number,
    };
    without_checksum.trim().to_ascii_uppercase()
}

fn strip_line_number(text: &str) -> &str {
    let token = text.split_whitespace().next().unwrap_or("");
    let mut chars = token.chars();
    let is_line_number = matches!(chars.next(), Some('N' | 'n'))
        && token.len() > 1
        && chars.all(|c| c.is_ascii_digit());
    if is_line_number {
        &text[token.len()..]
    } else {
        text
    }
}

/// Parse one line. `Ok(None)` means the line carries no command.
pub fn parse_line(line: usize, raw: &str) -> Result<Option<Command>, ParseError> {
    parse_normalized(&normalize(raw)).map_err(|kind| ParseError {
        line,
        text: raw.to_string(),
        kind,
    })
}

fn parse_normalized(text: &str) -> Result<Option<Command>, ParseErrorKind> {
    let mut tokens = text.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(None);
    };
    let Some(spec) = command::lookup(name) else {
        if UNIMPLEMENTED_COMMANDS.contains(&name) {
            return Err(ParseErrorKind::Unimplemented(name.to_string()));
        }
        return Err(ParseErrorKind::UnknownCommand(name.to_string()));
    };

    let mut params = Params::default();
    for token in tokens {
        let mut chars = token.chars();
        let letter = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => c,
            _ => return Err(ParseErrorKind::MalformedParameter(token.to_string())),
        };
        if !spec.params.contains(letter) {
            return Err(ParseErrorKind::UnsupportedParameter {
                command: spec.name.to_string(),
                letter,
            });
        }
        let raw_value = chars.as_str();
        let value = raw_value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseErrorKind::InvalidValue {
                letter,
                value: raw_value.to_string(),
            })?;
        if params.contains(letter) {
            return Err(ParseErrorKind::DuplicateParameter(letter));
        }
        params.insert(letter, value);
    }
    Ok(Some(spec.build(&params)))
}

/// Iterates the commands of a multi-line source, skipping blank and comment-only lines.
pub struct GCodeParser<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> GCodeParser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            lines: src.lines().enumerate(),
        }
    }

    /// Next `(line number, command)`, or the first parse error.
    pub fn next_command(&mut self) -> Option<Result<(usize, Command), ParseError>> {
        for (index, raw) in self.lines.by_ref() {
            match parse_line(index + 1, raw) {
                Ok(Some(command)) => return Some(Ok((index + 1, command))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

impl Iterator for GCodeParser<'_> {
    type Item = Result<(usize, Command), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command()
    }
}
