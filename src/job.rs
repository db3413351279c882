// src/job.rs - Program files and job tracking
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::gcode::{ParseError, Program};
use crate::interpreter::Response;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to read program file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    /// Aborted by a stop request.
    Stopped,
    /// Ended by M0.
    Terminated,
    /// Aborted by a motion fault.
    Faulted,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Idle | JobStatus::Running)
    }
}

/// A parsed program plus its execution progress.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: Uuid,
    name: String,
    #[serde(skip)]
    program: Program,
    status: JobStatus,
    current_line: Option<usize>,
    executed: usize,
    responses: Vec<Response>,
    error: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, program: Program) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            program,
            status: JobStatus::Idle,
            current_line: None,
            executed: 0,
            responses: Vec::new(),
            error: None,
        }
    }

    /// Read and parse a program file. Nothing runs if any line fails to parse.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let program = Program::parse(&source).inspect_err(|e| {
            tracing::error!("Rejected {}: {}", path.display(), e);
        })?;
        tracing::info!("Loaded {} ({} commands)", path.display(), program.len());
        Ok(Self::new(path.display().to_string(), program))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Source line of the command currently (or last) executing.
    pub fn current_line(&self) -> Option<usize> {
        self.current_line
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Fraction of commands executed, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.program.is_empty() {
            return if self.status == JobStatus::Completed { 1.0 } else { 0.0 };
        }
        self.executed as f64 / self.program.len() as f64
    }

    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Running;
        self.current_line = None;
        self.executed = 0;
        self.responses.clear();
        self.error = None;
    }

    pub(crate) fn begin_line(&mut self, line: usize) {
        self.current_line = Some(line);
    }

    pub(crate) fn finish_line(&mut self, response: Option<Response>) {
        self.executed += 1;
        self.responses.extend(response);
    }

    pub(crate) fn finish(&mut self, status: JobStatus, error: Option<String>) {
        tracing::info!("Job {} ({}) finished: {:?}", self.name, self.id, status);
        self.status = status;
        self.error = error;
    }
}
