use crate::worker::{WorkerReport, REPORT_PREFIX};
use nix::sys::signal::Signal;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("worker exited with status {0}")]
    Exited(i32),
    #[error("worker was killed by {0}")]
    Signaled(String),
    #[error("worker exited without a report")]
    MissingReport,
    #[error("failed to deserialize worker report: {0}")]
    DeserializeReport(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
/// container for information extracted from running a worker process
/// supposed to be interpreted by [`ingest`]
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
    pub signal: Option<i32>,
}

impl RunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// stdout without the report line
    pub fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .filter(|line| !line.starts_with(REPORT_PREFIX))
    }
}

pub fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(signal) => signal.as_str().to_owned(),
        Err(_) => format!("signal {signal}"),
    }
}

/// Decode the report of a finished worker, abnormal exits win over anything on stdout
#[tracing::instrument(level = "debug", skip(output))]
pub fn ingest(output: &RunOutput) -> Result<WorkerReport, IngestorError> {
    if let Some(signal) = output.signal {
        return Err(IngestorError::Signaled(signal_name(signal)));
    }

    match output.status {
        Some(0) => {}
        Some(status) => return Err(IngestorError::Exited(status)),
        // neither status nor signal, only possible on exotic platforms
        None => return Err(IngestorError::MissingReport),
    }

    let report = output
        .stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(REPORT_PREFIX))
        .ok_or(IngestorError::MissingReport)?;

    match serde_json::from_str(report) {
        Ok(report) => Ok(report),
        Err(e) => {
            error!(error = ?e, "Failed to deserialize worker report");

            Err(e.into())
        }
    }
}
