use crate::{
    checkpoint::CheckpointStore,
    config::StorageConfig,
    context::Metrics,
    executors::run_in_place,
    matrix::Configuration,
    registry::Registry,
    result::{Outcome, TaskError},
};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, error};

/// marks the single stdout line carrying a [`WorkerReport`]
pub const REPORT_PREFIX: &str = "@@gridlab-report ";

/// Everything a worker process needs to run one task, written as JSON to its stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub job: String,
    pub index: usize,
    pub configuration: Configuration,
    pub checkpoint: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub outcome: Outcome,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to read task descriptor")]
    Read(#[source] io::Error),
    #[error("failed to decode task descriptor: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to write report")]
    Write(#[source] io::Error),
}

/// Serve exactly one task on stdin/stdout.
///
/// Stdout is left unlocked while the job runs so threads spawned by the job can print.
pub fn serve(registry: &Registry) -> Result<(), WorkerError> {
    serve_from(registry, io::stdin().lock(), io::stdout())
}

pub fn serve_from<R: Read, W: Write>(
    registry: &Registry,
    mut input: R,
    mut output: W,
) -> Result<(), WorkerError> {
    let mut buffer = String::new();
    input.read_to_string(&mut buffer).map_err(WorkerError::Read)?;

    let descriptor: TaskDescriptor = serde_json::from_str(&buffer)?;
    debug!(
        "Worker {} running task {} of {}",
        std::process::id(),
        descriptor.index,
        descriptor.job
    );

    let report = run_descriptor(registry, &descriptor);
    let line = serde_json::to_string(&report)?;

    // the job may have left an unterminated line behind
    let framed = format!("\n{REPORT_PREFIX}{line}\n");
    output
        .write_all(framed.as_bytes())
        .map_err(WorkerError::Write)?;
    output.flush().map_err(WorkerError::Write)
}

fn run_descriptor(registry: &Registry, descriptor: &TaskDescriptor) -> WorkerReport {
    let job = match registry.get_job(&descriptor.job) {
        Ok(job) => job,
        Err(e) => return setup_failure(e.to_string()),
    };

    let checkpoints = match CheckpointStore::open(&descriptor.checkpoint) {
        Ok(checkpoints) => checkpoints,
        Err(e) => return setup_failure(format!("checkpoint store: {e}")),
    };

    let fingerprint = descriptor.configuration.fingerprint();
    let (outcome, metrics) = run_in_place(
        job,
        registry,
        &checkpoints,
        &descriptor.configuration,
        &fingerprint,
    );

    WorkerReport { outcome, metrics }
}

fn setup_failure(reason: String) -> WorkerReport {
    error!("Worker setup failed: {reason}");

    WorkerReport {
        outcome: Outcome::Failure(TaskError::Setup(reason)),
        metrics: Metrics::new(),
    }
}
