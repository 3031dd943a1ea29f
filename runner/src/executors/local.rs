use super::{Task, TaskEnv};
use crate::{
    checkpoint::CheckpointStore,
    context::{Context, Metrics},
    fingerprint::Fingerprint,
    matrix::Configuration,
    registry::{Job, Registry},
    result::{Outcome, TaskError},
};
use rayon::ThreadPool;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};
use tracing::{instrument, warn};

/// Executor that runs job bodies directly on the threads of its pool.
///
/// Only unwinding panics are contained, a body that aborts the process takes the whole run
/// down with it. Use [`ProcessExecutor`](super::ProcessExecutor) for untrusted bodies.
#[derive(Debug)]
pub struct LocalExecutor {
    pub(super) pool: ThreadPool,
}

impl LocalExecutor {
    pub fn new(pool: ThreadPool) -> Self {
        Self { pool }
    }

    #[instrument(skip_all, fields(task = task.index), level = "debug")]
    pub(super) fn run(&self, env: &TaskEnv<'_>, task: &Task<'_>) -> (Outcome, Metrics) {
        run_in_place(
            env.job,
            env.registry,
            env.checkpoints,
            task.configuration,
            task.fingerprint,
        )
    }
}

/// Call the job body on the current thread and convert errors and panics into a failure
pub fn run_in_place(
    job: &Job,
    registry: &Registry,
    checkpoints: &CheckpointStore,
    configuration: &Configuration,
    fingerprint: &Fingerprint,
) -> (Outcome, Metrics) {
    let context = Context::new(job.id(), fingerprint, checkpoints, registry);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.call(&context, configuration)))
    {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(e)) => Outcome::Failure(TaskError::Job(e.message().to_owned())),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Job {} panicked for {configuration}: {message}", job.id());

            Outcome::Failure(TaskError::Panic(message))
        }
    };

    (outcome, context.into_metrics())
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
