mod local;
mod process;

use local::panic_message;
pub use local::{run_in_place, LocalExecutor};
pub use process::ProcessExecutor;

use crate::{
    checkpoint::CheckpointStore,
    config::{ConfigErrors, ExecutorConfig, Isolation, StorageConfig},
    context::Metrics,
    fingerprint::Fingerprint,
    matrix::Configuration,
    registry::{Job, Registry},
    result::{Outcome, TaskError},
};
use chrono::{DateTime, Utc};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::mpsc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("failed to build thread pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid executor configuration")]
    Config(#[from] ConfigErrors),
}

/// A configuration that was not cached and has to be executed
#[derive(Debug, Clone, Copy)]
pub struct Task<'a> {
    /// position in the expanded matrix
    pub index: usize,
    pub configuration: &'a Configuration,
    pub fingerprint: &'a Fingerprint,
}

/// Everything shared by the tasks of one run
#[derive(Debug, Clone, Copy)]
pub struct TaskEnv<'a> {
    pub job: &'a Job,
    pub registry: &'a Registry,
    pub checkpoints: &'a CheckpointStore,
    /// handed to worker processes so they open the same checkpoint store
    pub checkpoint_config: &'a StorageConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub outcome: Outcome,
    pub metrics: Metrics,
    pub runtime: Duration,
    pub started_at: DateTime<Utc>,
}

/// All isolation strategies
/// (this is deliberately not made with dynamic dispatch)
#[derive(Debug)]
pub enum Executors {
    Local(LocalExecutor),
    Process(ProcessExecutor),
}

impl Executors {
    pub fn load(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        let threads = config.threads();
        debug!("Starting thread pool with {threads} threads");

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("gridlab-worker-{index}"))
            .build()?;

        match config.isolation {
            Isolation::Thread => Ok(Self::Local(LocalExecutor::new(pool))),
            Isolation::Process => Ok(Self::Process(ProcessExecutor::new(
                pool,
                config.worker_program()?,
                config.args.clone(),
                config.timeout(),
            ))),
        }
    }

    pub fn threads(&self) -> usize {
        self.pool().current_num_threads()
    }

    fn pool(&self) -> &ThreadPool {
        match self {
            Self::Local(executor) => &executor.pool,
            Self::Process(executor) => &executor.pool,
        }
    }

    /// Run every task on the pool, at most `threads` at a time.
    ///
    /// `on_complete` is called on the calling thread exactly once per task, in completion
    /// order. A panic escaping an executor completes that task with a crash failure.
    pub fn execute<F>(&self, env: &TaskEnv<'_>, tasks: &[Task<'_>], mut on_complete: F)
    where
        F: FnMut(&Task<'_>, Completion),
    {
        let total = tasks.len();
        let (sender, receiver) = mpsc::channel::<(usize, Completion)>();

        self.pool().in_place_scope(|scope| {
            for (position, task) in tasks.iter().enumerate() {
                let sender = sender.clone();

                scope.spawn(move |_| {
                    let completion = complete(task.index, || match self {
                        Self::Local(executor) => executor.run(env, task),
                        Self::Process(executor) => executor.run(env, task),
                    });

                    // the receiver lives until the scope has ended
                    let _ = sender.send((position, completion));
                });
            }

            // only the spawned tasks hold senders now
            drop(sender);

            for (done, (position, completion)) in receiver.iter().enumerate() {
                on_complete(&tasks[position], completion);
                info!("Done with {}/{total}", done + 1);
            }
        });
    }
}

/// Time one execution unit, containing any panic it raises
fn complete<R>(index: usize, run: R) -> Completion
where
    R: FnOnce() -> (Outcome, Metrics),
{
    let started_at = Utc::now();
    let start = Instant::now();

    let (outcome, metrics) = match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Execution unit for task {index} panicked: {message}");

            (
                Outcome::Failure(TaskError::Crashed(format!(
                    "execution unit panicked: {message}"
                ))),
                Metrics::new(),
            )
        }
    };

    let completion = Completion {
        outcome,
        metrics,
        runtime: start.elapsed(),
        started_at,
    };

    debug!(
        "Task {index} finished in {} ns | success: {}",
        completion.runtime.as_nanos(),
        completion.outcome.is_success()
    );

    completion
}
