use super::{Task, TaskEnv};
use crate::{
    context::Metrics,
    ingest::{ingest, IngestorError, RunOutput},
    result::{Outcome, TaskError},
    worker::{TaskDescriptor, WorkerReport},
};
use rayon::ThreadPool;
use std::{
    io::{Read, Write},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace, warn};
use wait_timeout::ChildExt;

/// Executor that starts one worker process per task, so even a hard crash of a job body only
/// fails its own task
#[derive(Debug)]
pub struct ProcessExecutor {
    pub(super) pool: ThreadPool,
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                warn!("Failed to read worker output: {e}");
            }
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl ProcessExecutor {
    pub fn new(
        pool: ThreadPool,
        program: PathBuf,
        args: Vec<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            pool,
            program,
            args,
            timeout,
        }
    }

    #[instrument(skip_all, fields(task = task.index), level = "debug")]
    pub(super) fn run(&self, env: &TaskEnv<'_>, task: &Task<'_>) -> (Outcome, Metrics) {
        match self.spawn_and_wait(env, task) {
            Ok(report) => (report.outcome, report.metrics),
            Err(error) => (Outcome::Failure(error), Metrics::new()),
        }
    }

    fn spawn_and_wait(
        &self,
        env: &TaskEnv<'_>,
        task: &Task<'_>,
    ) -> Result<WorkerReport, TaskError> {
        let descriptor = TaskDescriptor {
            job: env.job.id().to_owned(),
            index: task.index,
            configuration: task.configuration.clone(),
            checkpoint: env.checkpoint_config.clone(),
        };
        let payload = serde_json::to_vec(&descriptor)
            .map_err(|e| TaskError::Protocol(format!("failed to encode task: {e}")))?;

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TaskError::Spawn(format!("{}: {e}", self.program.to_string_lossy())))?;

        debug!("Task {} running in worker {}", task.index, child.id());

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload) {
                // the worker may already be gone, its exit status tells why
                warn!("Failed to send task {} to worker: {e}", task.index);
            }
            // Dropping stdin here will close the underlying file descriptor
            // this gives the worker a clear end of input
            drop(stdin);
        }

        let status = self.wait(&mut child);

        let output = RunOutput {
            runtime: start.elapsed(),
            stdout: join(stdout),
            stderr: join(stderr),
            status: status.as_ref().ok().and_then(|status| status.code()),
            signal: status.as_ref().ok().and_then(|status| status.signal()),
        };

        log_output(task.index, &output);
        status?;

        ingest(&output).map_err(|e| match e {
            IngestorError::Signaled(signal) => TaskError::Crashed(signal),
            IngestorError::Exited(code) => TaskError::Crashed(format!("exit status {code}")),
            e @ (IngestorError::MissingReport | IngestorError::DeserializeReport(_)) => {
                TaskError::Protocol(e.to_string())
            }
        })
    }

    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, TaskError> {
        let waited = match self.timeout {
            Some(timeout) => child.wait_timeout(timeout),
            None => child.wait().map(Some),
        };

        match waited {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                // child hasn't exited yet
                debug!("Worker {} ran into timeout, killing it", child.id());
                kill(child);

                Err(TaskError::Timeout(self.timeout.unwrap_or_default()))
            }
            Err(e) => {
                kill(child);

                Err(TaskError::Spawn(format!("failed to wait for worker: {e}")))
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill worker {}: {e}", child.id());
    }
    // reap it, also closes the output pipes for the reader threads
    let _ = child.wait();
}

fn log_output(index: usize, output: &RunOutput) {
    for line in output.output_lines().filter(|line| !line.is_empty()) {
        info!("Task {index}: {line}");
    }

    let failed = output.status != Some(0);
    for line in output.stderr.lines() {
        if failed {
            warn!("Task {index}: {line}");
        } else {
            trace!("Task {index}: {line}");
        }
    }
}
