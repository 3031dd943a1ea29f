
use crate::{
    cache::{CacheStore, CachedEntry},
    checkpoint::CheckpointStore,
    config::{ConfigErrors, EngineConfig, Isolation, StorageConfig},
    database::StoreError,
    executors::{Completion, ExecutorError, Executors, Task, TaskEnv},
    fingerprint::Fingerprint,
    matrix::{Configuration, Matrix, MatrixError, SettingsError},
    notify::{LogNotifier, Notifier},
    registry::{Job, Registry, RegistryError},
    result::{aggregate, BatchReport, Outcome, Source, TaskResult},
};
use itertools::Itertools;
use once_cell::sync::OnceCell;
use std::collections::{hash_map::Entry, HashMap};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Setup errors, a run never fails because of an individual job
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid matrix: {0}")]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("settings do not match the job's schema: {}", .0.iter().join(", "))]
    Settings(Vec<SettingsError>),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("{missing}/{total} configurations are not cached and force_cache is set")]
    CacheMiss { missing: usize, total: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// only expand and log the configurations
    pub dry_run: bool,
    /// overrides `executor.threads` for this run
    pub threads: Option<usize>,
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            threads: None,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(BatchReport),
    /// the run stopped after expansion, nothing was looked up, executed or notified
    DryRun { planned: Vec<Configuration> },
}

impl RunOutcome {
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::DryRun { .. } => None,
        }
    }

    pub fn into_report(self) -> Option<BatchReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::DryRun { .. } => None,
        }
    }
}

/// Entry point: expands matrices, consults the cache and schedules the rest.
///
/// Stores are opened on first use, a dry run never touches them.
pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    notifier: Box<dyn Notifier>,
    cache: OnceCell<CacheStore>,
    checkpoints: OnceCell<CheckpointStore>,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            notifier: Box::new(LogNotifier),
            cache: OnceCell::new(),
            checkpoints: OnceCell::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> Result<&CacheStore, StoreError> {
        self.cache
            .get_or_try_init(|| CacheStore::open(&self.config.cache))
    }

    pub fn checkpoints(&self) -> Result<&CheckpointStore, StoreError> {
        self.checkpoints
            .get_or_try_init(|| CheckpointStore::open(&self.config.checkpoint))
    }

    /// Validate and expand a matrix without looking at any store
    pub fn plan(&self, matrix: &Matrix) -> Result<Vec<Configuration>, EngineError> {
        matrix.validate()?;
        self.registry.check_references(matrix)?;

        let configurations = matrix.expand()?;
        for (index, configuration) in configurations.iter().enumerate() {
            debug!("Configuration {index}: {configuration}");
        }

        Ok(configurations)
    }

    #[instrument(skip(self, matrix), level = "info")]
    pub fn run(
        &self,
        job: &str,
        matrix: &Matrix,
        options: RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let job = self.registry.get_job(job)?;

        if let Some(schema) = job.schema() {
            matrix
                .settings
                .validate(schema)
                .map_err(EngineError::Settings)?;
        }

        let configurations = self.plan(matrix)?;

        if options.dry_run {
            for configuration in configurations.iter() {
                info!("Planned {configuration}");
            }
            info!(
                "Exiting due to dry run, {} configurations planned",
                configurations.len()
            );

            return Ok(RunOutcome::DryRun {
                planned: configurations,
            });
        }

        let total = configurations.len();
        let fingerprints = configurations.iter().map(Configuration::fingerprint).collect_vec();
        let cache = self.cache()?;

        // every lookup happens before anything is scheduled
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for (index, (configuration, fingerprint)) in
            configurations.iter().zip(fingerprints.iter()).enumerate()
        {
            let hit = if self.config.force_run {
                None
            } else {
                cache.get(job.id(), fingerprint)
            };

            match hit {
                Some(entry) => cached.push((
                    index,
                    cached_result(configuration.clone(), fingerprint.clone(), entry),
                )),
                None => missing.push(index),
            }
        }

        info!("{}/{total} results retrieved from cache", cached.len());

        if self.config.force_cache && !missing.is_empty() {
            return Err(EngineError::CacheMiss {
                missing: missing.len(),
                total,
            });
        }

        // configurations sharing a fingerprint within one run are executed once
        let mut first_seen: HashMap<&Fingerprint, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        let mut tasks = Vec::new();
        for index in missing {
            match first_seen.entry(&fingerprints[index]) {
                Entry::Occupied(first) => duplicates.push((index, *first.get())),
                Entry::Vacant(slot) => {
                    slot.insert(index);
                    tasks.push(Task {
                        index,
                        configuration: &configurations[index],
                        fingerprint: &fingerprints[index],
                    });
                }
            }
        }

        let mut fresh = if tasks.is_empty() {
            Vec::new()
        } else {
            self.execute(job, &tasks, options)?
        };

        let copies = duplicates
            .into_iter()
            .filter_map(|(index, first)| {
                fresh
                    .iter()
                    .find(|(position, _)| *position == first)
                    .map(|(_, result)| (index, result.clone()))
            })
            .collect_vec();
        fresh.extend(copies);

        let report = BatchReport::new(aggregate(cached, fresh));
        debug_assert_eq!(report.len(), total);

        self.notifier.on_batch_complete(&report.summary);

        Ok(RunOutcome::Completed(report))
    }

    fn execute(
        &self,
        job: &Job,
        tasks: &[Task<'_>],
        options: RunOptions,
    ) -> Result<Vec<(usize, TaskResult)>, EngineError> {
        let cache = self.cache()?;
        let checkpoints = self.checkpoints()?;

        let mut executor_config = self.config.executor.clone();
        if let Some(threads) = options.threads {
            executor_config.threads = Some(threads);
        }

        if executor_config.isolation == Isolation::Process
            && self.config.checkpoint == StorageConfig::Memory
        {
            warn!("Worker processes cannot share a memory checkpoint store, checkpoints will not survive a task");
        }

        let executor = Executors::load(&executor_config)?;
        info!(
            "Executing {} tasks of {} on {} threads",
            tasks.len(),
            job.id(),
            executor.threads()
        );

        let env = TaskEnv {
            job,
            registry: &self.registry,
            checkpoints,
            checkpoint_config: &self.config.checkpoint,
        };

        let mut fresh = Vec::with_capacity(tasks.len());
        executor.execute(&env, tasks, |task, completion| {
            let result = self.complete(job.id(), cache, checkpoints, task, completion);
            fresh.push((task.index, result));
        });

        Ok(fresh)
    }

    /// Persist and announce a finished task, runs on the coordinating thread
    fn complete(
        &self,
        job: &str,
        cache: &CacheStore,
        checkpoints: &CheckpointStore,
        task: &Task<'_>,
        completion: Completion,
    ) -> TaskResult {
        let mut result = TaskResult {
            configuration: task.configuration.clone(),
            fingerprint: task.fingerprint.clone(),
            outcome: completion.outcome,
            runtime: completion.runtime,
            started_at: completion.started_at,
            metrics: completion.metrics,
            source: Source::Fresh,
            persist_error: None,
        };

        match &result.outcome {
            Outcome::Success(value) => {
                let entry = CachedEntry {
                    value: value.clone(),
                    metrics: result.metrics.clone(),
                    runtime: result.runtime,
                    started_at: result.started_at,
                };

                match cache.put(job, task.fingerprint, &entry) {
                    Ok(()) => {
                        if !self.config.keep_checkpoints {
                            if let Err(e) = checkpoints.remove(job, task.fingerprint) {
                                warn!(
                                    "Failed to remove checkpoint {}: {e}",
                                    task.fingerprint.short()
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed to cache result of {}: {e}",
                            task.configuration
                        );
                        result.persist_error = Some(e.to_string());
                    }
                }

                self.notifier.on_task_complete(&result);
            }
            Outcome::Failure(error) => {
                self.notifier.on_failure(&result.configuration, error);
            }
        }

        result
    }
}

fn cached_result(
    configuration: Configuration,
    fingerprint: Fingerprint,
    entry: CachedEntry,
) -> TaskResult {
    TaskResult {
        configuration,
        fingerprint,
        outcome: Outcome::Success(entry.value),
        runtime: entry.runtime,
        started_at: entry.started_at,
        metrics: entry.metrics,
        source: Source::Cached,
        persist_error: None,
    }
}
