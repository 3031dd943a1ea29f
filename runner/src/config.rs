use serde::{Deserialize, Serialize};
use std::{
    env, fs::File, io::Error, os::unix::fs::MetadataExt, path::Path, path::PathBuf,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

/// environment variable overriding the SQLite path of both stores
pub const CACHE_PATH_ENV: &str = "GRIDLAB_CACHE_PATH";

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Failed to read config")]
    Read(#[from] Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    Preflight,
    #[error("Unable to locate the worker program")]
    WorkerNotFound(#[source] Error),
}

/// Explicit engine configuration, constructed once and handed to every component
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cache: StorageConfig,
    #[serde(default)]
    pub checkpoint: StorageConfig,

    // ignore cached results and run every configuration again
    #[serde(default)]
    pub force_run: bool,
    // refuse to run anything that is not cached
    #[serde(default)]
    pub force_cache: bool,
    // keep checkpoints of tasks whose result was cached
    #[serde(default)]
    pub keep_checkpoints: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// every task runs in a fresh child process of the worker program
    #[default]
    Process,
    /// tasks run on the pool threads, only unwinding panics are contained
    Thread,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub isolation: Isolation,
    // number of concurrent tasks, defaults to the number of CPUs
    pub threads: Option<usize>,
    // wall clock limit per task in milliseconds, only enforced for process isolation
    pub timeout: Option<u64>,
    // program started for process isolation, defaults to the current executable
    pub worker: Option<PathBuf>,
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    SQLite { path: PathBuf },
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::SQLite {
            path: default_database_path(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            threads: None,
            timeout: None,
            worker: None,
            args: default_worker_args(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            cache: StorageConfig::default(),
            checkpoint: StorageConfig::default(),
            force_run: false,
            force_cache: false,
            keep_checkpoints: false,
        }
    }
}

impl ExecutorConfig {
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// worker program, falling back to the running executable
    pub fn worker_program(&self) -> Result<PathBuf, ConfigErrors> {
        match &self.worker {
            Some(path) => Ok(path.clone()),
            None => env::current_exe().map_err(ConfigErrors::WorkerNotFound),
        }
    }
}

impl EngineConfig {
    /// in-process configuration without any files, mostly useful for tests and notebooks
    pub fn in_memory() -> Self {
        Self {
            executor: ExecutorConfig {
                isolation: Isolation::Thread,
                ..Default::default()
            },
            cache: StorageConfig::Memory,
            checkpoint: StorageConfig::Memory,
            ..Default::default()
        }
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    /// Apply `GRIDLAB_CACHE_PATH` to every SQLite backed store
    pub fn apply_env(&mut self) {
        if let Some(path) = env::var_os(CACHE_PATH_ENV) {
            let path = PathBuf::from(path);

            for storage in [&mut self.cache, &mut self.checkpoint] {
                if let StorageConfig::SQLite { path: current } = storage {
                    *current = path.clone();
                }
            }
        }
    }

    /// Logs every problem instead of stopping at the first one, returns `true` if any error
    /// was found
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.executor.threads == Some(0) {
            error!("executor.threads cannot be 0, no task would ever run");
            contains_error = true;
        }

        if self.executor.timeout == Some(0) {
            error!("executor.timeout cannot be 0, every task would time out");
            contains_error = true;
        }

        if self.force_run && self.force_cache {
            error!("force_run and force_cache exclude each other");
            contains_error = true;
        }

        match self.executor.isolation {
            Isolation::Process => {
                if self.checkpoint == StorageConfig::Memory {
                    error!("checkpoint.kind memory cannot be shared with worker processes, use sqlite or executor.isolation thread");
                    contains_error = true;
                }

                match self.executor.worker_program() {
                    Ok(program) => match check_executable(&program) {
                        Ok(true) => {}
                        Ok(false) => {
                            error!(
                                "Worker program {} is not executable",
                                program.to_string_lossy()
                            );
                            contains_error = true;
                        }
                        Err(e) => {
                            error!(
                                "Failed to determine if executor.worker ({}) is an executable: {e}",
                                program.to_string_lossy()
                            );
                            contains_error = true;
                        }
                    },
                    Err(e) => {
                        error!("Failed to locate the worker program: {e}");
                        contains_error = true;
                    }
                }
            }
            Isolation::Thread => {
                if self.executor.timeout.is_some() {
                    warn!("executor.timeout is ignored with thread isolation");
                }
                if self.executor.worker.is_some() {
                    warn!("executor.worker is ignored with thread isolation");
                }
            }
        }

        contains_error
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gridlab.sqlite")
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".to_owned()]
}
