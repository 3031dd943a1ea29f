use clap::{Args, Parser, Subcommand};
use gridlab::{
    cache::CacheStore,
    checkpoint::CheckpointStore,
    config::{ConfigErrors, EngineConfig, Isolation},
    demos, worker, Engine, EngineError, Matrix, RunOptions, RunOutcome,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridlab", version, about = "Run every configuration of a parameter grid, cached and checkpointed")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job for every configuration of a matrix
    Run {
        /// Path to the matrix document
        matrix: PathBuf,
        /// Id of the job
        #[arg(short, long)]
        job: String,
        #[command(flatten)]
        engine: EngineArgs,
        /// Number of concurrent tasks
        #[arg(short, long)]
        threads: Option<usize>,
        /// Only expand and print the configurations
        #[arg(long)]
        dry_run: bool,
        /// Ignore cached results
        #[arg(long, conflicts_with = "force_cache")]
        force_run: bool,
        /// Fail unless every result is cached
        #[arg(long)]
        force_cache: bool,
        #[arg(long, value_parser = parse_isolation)]
        isolation: Option<Isolation>,
    },
    /// Expand a matrix and print its configurations
    Plan {
        matrix: PathBuf,
    },
    /// List the available jobs
    Jobs,
    /// Remove every cached result and checkpoint
    Clear {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Serve one task descriptor from stdin
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct EngineArgs {
    /// Path to the engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_isolation(value: &str) -> Result<Isolation, String> {
    match value {
        "process" => Ok(Isolation::Process),
        "thread" => Ok(Isolation::Thread),
        other => Err(format!("unknown isolation `{other}`, expected process or thread")),
    }
}

impl EngineArgs {
    fn load(&self) -> Result<EngineConfig, ConfigErrors> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        config.apply_env();

        Ok(config)
    }
}

fn main() -> ExitCode {
    // stdout is reserved for results and the worker report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Worker => {
            return match worker::serve(&demos::registry()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Worker failed: {e}");
                    ExitCode::FAILURE
                }
            };
        }
        Commands::Run {
            matrix,
            job,
            engine,
            threads,
            dry_run,
            force_run,
            force_cache,
            isolation,
        } => engine
            .load()
            .map_err(EngineError::from)
            .and_then(|mut config| {
                config.force_run |= force_run;
                config.force_cache |= force_cache;
                if let Some(threads) = threads {
                    config.executor.threads = Some(threads);
                }
                if let Some(isolation) = isolation {
                    config.executor.isolation = isolation;
                }

                run(config, matrix, &job, dry_run)
            }),
        Commands::Plan { matrix } => plan(matrix),
        Commands::Jobs => {
            for job in demos::registry().jobs() {
                println!("{}", job.id());
            }
            Ok(())
        }
        Commands::Clear { engine } => engine.load().map_err(EngineError::from).and_then(clear),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: EngineConfig, matrix: PathBuf, job: &str, dry_run: bool) -> Result<(), EngineError> {
    if !dry_run && config.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    let matrix = Matrix::from_file(&matrix)?;
    let engine = Engine::new(config, demos::registry());
    let options = RunOptions {
        dry_run,
        ..Default::default()
    };

    match engine.run(job, &matrix, options)? {
        RunOutcome::DryRun { planned } => {
            for configuration in planned {
                println!("{configuration}");
            }
        }
        RunOutcome::Completed(report) => {
            for result in report.results.iter() {
                println!("{result}");
                if let Some(persist_error) = &result.persist_error {
                    warn!("Result of {} was not cached: {persist_error}", result.configuration);
                }
            }
            println!("{}", report.summary);
        }
    }

    Ok(())
}

fn plan(matrix: PathBuf) -> Result<(), EngineError> {
    let matrix = Matrix::from_file(&matrix)?;
    let engine = Engine::new(EngineConfig::default(), demos::registry());

    for configuration in engine.plan(&matrix)? {
        println!("{configuration}");
    }

    Ok(())
}

fn clear(config: EngineConfig) -> Result<(), EngineError> {
    let cache = CacheStore::open(&config.cache)?.clear()?;
    let checkpoints = CheckpointStore::open(&config.checkpoint)?.clear()?;

    info!("Removed {cache} cached results and {checkpoints} checkpoints");

    Ok(())
}
