pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod database;
pub mod demos;
pub mod engine;
pub mod executors;
pub mod fingerprint;
pub mod ingest;
pub mod matrix;
pub mod notify;
pub mod registry;
pub mod result;
pub mod worker;

pub use config::EngineConfig;
pub use context::Context;
pub use engine::{Engine, EngineError, RunOptions, RunOutcome};
pub use fingerprint::Fingerprint;
pub use matrix::{Configuration, Matrix, Reference, Value};
pub use notify::Notifier;
pub use registry::{Job, JobError, Registry};
pub use result::{BatchReport, Outcome, Source, Summary, TaskError, TaskResult};
