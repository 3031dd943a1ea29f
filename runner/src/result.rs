use crate::{
    context::Metrics,
    fingerprint::Fingerprint,
    matrix::{Configuration, Value},
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Why a single task did not produce a value, never aborts the batch
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    #[error("{0}")]
    Job(String),
    #[error("job panicked: {0}")]
    Panic(String),
    #[error("worker crashed: {0}")]
    Crashed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid worker report: {0}")]
    Protocol(String),
    #[error("failed to start worker: {0}")]
    Spawn(String),
    #[error("worker setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(Value),
    Failure(TaskError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Fresh,
    Cached,
}

/// Result of one configuration, cached or freshly computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub configuration: Configuration,
    pub fingerprint: Fingerprint,
    pub outcome: Outcome,
    pub runtime: Duration,
    pub started_at: DateTime<Utc>,
    pub metrics: Metrics,
    pub source: Source,
    /// set if the value was computed but could not be written to the cache
    pub persist_error: Option<String>,
}

impl TaskResult {
    pub fn is_cached(&self) -> bool {
        self.source == Source::Cached
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.value()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.error()
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            Source::Fresh => "fresh",
            Source::Cached => "cached",
        };

        match &self.outcome {
            Outcome::Success(value) => write!(
                f,
                "{} ok {value} ({source}, {:.3}s)",
                self.configuration,
                self.runtime.as_secs_f64()
            ),
            Outcome::Failure(error) => write!(
                f,
                "{} failed: {error} ({source}, {:.3}s)",
                self.configuration,
                self.runtime.as_secs_f64()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
}

impl Summary {
    pub fn from_results(results: &[TaskResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            summary.total += 1;
            if result.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if result.is_cached() {
                summary.cached += 1;
            }
            summary
        })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded, {} failed, {}/{} cached",
            self.succeeded, self.total, self.failed, self.cached, self.total
        )
    }
}

/// Every result of a run in configuration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<TaskResult>,
    pub summary: Summary,
}

impl BatchReport {
    pub fn new(results: Vec<TaskResult>) -> Self {
        let summary = Summary::from_results(&results);

        Self { results, summary }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|result| !result.is_success())
    }
}

/// Stable merge of cache hits and fresh results by their position in the expanded matrix
pub fn aggregate(
    cached: Vec<(usize, TaskResult)>,
    fresh: Vec<(usize, TaskResult)>,
) -> Vec<TaskResult> {
    cached
        .into_iter()
        .chain(fresh)
        .sorted_by_key(|(index, _)| *index)
        .map(|(_, result)| result)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    fn results() -> Vec<TaskResult> {
        Matrix::new()
            .parameter("x", [1, 2, 3, 4])
            .expand()
            .unwrap()
            .into_iter()
            .map(|configuration| TaskResult {
                fingerprint: configuration.fingerprint(),
                outcome: Outcome::Success(configuration.get("x").cloned().unwrap()),
                configuration,
                runtime: Duration::ZERO,
                started_at: Utc::now(),
                metrics: Metrics::new(),
                source: Source::Fresh,
                persist_error: None,
            })
            .collect()
    }

    #[test]
    fn aggregate_restores_configuration_order() {
        let mut results = results().into_iter().enumerate().collect_vec();
        let cached = vec![results.remove(2), results.remove(0)];
        results.reverse();

        let merged = aggregate(cached, results);

        assert_eq!(
            merged.iter().map(|result| result.value().cloned()).collect_vec(),
            (1..=4).map(|x| Some(Value::Int(x))).collect_vec()
        );
    }

    #[test]
    fn summary_counts() {
        let mut results = results();
        results[1].outcome = Outcome::Failure(TaskError::Job("boom".to_owned()));
        results[2].source = Source::Cached;
        results[3].source = Source::Cached;

        let report = BatchReport::new(results);

        assert_eq!(
            report.summary,
            Summary {
                total: 4,
                succeeded: 3,
                failed: 1,
                cached: 2
            }
        );
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.summary.to_string(), "3/4 succeeded, 1 failed, 2/4 cached");
    }
}
