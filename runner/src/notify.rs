use crate::{
    matrix::Configuration,
    result::{Summary, TaskError, TaskResult},
};
use tracing::{error, info};

/// Receives task and batch events, called synchronously from the coordinating thread
pub trait Notifier: Send + Sync {
    /// a fresh task produced a value
    fn on_task_complete(&self, _result: &TaskResult) {}

    fn on_failure(&self, configuration: &Configuration, error: &TaskError);

    /// once per run, after every configuration has a result
    fn on_batch_complete(&self, summary: &Summary);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn on_failure(&self, _configuration: &Configuration, _error: &TaskError) {}

    fn on_batch_complete(&self, _summary: &Summary) {}
}

/// Reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn on_task_complete(&self, result: &TaskResult) {
        info!(
            "Completed {} in {:.3}s",
            result.configuration,
            result.runtime.as_secs_f64()
        );
    }

    fn on_failure(&self, configuration: &Configuration, error: &TaskError) {
        error!("Task {configuration} failed: {error}");
    }

    fn on_batch_complete(&self, summary: &Summary) {
        info!("Batch complete: {summary}");
    }
}

/// Fan-out to several notifiers in registration order
#[derive(Default)]
pub struct Notifiers {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for Notifiers {
    fn on_task_complete(&self, result: &TaskResult) {
        self.notifiers
            .iter()
            .for_each(|notifier| notifier.on_task_complete(result));
    }

    fn on_failure(&self, configuration: &Configuration, error: &TaskError) {
        self.notifiers
            .iter()
            .for_each(|notifier| notifier.on_failure(configuration, error));
    }

    fn on_batch_complete(&self, summary: &Summary) {
        self.notifiers
            .iter()
            .for_each(|notifier| notifier.on_batch_complete(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Counting(Arc<Mutex<(usize, usize)>>);

    impl Notifier for Counting {
        fn on_failure(&self, _configuration: &Configuration, _error: &TaskError) {
            self.0.lock().0 += 1;
        }

        fn on_batch_complete(&self, _summary: &Summary) {
            self.0.lock().1 += 1;
        }
    }

    #[test]
    fn fan_out_reaches_every_notifier() {
        let first = Counting::default();
        let second = Counting::default();
        let notifiers = Notifiers::new()
            .with(first.clone())
            .with(LogNotifier)
            .with(second.clone());
        let configuration = Matrix::new().parameter("x", [1]).expand().unwrap().remove(0);

        notifiers.on_failure(&configuration, &TaskError::Job("boom".to_owned()));
        notifiers.on_batch_complete(&Summary::default());

        assert_eq!(notifiers.len(), 3);
        assert_eq!(*first.0.lock(), (1, 1));
        assert_eq!(*second.0.lock(), (1, 1));
    }
}
