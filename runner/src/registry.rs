use crate::{
    context::Context,
    matrix::{Configuration, Matrix, Reference, SettingsSchema, Value},
};
use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no job registered as `{0}`")]
    UnknownJob(String),
    #[error("no component registered as `{0}`")]
    UnknownComponent(String),
    #[error("component `{0}` does not produce the requested type")]
    TypeMismatch(String),
    #[error("failed to construct `{id}`: {reason}")]
    Construction { id: String, reason: String },
    #[error("expected a reference, found {0}")]
    NotAReference(String),
}

/// Failure of a job body.
///
/// Deliberately not a `std::error::Error`, so any error type converts into it with `?`.
pub struct JobError {
    message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for JobError {
    fn from(error: E) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();

        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self { message }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobError({:?})", self.message)
    }
}

pub type JobBody = dyn Fn(&Context<'_>, &Configuration) -> Result<Value, JobError> + Send + Sync;

type Factory = dyn Fn(&Reference, &Registry) -> Result<Box<dyn Any + Send>, RegistryError>
    + Send
    + Sync;

/// A job body addressed by a stable id, so it can be selected inside a worker process
#[derive(Clone)]
pub struct Job {
    id: String,
    body: Arc<JobBody>,
    schema: Option<SettingsSchema>,
}

impl Job {
    pub fn new<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context<'_>, &Configuration) -> Result<Value, JobError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            body: Arc::new(body),
            schema: None,
        }
    }

    /// declare the settings this job reads, matrices are checked against it before scheduling
    pub fn with_schema(mut self, schema: SettingsSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> Option<&SettingsSchema> {
        self.schema.as_ref()
    }

    pub fn call(
        &self,
        context: &Context<'_>,
        configuration: &Configuration,
    ) -> Result<Value, JobError> {
        (self.body)(context, configuration)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Job bodies and component factories, resolved by id.
///
/// Both the scheduling process and every worker process build the same registry at startup,
/// ids are the only thing that crosses the process boundary.
#[derive(Default, Clone)]
pub struct Registry {
    jobs: BTreeMap<String, Job>,
    components: BTreeMap<String, Arc<Factory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(mut self, job: Job) -> Self {
        self.register_job(job);
        self
    }

    pub fn register_job(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get_job(&self, id: &str) -> Result<&Job, RegistryError> {
        self.jobs
            .get(id)
            .ok_or_else(|| RegistryError::UnknownJob(id.to_owned()))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// register a factory producing `T` from a reference's arguments
    pub fn component<T, F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send,
        F: Fn(&Reference, &Registry) -> Result<T, RegistryError> + Send + Sync + 'static,
    {
        self.components.insert(
            id.into(),
            Arc::new(move |reference: &Reference, registry: &Registry| {
                factory(reference, registry).map(|built| Box::new(built) as Box<dyn Any + Send>)
            }),
        );
        self
    }

    pub fn has_component(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    pub fn build<T: Any>(&self, reference: &Reference) -> Result<T, RegistryError> {
        let factory = self
            .components
            .get(&reference.id)
            .ok_or_else(|| RegistryError::UnknownComponent(reference.id.clone()))?;

        factory(reference, self)?
            .downcast::<T>()
            .map(|built| *built)
            .map_err(|_| RegistryError::TypeMismatch(reference.id.clone()))
    }

    pub fn build_value<T: Any>(&self, value: &Value) -> Result<T, RegistryError> {
        match value {
            Value::Ref(reference) => self.build(reference),
            other => Err(RegistryError::NotAReference(other.to_string())),
        }
    }

    /// every reference in parameters, exclude rules and settings must name a known component
    pub fn check_references(&self, matrix: &Matrix) -> Result<(), RegistryError> {
        let values = matrix
            .parameters
            .values()
            .flatten()
            .chain(matrix.exclude.iter().flat_map(|rule| rule.values()))
            .chain(matrix.settings.iter().map(|(_, value)| value));

        for value in values {
            for reference in value.references() {
                if !self.has_component(&reference.id) {
                    return Err(RegistryError::UnknownComponent(reference.id.clone()));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}
