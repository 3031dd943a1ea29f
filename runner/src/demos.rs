//! Small jobs shipped with the binary, used to try out a matrix and by the integration tests

use crate::{
    matrix::{Configuration, SettingsSchema, Value, ValueKind},
    registry::{Job, JobError, Registry, RegistryError},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, thread, time::Duration};

/// `y = slope * x + intercept`, built from `!ref { id: linear, args: { slope: 2.0 } }`
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub slope: f64,
    pub intercept: f64,
}

impl Linear {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Progress {
    partial: i64,
}

pub fn registry() -> Registry {
    Registry::new()
        .component("linear", |reference, _| {
            let number = |name: &str, default: f64| match reference.args.get(name) {
                None => Ok(default),
                Some(value) => value.as_f64().ok_or_else(|| RegistryError::Construction {
                    id: reference.id.clone(),
                    reason: format!("`{name}` must be a number, found {}", value.kind()),
                }),
            };

            Ok(Linear {
                slope: number("slope", 1.0)?,
                intercept: number("intercept", 0.0)?,
            })
        })
        .job(Job::new("echo", |_, configuration| {
            Ok(Value::Map(
                configuration
                    .values()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ))
        }))
        .job(Job::new("square", |_, configuration| {
            let x = int(configuration, "x")?;

            Ok(Value::Int(x * x))
        }))
        .job(Job::new("predict", |context, configuration| {
            let model = configuration
                .get("model")
                .ok_or_else(|| JobError::new("missing parameter `model`"))?;
            let model: Linear = context.registry().build_value(model)?;
            let x = configuration
                .get("x")
                .and_then(Value::as_f64)
                .ok_or_else(|| JobError::new("`x` must be a number"))?;

            context.record("prediction", model.predict(x));

            Ok(Value::Float(model.predict(x)))
        }))
        .job(
            Job::new("checkpointed", |context, configuration| {
                let x = int(configuration, "x")?;
                let resumed = context.checkpoint_exists();

                // expensive first phase, only done once per configuration
                let progress = if resumed {
                    context.restore_value::<Progress>()?
                } else {
                    let progress = Progress { partial: x * 10 };
                    context.save_value(&progress)?;
                    progress
                };

                if configuration.settings().bool("interrupt").unwrap_or(false) {
                    return Err(JobError::new("interrupted after checkpoint"));
                }

                Ok(Value::Map(BTreeMap::from([
                    ("value".to_owned(), Value::Int(progress.partial + 1)),
                    ("resumed".to_owned(), Value::Bool(resumed)),
                ])))
            })
            .with_schema(SettingsSchema::new().optional("interrupt", ValueKind::Bool)),
        )
        .job(
            Job::new("fail-on", |_, configuration| {
                if selected(configuration, "fail_when") {
                    return Err(JobError::new(format!("refusing {configuration}")));
                }

                Ok(Value::String(configuration.to_string()))
            })
            .with_schema(SettingsSchema::new().optional("fail_when", ValueKind::Map)),
        )
        .job(
            Job::new("panic-on", |_, configuration| {
                if selected(configuration, "panic_when") {
                    panic!("panicking for {configuration}");
                }

                Ok(Value::String(configuration.to_string()))
            })
            .with_schema(SettingsSchema::new().optional("panic_when", ValueKind::Map)),
        )
        .job(
            Job::new("abort-on", |_, configuration| {
                if selected(configuration, "abort_when") {
                    std::process::abort();
                }

                Ok(Value::String(configuration.to_string()))
            })
            .with_schema(SettingsSchema::new().optional("abort_when", ValueKind::Map)),
        )
        .job(
            Job::new("sleep", |_, configuration| {
                let millis = int(configuration, "ms")?;
                thread::sleep(Duration::from_millis(millis.max(0) as u64));

                Ok(Value::Int(millis))
            })
            .with_schema(SettingsSchema::new()),
        )
        .job(Job::new("chatty", |_, configuration| {
            let x = int(configuration, "x")?;
            thread::spawn(move || println!("helper thread saw x = {x}"))
                .join()
                .map_err(|_| JobError::new("helper thread panicked"))?;
            // progress without a trailing newline
            print!("{x}%");

            Ok(Value::Int(x))
        }))
}

fn int(configuration: &Configuration, name: &str) -> Result<i64, JobError> {
    configuration
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| JobError::new(format!("parameter `{name}` must be an integer")))
}

/// every key of the `setting` map equals the configuration's value
fn selected(configuration: &Configuration, setting: &str) -> bool {
    match configuration.settings().get(setting).and_then(Value::as_map) {
        Some(rule) => rule
            .iter()
            .all(|(key, expected)| configuration.get(key) == Some(expected)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_demo_job_is_registered() {
        let registry = registry();

        for id in [
            "echo",
            "square",
            "predict",
            "checkpointed",
            "fail-on",
            "panic-on",
            "abort-on",
            "sleep",
            "chatty",
        ] {
            assert!(registry.get_job(id).is_ok(), "{id} missing");
        }
        assert!(registry.has_component("linear"));
    }

    #[test]
    fn linear_arguments_are_checked() {
        let registry = registry();
        let reference = crate::matrix::Reference::new("linear").arg("slope", "steep");

        assert!(matches!(
            registry.build::<Linear>(&reference),
            Err(RegistryError::Construction { .. })
        ));
        assert_eq!(
            registry
                .build::<Linear>(&crate::matrix::Reference::new("linear").arg("slope", 3))
                .unwrap()
                .predict(2.0),
            6.0
        );
    }
}
