use handlebars::{no_escape, Handlebars, RenderErrorReason};
use std::collections::HashMap;
use std::fmt;

use crate::ConfigError;

const KEY_TEMPLATE: &str = "key";

/// A storage key template such as `log_data/{{year}}/{{month}}/{{ds}}-events.json`.
///
/// Rendered with handlebars in strict mode and without HTML escaping, so
/// every referenced variable must be defined for the run.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    registry: Handlebars<'static>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(no_escape);
        registry
            .register_template_string(KEY_TEMPLATE, raw)
            .map_err(|err| ConfigError::MalformedTemplate {
                template: raw.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            raw: raw.to_string(),
            registry,
        })
    }

    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String, ConfigError> {
        self.registry
            .render(KEY_TEMPLATE, vars)
            .map_err(|err| match err.reason() {
                RenderErrorReason::MissingVariable(name) => ConfigError::UnknownVariable {
                    name: name.clone().unwrap_or_default(),
                    template: self.raw.clone(),
                },
                _ => ConfigError::MalformedTemplate {
                    template: self.raw.clone(),
                    reason: err.to_string(),
                },
            })
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A fully-qualified object storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn resolve(
        bucket: &str,
        key_template: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let key = PathTemplate::parse(key_template)?.render(vars)?;

        Ok(Self {
            bucket: bucket.trim_end_matches('/').to_string(),
            key: key.trim_start_matches('/').to_string(),
        })
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
