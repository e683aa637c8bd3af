use std::str::FromStr;
use std::time::Duration;

use crate::definition::PipelineDefinition;
use crate::SettingsError;

pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ACTIVE_RUNS: usize = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notifications {
    pub emails: Vec<String>,
    pub on_failure: bool,
    pub on_retry: bool,
}

/// Immutable executor settings. Built once and handed to
/// [`PipelineExecutor::new`](crate::PipelineExecutor::new).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub pipeline_name: String,
    pub owner: Option<String>,
    /// Retries after the first attempt; stages may override it.
    pub retries: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Option<Duration>,
    pub max_active_runs: usize,
    pub notifications: Notifications,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "pipeline".to_string(),
            owner: None,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempt_timeout: None,
            max_active_runs: DEFAULT_MAX_ACTIVE_RUNS,
            notifications: Notifications::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn for_definition(definition: &PipelineDefinition) -> Self {
        let defaults = definition.defaults();
        let fallback = Self::default();

        Self {
            pipeline_name: definition.name().to_string(),
            owner: defaults.owner.clone(),
            retries: defaults.retries.unwrap_or(fallback.retries),
            retry_delay: defaults
                .retry_delay_secs
                .map_or(fallback.retry_delay, Duration::from_secs),
            attempt_timeout: defaults.attempt_timeout_secs.map(Duration::from_secs),
            max_active_runs: definition
                .max_active_runs()
                .unwrap_or(fallback.max_active_runs),
            notifications: Notifications {
                emails: defaults.emails.clone(),
                on_failure: defaults.email_on_failure,
                on_retry: defaults.email_on_retry,
            },
        }
    }

    /// Applies `RETRIES`, `RETRY_DELAY_SECS` and `ATTEMPT_TIMEOUT_SECS`.
    pub fn with_env(self) -> Result<Self, SettingsError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        if let Some(retries) = parse_var(&lookup, "RETRIES")? {
            self.retries = retries;
        }
        if let Some(secs) = parse_var(&lookup, "RETRY_DELAY_SECS")? {
            self.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "ATTEMPT_TIMEOUT_SECS")? {
            self.attempt_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, SettingsError> {
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|_| SettingsError::Invalid {
                name: name.to_string(),
                value,
            })
        })
        .transpose()
}
