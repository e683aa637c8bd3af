use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{AccessKeyPair, ConfigError};

/// Per-run values visible to stages: the template variables derived from
/// the logical time and the credentials resolved before the run started.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub logical_time: DateTime<Utc>,
    vars: HashMap<String, String>,
    credentials: Arc<HashMap<String, AccessKeyPair>>,
}

impl RunContext {
    pub fn new(run_id: Uuid, logical_time: DateTime<Utc>) -> Self {
        let ts = logical_time.to_rfc3339();
        let vars = HashMap::from([
            ("ds".to_string(), logical_time.format("%Y-%m-%d").to_string()),
            ("ds_nodash".to_string(), logical_time.format("%Y%m%d").to_string()),
            ("year".to_string(), logical_time.format("%Y").to_string()),
            ("month".to_string(), logical_time.format("%m").to_string()),
            ("day".to_string(), logical_time.format("%d").to_string()),
            ("hour".to_string(), format!("{:02}", logical_time.hour())),
            ("execution_date".to_string(), ts.clone()),
            ("ts".to_string(), ts),
            ("run_id".to_string(), run_id.to_string()),
        ]);

        Self {
            run_id,
            logical_time,
            vars,
            credentials: Arc::new(HashMap::new()),
        }
    }

    /// Adds host-supplied variables; built-in names cannot be overridden.
    pub fn with_vars(mut self, extra: HashMap<String, String>) -> Self {
        for (name, value) in extra {
            self.vars.entry(name).or_insert(value);
        }
        self
    }

    pub fn with_credentials(mut self, credentials: HashMap<String, AccessKeyPair>) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn credential(&self, id: &str) -> Result<&AccessKeyPair, ConfigError> {
        self.credentials
            .get(id)
            .ok_or_else(|| ConfigError::MissingCredential(id.to_string()))
    }
}
