use std::collections::HashMap;
use std::fmt;

use crate::ConfigError;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeyPair {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AccessKeyPair {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// Resolves a named credential to an access key pair.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, id: &str) -> Result<AccessKeyPair, ConfigError>;
}

/// Reads `<ID>_ACCESS_KEY_ID` and `<ID>_SECRET_ACCESS_KEY` from the
/// environment, with `ID` upper-cased and non-alphanumerics mapped to `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn prefix(id: &str) -> String {
        id.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, id: &str) -> Result<AccessKeyPair, ConfigError> {
        let prefix = Self::prefix(id);
        let read = |suffix: &str| {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(id.to_string()))
        };

        Ok(AccessKeyPair::new(
            read("ACCESS_KEY_ID")?,
            read("SECRET_ACCESS_KEY")?,
        ))
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentials(HashMap<String, AccessKeyPair>);

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, pair: AccessKeyPair) -> Self {
        self.0.insert(id.to_string(), pair);
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, id: &str) -> Result<AccessKeyPair, ConfigError> {
        self.0
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigError::MissingCredential(id.to_string()))
    }
}
