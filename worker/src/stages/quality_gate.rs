use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{open_session, Predicate};
use crate::warehouse::{Row, Warehouse, WarehouseSession};
use crate::{CheckFailure, CheckFailureReason, LoadError, QualityFailure, StageError};

/// A query returning one scalar, and the rule that scalar must satisfy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub query: String,
    pub predicate: Predicate,
}

impl QualityCheck {
    pub fn new(query: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: None,
            query: query.into(),
            predicate,
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.query)
    }

    async fn run(&self, session: &mut dyn WarehouseSession) -> Result<i64, CheckFailureReason> {
        let rows = session
            .query(&self.query)
            .await
            .map_err(|err| CheckFailureReason::Query(err.to_string()))?;

        let value = first_scalar(&rows).ok_or(CheckFailureReason::EmptyResult)?;
        let number = value
            .as_i64()
            .ok_or_else(|| CheckFailureReason::NotAnInteger(value.clone()))?;

        if self.predicate.evaluate(number) {
            Ok(number)
        } else {
            Err(CheckFailureReason::Rejected(value.clone()))
        }
    }
}

fn first_scalar(rows: &[Row]) -> Option<&crate::Scalar> {
    rows.first().and_then(|row| row.first())
}

/// Read-only validation stage. Every check runs, whatever the outcome of
/// the others, and every failure is reported.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityGate {
    pub checks: Vec<QualityCheck>,
}

impl QualityGate {
    pub fn new(checks: Vec<QualityCheck>) -> Self {
        Self { checks }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.checks.is_empty() {
            return Err("quality gate has no checks".to_string());
        }
        if let Some(check) = self.checks.iter().find(|check| check.query.trim().is_empty()) {
            return Err(format!("check `{}` has an empty query", check.label()));
        }
        Ok(())
    }

    pub(crate) async fn execute(&self, warehouse: &dyn Warehouse) -> Result<(), StageError> {
        let mut session = open_session(warehouse, "quality_gate").await?;
        let mut failures = Vec::new();

        for check in &self.checks {
            info!(check = check.label(), "Running quality check");

            match check.run(session.as_mut()).await {
                Ok(value) => info!(
                    check = check.label(),
                    value,
                    predicate = %check.predicate,
                    "Quality check passed"
                ),
                Err(reason) => {
                    let failure = CheckFailure {
                        check: check.label().to_string(),
                        reason,
                    };
                    warn!(predicate = %check.predicate, "{failure}");
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        // Only query errors: the data was never looked at, so the gate can be retried.
        if failures.iter().all(CheckFailure::is_query_error) {
            let reasons = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LoadError::new(
                "quality_gate",
                crate::WarehouseError::Rejected(reasons),
            )
            .into());
        }

        Err(QualityFailure {
            failures,
            total: self.checks.len(),
        }
        .into())
    }
}
