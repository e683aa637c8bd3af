//! Stage operators: one tagged variant per kind of pipeline work, all
//! dispatched through [`StageSpec::execute`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::warehouse::{Warehouse, WarehouseSession};
use crate::{ConfigError, LoadError, RunContext, StageError};

mod bulk_load;
mod dimension_load;
mod fact_load;
mod predicate;
mod quality_gate;

pub use bulk_load::BulkLoad;
pub use dimension_load::DimensionLoad;
pub use fact_load::FactLoad;
pub use predicate::{CustomPredicate, Predicate};
pub use quality_gate::{QualityCheck, QualityGate};

/// Runs one opaque statement verbatim, e.g. schema bootstrap DDL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    BulkLoad(BulkLoad),
    FactLoad(FactLoad),
    DimensionLoad(DimensionLoad),
    QualityGate(QualityGate),
    Sql(SqlStatement),
    /// Succeeds without touching the warehouse; marks pipeline entry/exit.
    Noop,
}

/// Static configuration of one stage, shared read-only by every run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    /// Overrides the executor's default retry count for this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(flatten)]
    pub kind: StageKind,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, kind: StageKind) -> Self {
        Self {
            id: id.into(),
            retries: None,
            kind,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StageKind::BulkLoad(_) => "bulk_load",
            StageKind::FactLoad(_) => "fact_load",
            StageKind::DimensionLoad(_) => "dimension_load",
            StageKind::QualityGate(_) => "quality_gate",
            StageKind::Sql(_) => "sql",
            StageKind::Noop => "noop",
        }
    }

    /// Credential identifier this stage needs resolved before a run.
    pub fn credential_id(&self) -> Option<&str> {
        match &self.kind {
            StageKind::BulkLoad(bulk) => Some(bulk.credentials.as_str()),
            _ => None,
        }
    }

    /// Static checks done once when the pipeline is defined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStage {
            stage: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("stage id is empty"));
        }

        match &self.kind {
            StageKind::BulkLoad(bulk) => bulk.validate().map_err(|reason| invalid(&reason)),
            StageKind::FactLoad(fact) => fact.validate().map_err(|reason| invalid(&reason)),
            StageKind::DimensionLoad(dim) => dim.validate().map_err(|reason| invalid(&reason)),
            StageKind::QualityGate(gate) => gate.validate().map_err(|reason| invalid(&reason)),
            StageKind::Sql(statement) if statement.sql.trim().is_empty() => {
                Err(invalid("sql statement is empty"))
            }
            StageKind::Sql(_) | StageKind::Noop => Ok(()),
        }
    }

    /// Runs one attempt of this stage.
    pub async fn execute(
        &self,
        warehouse: &dyn Warehouse,
        ctx: &RunContext,
    ) -> Result<(), StageError> {
        match &self.kind {
            StageKind::BulkLoad(bulk) => bulk.execute(warehouse, ctx).await,
            StageKind::FactLoad(fact) => fact.execute(warehouse).await,
            StageKind::DimensionLoad(dim) => dim.execute(warehouse).await,
            StageKind::QualityGate(gate) => gate.execute(warehouse).await,
            StageKind::Sql(statement) => {
                let mut session = open_session(warehouse, &self.id).await?;
                debug!(stage = %self.id, "{}", statement.sql);
                let rows = session
                    .run(&statement.sql)
                    .await
                    .map_err(|source| LoadError::new(&self.id, source))?;
                info!(stage = %self.id, rows, "Statement finished");
                Ok(())
            }
            StageKind::Noop => Ok(()),
        }
    }
}

pub(crate) async fn open_session(
    warehouse: &dyn Warehouse,
    target: &str,
) -> Result<Box<dyn WarehouseSession>, LoadError> {
    warehouse
        .session()
        .await
        .map_err(|source| LoadError::new(target, source))
}

/// Runs a single statement, or several as one unit of work.
pub(crate) async fn apply_statements(
    session: &mut dyn WarehouseSession,
    target: &str,
    statements: &[String],
) -> Result<u64, LoadError> {
    let result = match statements {
        [statement] => session.run(statement).await,
        _ => session.run_atomic(statements).await,
    };

    result.map_err(|source| LoadError::new(target, source))
}

/// Empties `table` inside the caller's transaction. Redshift commits on
/// `TRUNCATE`, so a truncate-then-load unit has to use `DELETE`.
pub(crate) fn clear_statement(table: &str) -> String {
    format!("DELETE FROM {table}")
}

pub(crate) fn insert_statement(table: &str, select: &str) -> String {
    format!("INSERT INTO {table}\n{}", select.trim().trim_end_matches(';'))
}

/// Quotes a value as a SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn check_table_name(table: &str) -> Result<(), String> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '"');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid table name `{table}`"))
    }
}
