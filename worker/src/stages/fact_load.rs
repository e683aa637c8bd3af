use serde::{Deserialize, Serialize};
use tracing::info;

use super::{apply_statements, check_table_name, insert_statement, open_session};
use crate::warehouse::Warehouse;
use crate::StageError;

/// Appends derived rows into a fact table.
///
/// Facts are append-only, there is no truncate path. Making a retried
/// insert safe is up to the caller, either through the select text or a
/// `pre_clear` statement run in the same unit of work as the insert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactLoad {
    pub table: String,
    pub select: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_clear: Option<String>,
}

impl FactLoad {
    pub(crate) fn validate(&self) -> Result<(), String> {
        check_table_name(&self.table)?;
        if self.select.trim().is_empty() {
            return Err("select statement is empty".to_string());
        }
        Ok(())
    }

    pub(crate) async fn execute(&self, warehouse: &dyn Warehouse) -> Result<(), StageError> {
        let mut statements = Vec::with_capacity(2);
        if let Some(pre_clear) = &self.pre_clear {
            statements.push(pre_clear.clone());
        }
        statements.push(insert_statement(&self.table, &self.select));

        info!(table = %self.table, "Loading fact table");
        let mut session = open_session(warehouse, &self.table).await?;
        let rows = apply_statements(session.as_mut(), &self.table, &statements).await?;
        info!(table = %self.table, rows, "Finished loading fact table");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::memory::MemoryWarehouse;
    use crate::warehouse::Scalar;

    const SELECT: &str = "SELECT md5(sessionid || start_time) songplay_id, start_time, userid FROM staging_events WHERE page = 'NextSong'";

    fn rows(n: i64) -> Vec<Vec<Scalar>> {
        (0..n).map(|i| vec![Scalar::Int(i)]).collect()
    }

    #[tokio::test]
    async fn appends_on_every_execution() {
        let warehouse = MemoryWarehouse::new().with_select(SELECT, rows(4));
        let fact = FactLoad {
            table: "songplays".into(),
            select: format!("{SELECT};"),
            pre_clear: None,
        };

        fact.execute(&warehouse).await.unwrap();
        fact.execute(&warehouse).await.unwrap();

        assert_eq!(warehouse.row_count("songplays"), 8);
        assert_eq!(
            warehouse.statements()[0],
            format!("INSERT INTO songplays\n{SELECT}")
        );
    }

    #[tokio::test]
    async fn pre_clear_makes_reruns_idempotent() {
        let warehouse = MemoryWarehouse::new().with_select(SELECT, rows(4));
        let fact = FactLoad {
            table: "songplays".into(),
            select: SELECT.into(),
            pre_clear: Some("DELETE FROM songplays".into()),
        };

        fact.execute(&warehouse).await.unwrap();
        fact.execute(&warehouse).await.unwrap();

        assert_eq!(warehouse.row_count("songplays"), 4);
    }

    #[tokio::test]
    async fn insert_failure_is_retryable_load_error() {
        let warehouse = MemoryWarehouse::new();
        let fact = FactLoad {
            table: "songplays".into(),
            select: SELECT.into(),
            pre_clear: None,
        };

        let err = fact.execute(&warehouse).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("LoadError: load into `songplays` failed"));
    }
}
