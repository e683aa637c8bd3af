use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    apply_statements, check_table_name, clear_statement, insert_statement, open_session,
};
use crate::warehouse::Warehouse;
use crate::StageError;

/// Refreshes a dimension table from a select, optionally truncating first.
///
/// With `truncate` the truncate and insert run as one unit of work, so a
/// failed insert leaves the previous contents in place. Without it the
/// select text is responsible for upsert semantics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DimensionLoad {
    pub table: String,
    pub select: String,
    #[serde(default)]
    pub truncate: bool,
}

impl DimensionLoad {
    pub(crate) fn validate(&self) -> Result<(), String> {
        check_table_name(&self.table)?;
        if self.select.trim().is_empty() {
            return Err("select statement is empty".to_string());
        }
        Ok(())
    }

    pub(crate) async fn execute(&self, warehouse: &dyn Warehouse) -> Result<(), StageError> {
        let mut statements = Vec::with_capacity(2);
        if self.truncate {
            statements.push(clear_statement(&self.table));
        }
        statements.push(insert_statement(&self.table, &self.select));

        info!(table = %self.table, truncate = self.truncate, "Loading dimension table");
        let mut session = open_session(warehouse, &self.table).await?;
        let rows = apply_statements(session.as_mut(), &self.table, &statements).await?;
        info!(table = %self.table, rows, "Finished loading dimension table");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::memory::MemoryWarehouse;
    use crate::warehouse::Scalar;

    const SELECT: &str = "SELECT DISTINCT artist_id, artist_name FROM staging_songs";

    fn rows(n: i64) -> Vec<Vec<Scalar>> {
        (0..n).map(|i| vec![Scalar::Int(i)]).collect()
    }

    fn dim(truncate: bool) -> DimensionLoad {
        DimensionLoad {
            table: "artists".into(),
            select: SELECT.into(),
            truncate,
        }
    }

    #[tokio::test]
    async fn truncate_insert_is_idempotent() {
        let warehouse = MemoryWarehouse::new().with_select(SELECT, rows(10));

        dim(true).execute(&warehouse).await.unwrap();
        let once = warehouse.row_count("artists");
        dim(true).execute(&warehouse).await.unwrap();

        assert_eq!(once, 10);
        assert_eq!(warehouse.row_count("artists"), once);
        assert_eq!(
            warehouse.statements()[..2],
            [
                "DELETE FROM artists".to_string(),
                format!("INSERT INTO artists\n{SELECT}")
            ]
        );
    }

    #[tokio::test]
    async fn without_truncate_rows_accumulate() {
        let warehouse = MemoryWarehouse::new().with_select(SELECT, rows(10));

        dim(false).execute(&warehouse).await.unwrap();
        dim(false).execute(&warehouse).await.unwrap();

        assert_eq!(warehouse.row_count("artists"), 20);
    }

    #[tokio::test]
    async fn failed_insert_keeps_previous_contents() {
        let warehouse = MemoryWarehouse::new()
            .with_table("artists", rows(7))
            .with_select(SELECT, rows(10))
            .fail_matching("INSERT INTO artists", 1);

        let err = dim(true).execute(&warehouse).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(warehouse.row_count("artists"), 7);
        assert_eq!(warehouse.open_sessions(), 0);
    }
}
