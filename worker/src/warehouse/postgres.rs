use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, Connection, Pool, Postgres, Row as _, TypeInfo};
use tracing::debug;

use super::{Row, Scalar, Warehouse, WarehouseError, WarehouseSession};

/// Postgres-protocol warehouse (Postgres, Redshift) backed by a connection pool.
#[derive(Clone)]
pub struct PgWarehouse {
    db: Pool<Postgres>,
}

impl PgWarehouse {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let conn = self.db.acquire().await?;
        Ok(Box::new(PgSession(conn)))
    }
}

/// Pooled connection; returned to the pool on drop.
pub struct PgSession(PoolConnection<Postgres>);

#[async_trait]
impl WarehouseSession for PgSession {
    async fn run(&mut self, sql: &str) -> Result<u64, WarehouseError> {
        let result = sqlx::query(sql).execute(&mut *self.0).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let rows = sqlx::query(sql).fetch_all(&mut *self.0).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn run_atomic(&mut self, statements: &[String]) -> Result<u64, WarehouseError> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.0.begin().await?;
        let mut affected = 0;

        for statement in statements {
            affected += sqlx::query(statement).execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!("Committed {} statements", statements.len());
        Ok(affected)
    }
}

fn decode_row(row: &PgRow) -> Result<Row, WarehouseError> {
    row.columns()
        .iter()
        .map(|column| decode_column(row, column).map_err(WarehouseError::from))
        .collect()
}

fn decode_column(row: &PgRow, column: &PgColumn) -> Result<Scalar, sqlx::Error> {
    let index = column.ordinal();

    let value = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Scalar::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|value| Scalar::Int(value.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|value| Scalar::Int(value.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Scalar::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|value| Scalar::Float(value.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Scalar::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(Scalar::Text)
        }
        other => Some(Scalar::Unsupported(other.to_string())),
    };

    Ok(value.unwrap_or(Scalar::Null))
}
