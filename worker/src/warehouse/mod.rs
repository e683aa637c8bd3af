use async_trait::async_trait;
use std::fmt;

#[cfg(any(test, feature = "testing"))]
pub mod memory;
mod postgres;

pub use postgres::PgWarehouse;

/// A single value of a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// A value whose column type has no mapping; holds the type name.
    Unsupported(String),
}

impl Scalar {
    /// Integer view used by quality checks. Text and whole floats are
    /// accepted since some warehouses return counts as NUMERIC or VARCHAR.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(value) => value.trim().parse().ok(),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::Unsupported(type_name) => write!(f, "<{type_name}>"),
        }
    }
}

pub type Row = Vec<Scalar>;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Source of warehouse sessions.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Acquires a session owned by one stage execution. The session is
    /// released when dropped, whichever way the stage exits.
    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError>;
}

#[async_trait]
pub trait WarehouseSession: Send {
    /// Executes a statement, returning the affected row count.
    async fn run(&mut self, sql: &str) -> Result<u64, WarehouseError>;

    /// Executes a query, returning its rows in order.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, WarehouseError>;

    /// Executes statements as one unit of work: either all of them apply
    /// or none does.
    async fn run_atomic(&mut self, statements: &[String]) -> Result<u64, WarehouseError>;
}
