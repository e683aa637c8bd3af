mod context;
mod credentials;
mod error;
pub mod stages;
mod template;
pub mod warehouse;

pub use context::RunContext;
pub use credentials::{AccessKeyPair, CredentialResolver, EnvCredentials, StaticCredentials};
pub use error::{
    CheckFailure, CheckFailureReason, ConfigError, LoadError, QualityFailure, StageError,
};
pub use stages::{
    BulkLoad, DimensionLoad, FactLoad, Predicate, QualityCheck, QualityGate, SqlStatement,
    StageKind, StageSpec,
};
pub use template::{PathTemplate, StorageLocation};
pub use warehouse::{PgWarehouse, Row, Scalar, Warehouse, WarehouseError, WarehouseSession};
