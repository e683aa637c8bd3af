pub mod dtos;
mod error;
mod pg_sink;
mod sink;

pub use error::SinkError;
pub use pg_sink::PgResultSink;
pub use sink::{MemorySink, ResultSink};

use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
