pub mod config;
pub mod definition;
mod error;
pub mod events;
mod executor;
pub mod graph;
pub mod logging;
mod pipeline_run;
mod retry;

pub use config::{ExecutorConfig, Notifications};
pub use definition::{Defaults, EdgeDefinition, PipelineDefinition};
pub use error::{DefinitionError, GraphError, RunError, SettingsError};
pub use events::NatsEventSink;
pub use executor::PipelineExecutor;
pub use graph::{PipelineGraph, PipelineGraphBuilder, PipelineNode, StageGroup};
pub use pipeline_run::PipelineRun;
pub use retry::{run_stage, RetryPolicy};
