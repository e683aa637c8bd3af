use worker::ConfigError;

/// Structural problems in a pipeline definition. The pipeline cannot be
/// constructed while any of these hold.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("GraphError: cycle detected at `{0}`")]
    CycleDetected(String),

    #[error("GraphError: unknown node `{0}`")]
    UnknownNode(String),

    #[error("GraphError: disconnected pipeline ({sources} entry nodes, {sinks} exit nodes)")]
    Disconnected { sources: usize, sinks: usize },

    #[error("GraphError: duplicate node `{0}`")]
    DuplicateNode(String),

    #[error("GraphError: pipeline has no nodes")]
    Empty,

    #[error("GraphError: stage group `{0}` has no stages")]
    EmptyGroup(String),

    #[error("GraphError: {0}")]
    InvalidStage(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read pipeline definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Reasons a run could not start.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("ConfigError: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline `{pipeline}` already has {active} active runs")]
    AlreadyRunning { pipeline: String, active: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: String, value: String },
}
