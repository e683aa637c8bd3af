#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize exec event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish exec event: {0}")]
    Publish(String),
}
