use async_trait::async_trait;
use db::dtos::PipelineExecEvent;
use db::{ResultSink, SinkError};
use tracing::debug;

pub const EXEC_EVENTS_SUBJECT: &str = "pipeline.exec.events";

/// Publishes exec events as JSON on a NATS subject.
pub struct NatsEventSink {
    client: async_nats::Client,
    subject: String,
}

impl NatsEventSink {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            subject: EXEC_EVENTS_SUBJECT.to_string(),
        }
    }
}

#[async_trait]
impl ResultSink for NatsEventSink {
    async fn publish(&self, event: &PipelineExecEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(event)?.into_bytes();

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|error| SinkError::Publish(error.to_string()))?;

        debug!(run_id = %event.pipeline_exec_id(), subject = %self.subject, "Published exec event");
        Ok(())
    }
}
