use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dtos::{PipelineExec, PipelineExecEvent, StageResult};
use crate::SinkError;

/// Append-only destination for run and stage outcomes.
///
/// Sinks are observability only: the executor logs a sink failure and
/// carries on with the run.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, event: &PipelineExecEvent) -> Result<(), SinkError>;
}

/// Keeps every event in memory, in publication order.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineExecEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PipelineExecEvent> {
        self.events.lock().await.clone()
    }

    pub async fn stage_results(&self, pipeline_exec_id: Uuid) -> Vec<StageResult> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                PipelineExecEvent::Stage(stage) if stage.pipeline_exec_id == pipeline_exec_id => {
                    Some(stage.result.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Latest known state of a run.
    pub async fn pipeline_exec(&self, pipeline_exec_id: Uuid) -> Option<PipelineExec> {
        self.events
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|event| match event {
                PipelineExecEvent::Pipeline(exec) if exec.id == pipeline_exec_id => {
                    Some(exec.clone())
                }
                _ => None,
            })
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn publish(&self, event: &PipelineExecEvent) -> Result<(), SinkError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
