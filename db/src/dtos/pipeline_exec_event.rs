use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PipelineExec, StageResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExec {
    #[serde(alias = "pipeline_exec_id")]
    pub pipeline_exec_id: Uuid,
    #[serde(flatten)]
    pub result: StageResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PipelineExecEvent {
    Pipeline(PipelineExec),
    Stage(StageExec),
}

impl PipelineExecEvent {
    pub fn pipeline_exec_id(&self) -> Uuid {
        match self {
            Self::Pipeline(exec) => exec.id,
            Self::Stage(stage) => stage.pipeline_exec_id,
        }
    }
}
