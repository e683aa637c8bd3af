use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExecStatus;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExec {
    pub id: Uuid,
    #[serde(alias = "pipeline_name")]
    pub pipeline_name: String,
    #[serde(alias = "logical_time")]
    pub logical_time: DateTime<Utc>,
    pub status: ExecStatus,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "started_at")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(alias = "finished_at")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}
