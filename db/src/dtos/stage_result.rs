use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StageStatus;

/// Outcome of one stage within one run.
///
/// Built once the stage reaches a terminal status and never mutated
/// afterwards. Skipped stages carry no timestamps and zero attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// One entry per failing quality check, empty for every other stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl StageResult {
    pub fn success(
        stage_id: impl Into<String>,
        attempts: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Success,
            attempts,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            error: None,
            details: Vec::new(),
        }
    }

    pub fn failed(
        stage_id: impl Into<String>,
        attempts: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: impl Into<String>,
        details: Vec<String>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Failed,
            attempts,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            error: Some(error.into()),
            details,
        }
    }

    pub fn skipped(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Skipped,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
            details: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}
