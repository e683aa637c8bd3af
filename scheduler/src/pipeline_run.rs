use chrono::{DateTime, Utc};
use db::dtos::{ExecStatus, PipelineExec, StageResult, StageStatus};
use uuid::Uuid;

/// One execution of a pipeline, owned by the executor until it finishes.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_name: String,
    pub logical_time: DateTime<Utc>,
    pub status: ExecStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage outcomes in layer order.
    pub results: Vec<StageResult>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, logical_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            logical_time,
            status: ExecStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            results: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = ExecStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self, status: ExecStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_failures(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.status == StageStatus::Failed)
    }

    pub fn result(&self, stage_id: &str) -> Option<&StageResult> {
        self.results.iter().find(|result| result.stage_id == stage_id)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.results
            .iter()
            .filter(|result| result.status == StageStatus::Failed)
    }

    pub fn to_exec(&self, owner: Option<&str>) -> PipelineExec {
        PipelineExec {
            id: self.id,
            pipeline_name: self.pipeline_name.clone(),
            logical_time: self.logical_time,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            owner: owner.map(str::to_string),
        }
    }
}
