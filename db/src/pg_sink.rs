use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::dtos::{PipelineExec, PipelineExecEvent, StageExec};
use crate::{ResultSink, SinkError};

/// Run history in Postgres, in the `pipeline_exec` and `stage_result` tables.
#[derive(Clone)]
pub struct PgResultSink {
    db: Pool<Postgres>,
}

impl PgResultSink {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    async fn upsert_exec(&self, exec: &PipelineExec) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO pipeline_exec \
                (id, pipeline_name, logical_time, status, owner, created_at, started_at, finished_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                status = EXCLUDED.status, \
                started_at = EXCLUDED.started_at, \
                finished_at = EXCLUDED.finished_at",
        )
        .bind(exec.id)
        .bind(&exec.pipeline_name)
        .bind(exec.logical_time)
        .bind(exec.status)
        .bind(&exec.owner)
        .bind(exec.created_at)
        .bind(exec.started_at)
        .bind(exec.finished_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn insert_stage(&self, stage: &StageExec) -> Result<(), SinkError> {
        let result = &stage.result;

        // Results are append-only: a second write for the same stage is dropped.
        sqlx::query(
            "INSERT INTO stage_result \
                (pipeline_exec_id, stage_id, status, attempts, started_at, finished_at, error, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (pipeline_exec_id, stage_id) DO NOTHING",
        )
        .bind(stage.pipeline_exec_id)
        .bind(&result.stage_id)
        .bind(result.status)
        .bind(i32::try_from(result.attempts).unwrap_or(i32::MAX))
        .bind(result.started_at)
        .bind(result.finished_at)
        .bind(&result.error)
        .bind(Json(&result.details))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ResultSink for PgResultSink {
    async fn publish(&self, event: &PipelineExecEvent) -> Result<(), SinkError> {
        match event {
            PipelineExecEvent::Pipeline(exec) => self.upsert_exec(exec).await?,
            PipelineExecEvent::Stage(stage) => self.insert_stage(stage).await?,
        }

        debug!(
            "Recorded exec event for pipeline_exec_id {}",
            event.pipeline_exec_id()
        );
        Ok(())
    }
}
