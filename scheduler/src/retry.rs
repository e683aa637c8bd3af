//! Per-stage attempt loop: timeout, bounded retries, fixed delay.

use chrono::{DateTime, Utc};
use db::dtos::StageResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::{RunContext, StageError, StageSpec, Warehouse};

use crate::config::ExecutorConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub attempt_timeout: Option<Duration>,
    pub notify_on_retry: bool,
    pub notify_on_failure: bool,
}

impl RetryPolicy {
    pub fn for_stage(config: &ExecutorConfig, stage: &StageSpec) -> Self {
        Self {
            max_retries: stage.retries.unwrap_or(config.retries),
            delay: config.retry_delay,
            attempt_timeout: config.attempt_timeout,
            notify_on_retry: config.notifications.on_retry,
            notify_on_failure: config.notifications.on_failure,
        }
    }
}

async fn attempt(
    stage: &StageSpec,
    warehouse: &dyn Warehouse,
    ctx: &RunContext,
    timeout: Option<Duration>,
) -> Result<(), StageError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, stage.execute(warehouse, ctx))
            .await
            .unwrap_or(Err(StageError::Timeout(limit))),
        None => stage.execute(warehouse, ctx).await,
    }
}

/// Runs `stage` until it succeeds, fails with a non-retryable error or
/// exhausts its retries. Cancellation only cuts short the wait between
/// attempts; a running attempt is never interrupted.
pub async fn run_stage(
    stage: &StageSpec,
    warehouse: &dyn Warehouse,
    ctx: &RunContext,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> StageResult {
    let started_at = Utc::now();
    let max_attempts = policy.max_retries + 1;
    let mut attempts = 0;

    info!(run_id = %ctx.run_id, stage = %stage.id, kind = stage.kind_name(), "Stage started");

    loop {
        attempts += 1;

        let err = match attempt(stage, warehouse, ctx, policy.attempt_timeout).await {
            Ok(()) => {
                info!(run_id = %ctx.run_id, stage = %stage.id, attempts, "Stage succeeded");
                return StageResult::success(&stage.id, attempts, started_at, Utc::now());
            }
            Err(err) => err,
        };

        let exhausted = attempts >= max_attempts;
        if err.is_retryable() && !exhausted && cancel.is_cancelled() {
            return retry_cancelled(stage, ctx, attempts, started_at, &err);
        }
        if !err.is_retryable() || exhausted {
            error!(
                run_id = %ctx.run_id,
                stage = %stage.id,
                attempts,
                retryable = err.is_retryable(),
                error = %err,
                "Stage failed"
            );
            if policy.notify_on_failure {
                warn!(target: "notifications", run_id = %ctx.run_id, stage = %stage.id, error = %err, "Stage failure notification");
            }
            return StageResult::failed(
                &stage.id,
                attempts,
                started_at,
                Utc::now(),
                err.to_string(),
                err.details(),
            );
        }

        warn!(
            run_id = %ctx.run_id,
            stage = %stage.id,
            attempt = attempts,
            max_retries = policy.max_retries,
            delay_ms = policy.delay.as_millis() as u64,
            error = %err,
            "Retrying stage"
        );
        if policy.notify_on_retry {
            warn!(target: "notifications", run_id = %ctx.run_id, stage = %stage.id, attempt = attempts, "Stage retry notification");
        }

        tokio::select! {
            () = tokio::time::sleep(policy.delay) => {}
            () = cancel.cancelled() => {
                return retry_cancelled(stage, ctx, attempts, started_at, &err);
            }
        }
    }
}

fn retry_cancelled(
    stage: &StageSpec,
    ctx: &RunContext,
    attempts: u32,
    started_at: DateTime<Utc>,
    err: &StageError,
) -> StageResult {
    warn!(run_id = %ctx.run_id, stage = %stage.id, attempts, error = %err, "Run cancelled, not retrying");
    StageResult::failed(
        &stage.id,
        attempts,
        started_at,
        Utc::now(),
        format!("{err} (retry cancelled)"),
        err.details(),
    )
}
