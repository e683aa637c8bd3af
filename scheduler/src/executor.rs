use chrono::{DateTime, Utc};
use db::dtos::{ExecStatus, PipelineExecEvent, StageExec, StageResult};
use db::ResultSink;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::{CredentialResolver, RunContext, StageSpec, Warehouse};

use crate::config::ExecutorConfig;
use crate::graph::PipelineGraph;
use crate::pipeline_run::PipelineRun;
use crate::retry::{run_stage, RetryPolicy};
use crate::RunError;

/// Runs a validated pipeline graph layer by layer.
///
/// Stages within a layer run concurrently on their own tasks, each with
/// its own warehouse session. A layer only starts once every stage of the
/// previous layer is terminal; after a failed layer, or once the run is
/// cancelled, every remaining stage is recorded as skipped.
pub struct PipelineExecutor {
    graph: Arc<PipelineGraph>,
    warehouse: Arc<dyn Warehouse>,
    credentials: Arc<dyn CredentialResolver>,
    config: ExecutorConfig,
    sinks: Vec<Arc<dyn ResultSink>>,
    vars: HashMap<String, String>,
    active_runs: AtomicUsize,
}

struct ActiveRun<'a>(&'a AtomicUsize);

impl<'a> ActiveRun<'a> {
    fn acquire(counter: &'a AtomicUsize, config: &ExecutorConfig) -> Result<Self, RunError> {
        let active = counter.fetch_add(1, Ordering::SeqCst);
        if active >= config.max_active_runs {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(RunError::AlreadyRunning {
                pipeline: config.pipeline_name.clone(),
                active,
            });
        }
        Ok(Self(counter))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PipelineExecutor {
    pub fn new(
        graph: PipelineGraph,
        warehouse: Arc<dyn Warehouse>,
        credentials: Arc<dyn CredentialResolver>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            warehouse,
            credentials,
            config,
            sinks: Vec::new(),
            vars: HashMap::new(),
            active_runs: AtomicUsize::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Extra template variables made available to every run.
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars.extend(vars);
        self
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn run(&self, logical_time: DateTime<Utc>) -> Result<PipelineRun, RunError> {
        self.run_with_cancellation(logical_time, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancellation(
        &self,
        logical_time: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<PipelineRun, RunError> {
        let _active = ActiveRun::acquire(&self.active_runs, &self.config)?;
        let credentials = self.resolve_credentials()?;

        let mut run = PipelineRun::new(&self.config.pipeline_name, logical_time);
        let ctx = RunContext::new(run.id, logical_time)
            .with_vars(self.vars.clone())
            .with_credentials(credentials);

        run.start();
        info!(
            run_id = %run.id,
            pipeline = %run.pipeline_name,
            logical_time = %logical_time,
            layers = self.graph.layer_count(),
            "Pipeline run started"
        );
        self.publish_exec(&run).await;

        let mut halted = false;
        let mut cancelled = false;

        for (index, layer) in self.graph.layer_stages().into_iter().enumerate() {
            if !halted && cancel.is_cancelled() {
                warn!(run_id = %run.id, layer = index, "Pipeline run cancelled");
                halted = true;
                cancelled = true;
            }

            if halted {
                for stage in layer {
                    self.record(&mut run, StageResult::skipped(&stage.id)).await;
                }
                continue;
            }

            info!(run_id = %run.id, layer = index, stages = layer.len(), "Starting layer");
            let results = self.run_layer(&layer, &ctx, &cancel).await;
            let layer_failed = results.iter().any(|result| !result.is_success());

            for result in results {
                self.record(&mut run, result).await;
            }

            if layer_failed {
                error!(run_id = %run.id, layer = index, "Layer failed, skipping downstream stages");
                halted = true;
            }
        }

        // A cancelled run reports `cancelled` even when a stage also failed.
        let status = if cancelled || (run.has_failures() && cancel.is_cancelled()) {
            ExecStatus::Cancelled
        } else if run.has_failures() {
            ExecStatus::Failed
        } else {
            ExecStatus::Succeeded
        };
        run.finish(status);

        info!(
            run_id = %run.id,
            pipeline = %run.pipeline_name,
            status = %status,
            stages = run.results.len(),
            "Pipeline run finished"
        );
        self.publish_exec(&run).await;

        Ok(run)
    }

    fn resolve_credentials(&self) -> Result<HashMap<String, worker::AccessKeyPair>, RunError> {
        let mut resolved = HashMap::new();
        for id in self.graph.stages().filter_map(StageSpec::credential_id) {
            if !resolved.contains_key(id) {
                resolved.insert(id.to_string(), self.credentials.resolve(id)?);
            }
        }
        Ok(resolved)
    }

    async fn run_layer(
        &self,
        stages: &[&StageSpec],
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> Vec<StageResult> {
        let handles = stages.iter().map(|&stage| {
            let stage = stage.clone();
            let policy = RetryPolicy::for_stage(&self.config, &stage);
            let warehouse = Arc::clone(&self.warehouse);
            let ctx = ctx.clone();
            let cancel = cancel.clone();

            tokio::spawn(
                async move { run_stage(&stage, warehouse.as_ref(), &ctx, policy, &cancel).await },
            )
        });

        join_all(handles)
            .await
            .into_iter()
            .zip(stages)
            .map(|(joined, stage)| {
                joined.unwrap_or_else(|err| {
                    error!(run_id = %ctx.run_id, stage = %stage.id, "Stage task failed: {err}");
                    let now = Utc::now();
                    StageResult::failed(
                        &stage.id,
                        1,
                        now,
                        now,
                        format!("stage task failed: {err}"),
                        Vec::new(),
                    )
                })
            })
            .collect()
    }

    async fn record(&self, run: &mut PipelineRun, result: StageResult) {
        let event = PipelineExecEvent::Stage(StageExec {
            pipeline_exec_id: run.id,
            result: result.clone(),
        });
        run.record(result);
        self.publish(&event).await;
    }

    async fn publish_exec(&self, run: &PipelineRun) {
        let event = PipelineExecEvent::Pipeline(run.to_exec(self.config.owner.as_deref()));
        self.publish(&event).await;
    }

    async fn publish(&self, event: &PipelineExecEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.publish(event).await {
                warn!(run_id = %event.pipeline_exec_id(), "Failed to publish exec event: {err}");
            }
        }
    }
}
