mod common;

use async_trait::async_trait;
use common::*;
use db::dtos::{ExecStatus, PipelineExecEvent, StageStatus};
use db::{MemorySink, ResultSink, SinkError};
use scheduler::{ExecutorConfig, PipelineExecutor, PipelineGraph, RunError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use worker::warehouse::memory::MemoryWarehouse;
use worker::{ConfigError, Scalar, StaticCredentials};

fn executor(warehouse: &MemoryWarehouse) -> PipelineExecutor {
    PipelineExecutor::new(
        sparkify_graph(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        config(),
    )
}

fn statuses(run: &scheduler::PipelineRun) -> Vec<(&str, StageStatus)> {
    run.results
        .iter()
        .map(|result| (result.stage_id.as_str(), result.status))
        .collect()
}

#[tokio::test]
async fn end_to_end_run_succeeds() {
    let warehouse = sparkify_warehouse();
    let sink = Arc::new(MemorySink::new());
    let executor = executor(&warehouse).with_sink(sink.clone());

    let run = executor.run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Succeeded);
    assert_eq!(run.results.len(), 7);
    assert!(run.results.iter().all(|result| result.is_success() && result.attempts == 1));
    assert_eq!(
        run.results.iter().map(|r| r.stage_id.as_str()).collect::<Vec<_>>(),
        [
            "Stage_events",
            "Stage_songs",
            "Load_songplays_fact_table",
            "Load_user_dim_table",
            "Load_song_dim_table",
            "Load_artist_dim_table",
            "Run_data_quality_checks",
        ]
    );

    assert_eq!(warehouse.row_count("staging_events"), 20);
    assert_eq!(warehouse.row_count("staging_songs"), 10);
    assert_eq!(warehouse.row_count("songplays"), 8);
    assert_eq!(warehouse.row_count("users"), 5);
    assert_eq!(warehouse.row_count("artists"), 7);
    assert_eq!(warehouse.open_sessions(), 0);

    let events = sink.events().await;
    assert_eq!(events.len(), 9);
    assert!(matches!(
        events.first(),
        Some(PipelineExecEvent::Pipeline(exec)) if exec.status == ExecStatus::Running
    ));
    let latest = sink.pipeline_exec(run.id).await.unwrap();
    assert_eq!(latest.status, ExecStatus::Succeeded);
    assert_eq!(latest.owner.as_deref(), Some("udacity"));
    assert_eq!(sink.stage_results(run.id).await, run.results);
}

#[tokio::test]
async fn bulk_copy_uses_resolved_location_and_credentials() {
    let warehouse = sparkify_warehouse();
    executor(&warehouse).run(logical_time()).await.unwrap();

    let copy = warehouse
        .statements()
        .into_iter()
        .find(|sql| sql.starts_with("COPY staging_events"))
        .unwrap();
    assert!(copy.contains("FROM 's3://udacity-dend/log_data/2018/11'"));
    assert!(copy.contains("ACCESS_KEY_ID 'AKIAEXAMPLE'"));
    assert!(copy.contains("REGION 'us-west-2'"));
}

#[tokio::test]
async fn sibling_failure_skips_downstream_layers() {
    let warehouse = sparkify_warehouse().fail_matching("COPY staging_songs", 3);
    let run = executor(&warehouse).run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Failed);
    assert_eq!(
        statuses(&run),
        [
            ("Stage_events", StageStatus::Success),
            ("Stage_songs", StageStatus::Failed),
            ("Load_songplays_fact_table", StageStatus::Skipped),
            ("Load_user_dim_table", StageStatus::Skipped),
            ("Load_song_dim_table", StageStatus::Skipped),
            ("Load_artist_dim_table", StageStatus::Skipped),
            ("Run_data_quality_checks", StageStatus::Skipped),
        ]
    );

    let failed = run.result("Stage_songs").unwrap();
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.as_deref().unwrap().starts_with("LoadError"));

    let skipped = run.result("Run_data_quality_checks").unwrap();
    assert_eq!(skipped.attempts, 0);
    assert!(skipped.started_at.is_none());

    assert!(!warehouse
        .statements()
        .iter()
        .any(|sql| sql.starts_with("INSERT INTO songplays")));
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn transient_failure_is_retried_without_double_apply() {
    let warehouse = sparkify_warehouse().fail_matching("INSERT INTO songplays", 1);
    let run = executor(&warehouse).run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Succeeded);
    assert_eq!(run.result("Load_songplays_fact_table").unwrap().attempts, 2);
    assert_eq!(warehouse.row_count("songplays"), 8);
}

#[tokio::test]
async fn stage_retry_override_is_honoured() {
    let mut builder = PipelineGraph::builder();
    builder.add_node(
        bulk("Stage_events", "staging_events", "log_data/{{year}}/{{month}}", true)
            .with_retries(0),
    );
    let warehouse = sparkify_warehouse().fail_matching("COPY staging_events", 1);
    let executor = PipelineExecutor::new(
        builder.build().unwrap(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        config(),
    );

    let run = executor.run(logical_time()).await.unwrap();
    assert_eq!(run.status, ExecStatus::Failed);
    assert_eq!(run.result("Stage_events").unwrap().attempts, 1);
}

#[tokio::test]
async fn quality_failure_is_not_retried() {
    let warehouse = sparkify_warehouse().on_query(NULL_USERS_CHECK, vec![vec![Scalar::Int(1)]]);
    let run = executor(&warehouse).run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Failed);
    let gate = run.result("Run_data_quality_checks").unwrap();
    assert_eq!(gate.status, StageStatus::Failed);
    assert_eq!(gate.attempts, 1);
    assert_eq!(gate.details.len(), 1);
    assert!(gate.details[0].contains("got 1"));
    assert!(gate.error.as_deref().unwrap().starts_with("QualityError"));
}

#[tokio::test]
async fn group_member_failure_fails_the_layer_only() {
    let warehouse = sparkify_warehouse().fail_matching("INSERT INTO songs", 3);
    let run = executor(&warehouse).run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Failed);
    assert_eq!(run.result("Load_user_dim_table").unwrap().status, StageStatus::Success);
    assert_eq!(run.result("Load_song_dim_table").unwrap().status, StageStatus::Failed);
    assert_eq!(run.result("Load_artist_dim_table").unwrap().status, StageStatus::Success);
    assert_eq!(
        run.result("Run_data_quality_checks").unwrap().status,
        StageStatus::Skipped
    );
}

#[tokio::test]
async fn attempt_timeout_consumes_a_retry() {
    let warehouse =
        sparkify_warehouse().delay_matching("COPY staging_events", Duration::from_millis(500));
    let config = config().with_attempt_timeout(Duration::from_millis(20));
    let executor = PipelineExecutor::new(
        sparkify_graph(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        ExecutorConfig { retries: 1, ..config },
    );

    let run = executor.run(logical_time()).await.unwrap();

    let timed_out = run.result("Stage_events").unwrap();
    assert_eq!(timed_out.status, StageStatus::Failed);
    assert_eq!(timed_out.attempts, 2);
    assert!(timed_out.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(run.result("Stage_songs").unwrap().status, StageStatus::Success);
    assert_eq!(run.status, ExecStatus::Failed);
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn missing_credentials_prevent_the_run() {
    let warehouse = sparkify_warehouse();
    let sink = Arc::new(MemorySink::new());
    let executor = PipelineExecutor::new(
        sparkify_graph(),
        Arc::new(warehouse.clone()),
        Arc::new(StaticCredentials::new()),
        config(),
    )
    .with_sink(sink.clone());

    let err = executor.run(logical_time()).await.unwrap_err();

    assert!(matches!(
        err,
        RunError::Config(ConfigError::MissingCredential(ref id)) if id == "aws_credentials"
    ));
    assert!(sink.events().await.is_empty());
    assert_eq!(warehouse.sessions_opened(), 0);
}

#[tokio::test]
async fn cancelled_before_start_skips_everything() {
    let warehouse = sparkify_warehouse();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = executor(&warehouse)
        .run_with_cancellation(logical_time(), cancel)
        .await
        .unwrap();

    assert_eq!(run.status, ExecStatus::Cancelled);
    assert_eq!(run.results.len(), 7);
    assert!(run
        .results
        .iter()
        .all(|result| result.status == StageStatus::Skipped));
    assert_eq!(warehouse.sessions_opened(), 0);
}

#[tokio::test]
async fn cancellation_lets_the_current_layer_finish() {
    let warehouse =
        sparkify_warehouse().delay_matching("COPY staging_songs", Duration::from_millis(100));
    let executor = executor(&warehouse);
    let cancel = CancellationToken::new();

    let (run, ()) = tokio::join!(
        executor.run_with_cancellation(logical_time(), cancel.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    );
    let run = run.unwrap();

    assert_eq!(run.status, ExecStatus::Cancelled);
    assert_eq!(run.result("Stage_events").unwrap().status, StageStatus::Success);
    assert_eq!(run.result("Stage_songs").unwrap().status, StageStatus::Success);
    assert_eq!(
        run.result("Load_songplays_fact_table").unwrap().status,
        StageStatus::Skipped
    );
    assert_eq!(warehouse.row_count("staging_songs"), 10);
}

#[tokio::test]
async fn cancelled_retry_marks_the_run_cancelled() {
    let warehouse = sparkify_warehouse().fail_matching("COPY staging_songs", 10);
    let executor = PipelineExecutor::new(
        sparkify_graph(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        config().with_retry_delay(Duration::from_secs(60)),
    );
    let cancel = CancellationToken::new();

    let (run, ()) = tokio::join!(
        executor.run_with_cancellation(logical_time(), cancel.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    );
    let run = run.unwrap();

    assert_eq!(run.status, ExecStatus::Cancelled);
    let songs = run.result("Stage_songs").unwrap();
    assert_eq!(songs.status, StageStatus::Failed);
    assert_eq!(songs.attempts, 1);
    assert!(songs.error.as_deref().unwrap().ends_with("(retry cancelled)"));
    assert_eq!(run.result("Stage_events").unwrap().status, StageStatus::Success);
    assert_eq!(
        run.result("Load_songplays_fact_table").unwrap().status,
        StageStatus::Skipped
    );
}

#[tokio::test]
async fn max_active_runs_is_enforced() {
    let warehouse =
        sparkify_warehouse().delay_matching("COPY staging_songs", Duration::from_millis(100));
    let executor = executor(&warehouse);

    let (first, second) = tokio::join!(executor.run(logical_time()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.run(logical_time()).await
    });

    assert_eq!(first.unwrap().status, ExecStatus::Succeeded);
    assert!(matches!(
        second,
        Err(RunError::AlreadyRunning { ref pipeline, active: 1 }) if pipeline == "sparkify"
    ));

    let third = executor.run(logical_time()).await.unwrap();
    assert_eq!(third.status, ExecStatus::Succeeded);
}

#[tokio::test]
async fn extra_variables_reach_key_templates() {
    let mut builder = PipelineGraph::builder();
    builder.add_node(bulk("Stage_songs", "staging_songs", "song_data/{{partition}}", false));
    let warehouse = MemoryWarehouse::new().with_object("s3://udacity-dend/song_data/A", rows(3));
    let executor = PipelineExecutor::new(
        builder.build().unwrap(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        config(),
    )
    .with_vars(HashMap::from([("partition".to_string(), "A".to_string())]));

    let run = executor.run(logical_time()).await.unwrap();
    assert_eq!(run.status, ExecStatus::Succeeded);
    assert_eq!(warehouse.row_count("staging_songs"), 3);
}

#[tokio::test]
async fn undefined_template_variable_fails_without_retry() {
    let mut builder = PipelineGraph::builder();
    builder.add_node(bulk("Stage_songs", "staging_songs", "song_data/{{partition}}", false));
    let warehouse = sparkify_warehouse();
    let executor = PipelineExecutor::new(
        builder.build().unwrap(),
        Arc::new(warehouse.clone()),
        Arc::new(credentials()),
        config(),
    );

    let run = executor.run(logical_time()).await.unwrap();
    let result = run.result("Stage_songs").unwrap();
    assert_eq!(result.status, StageStatus::Failed);
    assert_eq!(result.attempts, 1);
    assert!(result.error.as_deref().unwrap().starts_with("ConfigError"));
}

struct BrokenSink;

#[async_trait]
impl ResultSink for BrokenSink {
    async fn publish(&self, _event: &PipelineExecEvent) -> Result<(), SinkError> {
        Err(SinkError::Publish("connection refused".into()))
    }
}

#[tokio::test]
async fn sink_failures_do_not_affect_the_run() {
    let warehouse = sparkify_warehouse();
    let sink = Arc::new(MemorySink::new());
    let executor = executor(&warehouse)
        .with_sink(Arc::new(BrokenSink))
        .with_sink(sink.clone());

    let run = executor.run(logical_time()).await.unwrap();

    assert_eq!(run.status, ExecStatus::Succeeded);
    assert_eq!(sink.stage_results(run.id).await.len(), 7);
}
