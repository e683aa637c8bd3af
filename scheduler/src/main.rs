use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use clap::Parser;
use db::{PgResultSink, MIGRATOR};
use dotenvy::dotenv;
use scheduler::{ExecutorConfig, NatsEventSink, PipelineDefinition, PipelineExecutor};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::{EnvCredentials, PgWarehouse};

/// Runs one pipeline execution against the warehouse.
#[derive(Parser, Debug)]
#[command(name = "scheduler", version, about, long_about = None)]
struct Cli {
    /// Logical time of the run (RFC 3339); defaults to the current hour
    #[arg(value_parser = parse_logical_time)]
    logical_time: Option<DateTime<Utc>>,

    /// Pipeline definition file
    #[arg(long, env = "PIPELINE_DEFINITION")]
    definition: PathBuf,

    /// Warehouse connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Warehouse pool size
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Postgres database for run history
    #[arg(long, env = "RESULTS_DATABASE_URL")]
    results_database_url: Option<String>,

    /// NATS server for exec events
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,
}

fn parse_logical_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[tokio::main]
async fn main() -> Result<(), async_nats::Error> {
    dotenv().ok();
    let cli = Cli::parse();
    scheduler::logging::init()?;

    let definition = PipelineDefinition::from_path(&cli.definition)?;
    let graph = definition.to_graph()?;
    let config = ExecutorConfig::for_definition(&definition).with_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await?;

    let mut executor = PipelineExecutor::new(
        graph,
        Arc::new(PgWarehouse::new(pool)),
        Arc::new(EnvCredentials),
        config,
    );

    if let Some(results_url) = &cli.results_database_url {
        let results_db = PgPoolOptions::new().connect(results_url).await?;
        MIGRATOR.run(&results_db).await?;
        executor = executor.with_sink(Arc::new(PgResultSink::new(results_db)));
    }

    if let Some(nats_url) = &cli.nats_url {
        let nats_client = async_nats::connect(nats_url.as_str()).await?;
        executor = executor.with_sink(Arc::new(NatsEventSink::new(nats_client)));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling after the current layer");
            on_signal.cancel();
        }
    });

    let logical_time = match cli.logical_time {
        Some(logical_time) => logical_time,
        None => Utc::now().duration_trunc(TimeDelta::hours(1))?,
    };
    info!(
        pipeline = %executor.config().pipeline_name,
        schedule = definition.schedule().unwrap_or("manual"),
        %logical_time,
        "Triggering pipeline run"
    );

    let run = executor.run_with_cancellation(logical_time, cancel).await?;

    for result in &run.results {
        info!(
            stage = %result.stage_id,
            status = %result.status,
            attempts = result.attempts,
            error = result.error.as_deref().unwrap_or(""),
            "Stage result"
        );
    }

    if run.status != db::dtos::ExecStatus::Succeeded {
        error!(run_id = %run.id, status = %run.status, "Pipeline run did not succeed");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_logical_time_and_flags() {
        let cli = Cli::try_parse_from([
            "scheduler",
            "2018-11-01T02:00:00+02:00",
            "--definition",
            "sparkify.json",
            "--database-url",
            "postgres://localhost/dwh",
            "--max-connections",
            "4",
        ])
        .unwrap();

        assert_eq!(
            cli.logical_time.unwrap().to_rfc3339(),
            "2018-11-01T00:00:00+00:00"
        );
        assert_eq!(cli.definition, PathBuf::from("sparkify.json"));
        assert_eq!(cli.max_connections, 4);
    }

    #[test]
    fn rejects_non_rfc3339_logical_time() {
        let parsed = Cli::try_parse_from([
            "scheduler",
            "2018-11-01",
            "--definition",
            "sparkify.json",
            "--database-url",
            "postgres://localhost/dwh",
        ]);
        assert!(parsed.is_err());
    }
}
