#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use scheduler::{ExecutorConfig, PipelineGraph, StageGroup};
use std::time::Duration;
use worker::warehouse::memory::MemoryWarehouse;
use worker::{
    AccessKeyPair, BulkLoad, DimensionLoad, FactLoad, Predicate, QualityCheck, QualityGate, Row,
    Scalar, StageKind, StageSpec, StaticCredentials,
};

pub const EVENTS_OBJECT: &str = "s3://udacity-dend/log_data/2018/11";
pub const SONGS_OBJECT: &str = "s3://udacity-dend/song_data";

pub const SONGPLAYS_SELECT: &str =
    "SELECT events.ts, events.userid, songs.song_id FROM staging_events events JOIN staging_songs songs ON events.song = songs.title";
pub const USERS_SELECT: &str = "SELECT DISTINCT userid, firstname, lastname FROM staging_events";
pub const SONGS_SELECT: &str = "SELECT DISTINCT song_id, title FROM staging_songs";
pub const ARTISTS_SELECT: &str = "SELECT DISTINCT artist_id, artist_name FROM staging_songs";

pub const NULL_USERS_CHECK: &str = "SELECT COUNT(*) FROM users WHERE userid IS NULL";
pub const SONGPLAYS_COUNT_CHECK: &str = "SELECT COUNT(*) FROM songplays";

pub fn logical_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 11, 1, 0, 0, 0).unwrap()
}

pub fn rows(n: i64) -> Vec<Row> {
    (0..n).map(|i| vec![Scalar::Int(i)]).collect()
}

pub fn bulk(id: &str, table: &str, key: &str, truncate: bool) -> StageSpec {
    StageSpec::new(
        id,
        StageKind::BulkLoad(BulkLoad {
            table: table.into(),
            bucket: "udacity-dend".into(),
            key: key.into(),
            region: "us-west-2".into(),
            format: "auto".into(),
            credentials: "aws_credentials".into(),
            truncate,
        }),
    )
}

pub fn dimension(id: &str, table: &str, select: &str, truncate: bool) -> StageSpec {
    StageSpec::new(
        id,
        StageKind::DimensionLoad(DimensionLoad {
            table: table.into(),
            select: select.into(),
            truncate,
        }),
    )
}

pub fn quality_gate() -> StageSpec {
    StageSpec::new(
        "Run_data_quality_checks",
        StageKind::QualityGate(QualityGate::new(vec![
            QualityCheck::new(NULL_USERS_CHECK, Predicate::equals(0)),
            QualityCheck::new(SONGPLAYS_COUNT_CHECK, Predicate::greater_than(0)),
        ])),
    )
}

/// `[bulk A, bulk B] -> fact F -> [dim D1 (truncate), dim D2, dim D3 (truncate)] -> gate Q`
pub fn sparkify_graph() -> PipelineGraph {
    let mut builder = PipelineGraph::builder();
    builder
        .add_node(StageGroup {
            id: "stage_to_redshift".into(),
            stages: vec![
                bulk("Stage_events", "staging_events", "log_data/{{year}}/{{month}}", true),
                bulk("Stage_songs", "staging_songs", "song_data", false),
            ],
        })
        .add_node(StageSpec::new(
            "Load_songplays_fact_table",
            StageKind::FactLoad(FactLoad {
                table: "songplays".into(),
                select: SONGPLAYS_SELECT.into(),
                pre_clear: None,
            }),
        ))
        .add_node(StageGroup {
            id: "load_dimensions".into(),
            stages: vec![
                dimension("Load_user_dim_table", "users", USERS_SELECT, true),
                dimension("Load_song_dim_table", "songs", SONGS_SELECT, false),
                dimension("Load_artist_dim_table", "artists", ARTISTS_SELECT, true),
            ],
        })
        .add_node(quality_gate())
        .add_chain(&[
            "stage_to_redshift",
            "Load_songplays_fact_table",
            "load_dimensions",
            "Run_data_quality_checks",
        ]);
    builder.build().unwrap()
}

/// Warehouse with every source the sparkify pipeline reads, and clean data.
pub fn sparkify_warehouse() -> MemoryWarehouse {
    MemoryWarehouse::new()
        .with_object(EVENTS_OBJECT, rows(20))
        .with_object(SONGS_OBJECT, rows(10))
        .with_select(SONGPLAYS_SELECT, rows(8))
        .with_select(USERS_SELECT, rows(5))
        .with_select(SONGS_SELECT, rows(10))
        .with_select(ARTISTS_SELECT, rows(7))
        .on_query(NULL_USERS_CHECK, vec![vec![Scalar::Int(0)]])
}

pub fn credentials() -> StaticCredentials {
    StaticCredentials::new().with("aws_credentials", AccessKeyPair::new("AKIAEXAMPLE", "s3cr3t"))
}

pub fn config() -> ExecutorConfig {
    ExecutorConfig {
        pipeline_name: "sparkify".into(),
        owner: Some("udacity".into()),
        ..ExecutorConfig::default()
    }
    .with_retry_delay(Duration::ZERO)
}
