//! Declarative pipeline definitions loaded by the host at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::graph::{PipelineGraph, PipelineNode};
use crate::{DefinitionError, GraphError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
}

/// Values applied to every stage unless the stage overrides them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Defaults {
    pub owner: Option<String>,
    pub retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub email_on_failure: bool,
    #[serde(default)]
    pub email_on_retry: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineDefinitionV0 {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Cron expression; triggering on it is up to the host.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub max_active_runs: Option<usize>,
    #[serde(default)]
    pub defaults: Defaults,
    pub nodes: Vec<PipelineNode>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    /// Shorthand for edges between consecutive node ids.
    #[serde(default)]
    pub chain: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "camelCase")]
pub enum PipelineDefinition {
    V0(PipelineDefinitionV0),
}

impl PipelineDefinition {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let raw = std::fs::read_to_string(path)?;
        raw.parse()
    }

    pub fn name(&self) -> &str {
        match self {
            Self::V0(definition) => &definition.name,
        }
    }

    pub fn schedule(&self) -> Option<&str> {
        match self {
            Self::V0(definition) => definition.schedule.as_deref(),
        }
    }

    pub fn max_active_runs(&self) -> Option<usize> {
        match self {
            Self::V0(definition) => definition.max_active_runs,
        }
    }

    pub fn defaults(&self) -> &Defaults {
        match self {
            Self::V0(definition) => &definition.defaults,
        }
    }

    pub fn to_graph(&self) -> Result<PipelineGraph, GraphError> {
        let Self::V0(definition) = self;

        let mut builder = PipelineGraph::builder();
        for node in &definition.nodes {
            builder.add_node(node.clone());
        }
        for edge in &definition.edges {
            builder.add_edge(edge.from.as_str(), edge.to.as_str());
        }
        builder.add_chain(&definition.chain);
        builder.build()
    }
}

impl FromStr for PipelineDefinition {
    type Err = DefinitionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worker::StageKind;

    const DEFINITION: &str = r#"{
        "version": "v0",
        "name": "sparkify_etl",
        "schedule": "0 * * * *",
        "max_active_runs": 1,
        "defaults": {
            "owner": "sparkify",
            "retries": 3,
            "retry_delay_secs": 300,
            "email_on_retry": false
        },
        "nodes": [
            { "type": "stage", "id": "Begin_execution", "kind": "noop" },
            {
                "type": "group",
                "id": "stage_to_redshift",
                "stages": [
                    {
                        "id": "Stage_events",
                        "kind": "bulk_load",
                        "table": "staging_events",
                        "bucket": "udacity-dend",
                        "key": "log_data/{{year}}/{{month}}",
                        "region": "us-west-2",
                        "format": "s3://udacity-dend/log_json_path.json",
                        "credentials": "aws_credentials",
                        "truncate": true
                    },
                    {
                        "id": "Stage_songs",
                        "kind": "bulk_load",
                        "table": "staging_songs",
                        "bucket": "udacity-dend",
                        "key": "song_data",
                        "region": "us-west-2",
                        "credentials": "aws_credentials",
                        "retries": 5
                    }
                ]
            },
            {
                "type": "stage",
                "id": "Load_songplays_fact_table",
                "kind": "fact_load",
                "table": "songplays",
                "select": "SELECT 1"
            },
            { "type": "stage", "id": "Stop_execution", "kind": "noop" }
        ],
        "chain": ["Begin_execution", "stage_to_redshift", "Load_songplays_fact_table", "Stop_execution"]
    }"#;

    #[test]
    fn parses_versioned_definition() {
        let definition: PipelineDefinition = DEFINITION.parse().unwrap();

        assert_eq!(definition.name(), "sparkify_etl");
        assert_eq!(definition.schedule(), Some("0 * * * *"));
        assert_eq!(definition.max_active_runs(), Some(1));
        assert_eq!(definition.defaults().retries, Some(3));
        assert_eq!(definition.defaults().owner.as_deref(), Some("sparkify"));

        let graph = definition.to_graph().unwrap();
        assert_eq!(graph.layer_count(), 4);
        assert_eq!(graph.stage_count(), 5);

        let songs = graph
            .stages()
            .find(|stage| stage.id == "Stage_songs")
            .unwrap();
        assert_eq!(songs.retries, Some(5));
        match &songs.kind {
            StageKind::BulkLoad(bulk) => {
                assert_eq!(bulk.format, "auto");
                assert!(!bulk.truncate);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn structural_errors_surface_from_to_graph() {
        let raw = r#"{
            "version": "v0",
            "name": "broken",
            "nodes": [{ "type": "stage", "id": "a", "kind": "noop" }],
            "edges": [{ "from": "a", "to": "b" }]
        }"#;
        let definition: PipelineDefinition = raw.parse().unwrap();
        assert!(matches!(definition.to_graph(), Err(GraphError::UnknownNode(ref id)) if id == "b"));
    }

    #[test]
    fn rejects_unknown_versions_and_malformed_templates() {
        let raw = r#"{ "version": "v9", "name": "x", "nodes": [] }"#;
        assert!(matches!(
            raw.parse::<PipelineDefinition>(),
            Err(DefinitionError::Parse(_))
        ));

        let raw = r#"{
            "version": "v0",
            "name": "bad_template",
            "nodes": [{
                "type": "stage",
                "id": "stage",
                "kind": "bulk_load",
                "table": "staging_events",
                "bucket": "b",
                "key": "log_data/{{year",
                "region": "us-west-2",
                "credentials": "aws"
            }]
        }"#;
        let definition: PipelineDefinition = raw.parse().unwrap();
        assert!(matches!(definition.to_graph(), Err(GraphError::InvalidStage(_))));
    }
}
