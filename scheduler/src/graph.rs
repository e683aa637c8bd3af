//! Pipeline graph: stages and stage groups joined by precedence edges,
//! validated once when the pipeline is defined and split into layers of
//! nodes that may run concurrently.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use worker::StageSpec;

use crate::GraphError;

/// Stages with no ordering among themselves, scheduled as one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageGroup {
    pub id: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineNode {
    Stage(StageSpec),
    Group(StageGroup),
}

impl PipelineNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Stage(stage) => &stage.id,
            Self::Group(group) => &group.id,
        }
    }

    pub fn stages(&self) -> &[StageSpec] {
        match self {
            Self::Stage(stage) => std::slice::from_ref(stage),
            Self::Group(group) => &group.stages,
        }
    }
}

impl From<StageSpec> for PipelineNode {
    fn from(stage: StageSpec) -> Self {
        Self::Stage(stage)
    }
}

impl From<StageGroup> for PipelineNode {
    fn from(group: StageGroup) -> Self {
        Self::Group(group)
    }
}

#[derive(Default)]
pub struct PipelineGraphBuilder {
    nodes: Vec<PipelineNode>,
    edges: Vec<(String, String)>,
}

impl PipelineGraphBuilder {
    pub fn add_node(&mut self, node: impl Into<PipelineNode>) -> &mut Self {
        self.nodes.push(node.into());
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds an edge between each consecutive pair of `ids`.
    pub fn add_chain<S: AsRef<str>>(&mut self, ids: &[S]) -> &mut Self {
        for pair in ids.windows(2) {
            self.add_edge(pair[0].as_ref(), pair[1].as_ref());
        }
        self
    }

    pub fn build(self) -> Result<PipelineGraph, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut stage_ids = HashSet::new();

        for node in self.nodes {
            if let PipelineNode::Group(group) = &node {
                if group.stages.is_empty() {
                    return Err(GraphError::EmptyGroup(group.id.clone()));
                }
                if !stage_ids.insert(group.id.clone()) {
                    return Err(GraphError::DuplicateNode(group.id.clone()));
                }
            }
            for stage in node.stages() {
                stage.validate()?;
                if !stage_ids.insert(stage.id.clone()) {
                    return Err(GraphError::DuplicateNode(stage.id.clone()));
                }
            }

            let id = node.id().to_string();
            indices.insert(id, graph.add_node(node));
        }

        for (from, to) in &self.edges {
            let lookup = |id: &String| {
                indices
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphError::UnknownNode(id.clone()))
            };
            graph.update_edge(lookup(from)?, lookup(to)?, ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::CycleDetected(graph[cycle.node_id()].id().to_string()))?;

        let sources = graph.externals(Incoming).count();
        let sinks = graph.externals(Outgoing).count();
        if sources != 1 || sinks != 1 {
            return Err(GraphError::Disconnected { sources, sinks });
        }

        // Longest distance from the entry node; predecessors precede their
        // successors in `order`, so one pass is enough.
        let mut depth = vec![0usize; graph.node_count()];
        for &node in &order {
            depth[node.index()] = graph
                .neighbors_directed(node, Incoming)
                .map(|parent| depth[parent.index()] + 1)
                .max()
                .unwrap_or(0);
        }

        let layer_count = depth.iter().max().map_or(0, |max| max + 1);
        let mut layers = vec![Vec::new(); layer_count];
        for node in graph.node_indices() {
            layers[depth[node.index()]].push(node);
        }

        Ok(PipelineGraph { graph, layers })
    }
}

/// A validated, acyclic pipeline with exactly one entry and one exit node.
#[derive(Clone, Debug)]
pub struct PipelineGraph {
    graph: DiGraph<PipelineNode, ()>,
    layers: Vec<Vec<NodeIndex>>,
}

impl PipelineGraph {
    pub fn builder() -> PipelineGraphBuilder {
        PipelineGraphBuilder::default()
    }

    /// Execution layers: no edges between nodes of the same layer, and
    /// every edge points to a strictly later layer.
    pub fn topological_order(&self) -> Vec<Vec<&PipelineNode>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&index| &self.graph[index]).collect())
            .collect()
    }

    /// Stages of each layer, group members flattened in definition order.
    pub fn layer_stages(&self) -> Vec<Vec<&StageSpec>> {
        self.layers
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .flat_map(|&index| self.graph[index].stages())
                    .collect()
            })
            .collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_of(&self, node_id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|&index| self.graph[index].id() == node_id))
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.graph.node_weights().flat_map(PipelineNode::stages)
    }

    pub fn stage_count(&self) -> usize {
        self.stages().count()
    }

    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .map(|edge| (self.graph[edge.source()].id(), self.graph[edge.target()].id()))
            .collect()
    }

    pub fn entry(&self) -> &PipelineNode {
        &self.graph[self.layers[0][0]]
    }

    pub fn exit(&self) -> &PipelineNode {
        let last = &self.layers[self.layers.len() - 1];
        &self.graph[last[0]]
    }
}
