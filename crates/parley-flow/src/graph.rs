use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use parley_core::error::{ParleyError, Result};

use crate::edge::Edge;
use crate::node::{Node, NodeType};

/// An immutable flow definition: nodes plus edges in authored order.
///
/// Edge order matters. Outgoing edges are always considered in the order
/// they appear in `edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDef", into = "GraphDef")]
pub struct FlowGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphDef {
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl TryFrom<GraphDef> for FlowGraph {
    type Error = ParleyError;

    fn try_from(def: GraphDef) -> Result<Self> {
        FlowGraph::new(def.nodes, def.edges)
    }
}

impl From<FlowGraph> for GraphDef {
    fn from(graph: FlowGraph) -> Self {
        GraphDef {
            nodes: graph.nodes,
            edges: graph.edges,
        }
    }
}

impl FlowGraph {
    /// Index the nodes. Node ids must be unique.
    ///
    /// This does not check start nodes or edge endpoints; see
    /// [`crate::validator::validate`] for the full static check.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ParleyError::DuplicateNodeId(node.id.clone()));
            }
        }
        Ok(Self {
            nodes,
            edges,
            index,
        })
    }

    pub fn builder() -> FlowBuilder {
        FlowBuilder::default()
    }

    /// Parse a JSON graph definition.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ParleyError::Graph(e.to_string()))
    }

    /// Load a JSON graph definition from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Resolve a node that must exist.
    pub fn resolve_node(&self, id: &str) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| ParleyError::NodeNotFound(id.to_string()))
    }

    /// Edges leaving `node_id`, in definition order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |n| n.node_type() == node_type)
    }

    /// The unique start node.
    pub fn find_start(&self) -> Result<&Node> {
        let starts: Vec<&Node> = self.nodes_of_type(NodeType::Start).collect();
        match starts.as_slice() {
            [] => Err(ParleyError::MissingStartNode),
            [start] => Ok(*start),
            many => Err(ParleyError::DuplicateStartNode {
                ids: many.iter().map(|n| n.id.clone()).collect(),
            }),
        }
    }
}

/// Fluent construction of a [`FlowGraph`].
#[derive(Debug, Default)]
pub struct FlowBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl FlowBuilder {
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Add an unconditional edge with a generated id.
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let id = self.next_edge_id();
        self.edge(Edge::always(id, source, target))
    }

    /// Add a conditional edge with a generated id.
    pub fn connect_when(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let id = self.next_edge_id();
        self.edge(Edge::when(id, source, target, condition))
    }

    fn next_edge_id(&self) -> String {
        format!("e{}", self.edges.len() + 1)
    }

    pub fn build(self) -> Result<FlowGraph> {
        FlowGraph::new(self.nodes, self.edges)
    }
}
