use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::condition::Condition;
use crate::graph::FlowGraph;
use crate::node::{NodeKind, NodeType};

/// Validation issue severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A specific problem found in a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            node_id: None,
            edge_id: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    fn on_node(mut self, id: &str) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    fn on_edge(mut self, id: &str) -> Self {
        self.edge_id = Some(id.to_string());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}", severity)?;
        if let Some(ref id) = self.node_id {
            write!(f, " [node {}]", id)?;
        }
        if let Some(ref id) = self.edge_id {
            write!(f, " [edge {}]", id)?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub start_nodes: usize,
    pub end_nodes: usize,
    pub reachable_nodes: usize,
}

/// Everything found while statically checking a flow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub stats: GraphStats,
}

impl ValidationReport {
    /// No error-level issues. Warnings are allowed.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }
}

/// Check a graph without executing it.
///
/// Errors are the conditions that would abort a run: a missing or duplicate
/// start node, and edges whose endpoints don't exist. Warnings flag graphs
/// that run but probably not as intended.
pub fn validate(graph: &FlowGraph) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.stats.total_nodes = graph.nodes().len();
    report.stats.total_edges = graph.edges().len();

    validate_structure(graph, &mut report);
    validate_edges(graph, &mut report);
    validate_payloads(graph, &mut report);
    validate_reachability(graph, &mut report);

    report
}

fn validate_structure(graph: &FlowGraph, report: &mut ValidationReport) {
    let starts: Vec<&str> = graph
        .nodes_of_type(NodeType::Start)
        .map(|n| n.id.as_str())
        .collect();
    report.stats.start_nodes = starts.len();
    report.stats.end_nodes = graph.nodes_of_type(NodeType::End).count();

    match starts.len() {
        0 => report
            .issues
            .push(ValidationIssue::error("Flow has no start node.")),
        1 => {}
        _ => report.issues.push(ValidationIssue::error(format!(
            "Flow has {} start nodes ({}); exactly one is required.",
            starts.len(),
            starts.join(", ")
        ))),
    }

    if report.stats.end_nodes == 0 {
        report.issues.push(ValidationIssue::warning(
            "Flow has no end node; it can only finish at a dead end.",
        ));
    }
}

fn validate_edges(graph: &FlowGraph, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for edge in graph.edges() {
        if !seen.insert(edge.id.as_str()) {
            report.issues.push(
                ValidationIssue::warning(format!("Duplicate edge id '{}'.", edge.id))
                    .on_edge(&edge.id),
            );
        }
        if graph.node(&edge.source).is_none() {
            report.issues.push(
                ValidationIssue::error(format!("Edge source '{}' does not exist.", edge.source))
                    .on_edge(&edge.id),
            );
        }
        if graph.node(&edge.target).is_none() {
            report.issues.push(
                ValidationIssue::error(format!("Edge target '{}' does not exist.", edge.target))
                    .on_edge(&edge.id),
            );
        }
        if let Some(condition) = edge.condition() {
            if let Err(e) = Condition::parse(condition) {
                report.issues.push(
                    ValidationIssue::warning(format!(
                        "Condition `{}` does not parse ({}); it will always be false.",
                        condition, e
                    ))
                    .on_edge(&edge.id),
                );
            }
        }
    }

    for node in graph.nodes_of_type(NodeType::End) {
        if !graph.outgoing_edges(&node.id).is_empty() {
            report.issues.push(
                ValidationIssue::warning("End node has outgoing edges; they are never followed.")
                    .on_node(&node.id),
            );
        }
    }
}

fn validate_payloads(graph: &FlowGraph, report: &mut ValidationReport) {
    for node in graph.nodes() {
        let problem = match &node.kind {
            NodeKind::Message(p) if p.content.as_deref().map_or(true, str::is_empty) => {
                Some("Message node has no content; it will be skipped.".to_string())
            }
            NodeKind::Condition(p) => match p.expression.as_deref().map(str::trim) {
                None | Some("") => {
                    Some("Condition node has no expression; it will be skipped.".to_string())
                }
                Some(expr) => Condition::parse(expr).err().map(|e| {
                    format!(
                        "Expression `{}` does not parse ({}); it will evaluate to false.",
                        expr, e
                    )
                }),
            },
            NodeKind::ParticipantAssign(p) if p.assistant_id.is_none() => {
                Some("Participant-assign node has no participant id.".to_string())
            }
            NodeKind::ParticipantAssign(p) if p.variable.is_none() => {
                Some("Participant-assign node has no target variable.".to_string())
            }
            NodeKind::Action(p) if p.action.is_none() => {
                Some("Action node has no action name.".to_string())
            }
            _ => None,
        };
        if let Some(message) = problem {
            report
                .issues
                .push(ValidationIssue::warning(message).on_node(&node.id));
        }
    }
}

fn validate_reachability(graph: &FlowGraph, report: &mut ValidationReport) {
    let Ok(start) = graph.find_start() else {
        return;
    };

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::from([start.id.as_str()]);
    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        for edge in graph.outgoing_edges(id) {
            if graph.node(&edge.target).is_some() {
                queue.push_back(edge.target.as_str());
            }
        }
    }
    report.stats.reachable_nodes = reachable.len();

    for node in graph.nodes() {
        if !reachable.contains(node.id.as_str()) {
            report.issues.push(
                ValidationIssue::warning("Node is not reachable from the start node.")
                    .on_node(&node.id),
            );
        }
    }
}
