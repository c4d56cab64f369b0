//! Flow execution engine for structured multi-party conversations.
//!
//! A flow is a directed graph of typed `Node`s joined by `Edge`s that may
//! carry a condition expression. The `FlowEngine` walks the graph one node
//! per `step()`, mutating its `ExecutionContext` (variables, messages,
//! history) and reporting tolerated problems as `Diagnostic`s.
//!
//! Condition expressions are parsed by a small sandboxed evaluator that can
//! only read the supplied variable bindings.

pub mod action;
pub mod condition;
pub mod context;
pub mod diagnostic;
mod dispatch;
pub mod edge;
pub mod engine;
pub mod graph;
pub mod node;
pub mod preset;
pub mod validator;

pub use action::{ActionCall, ActionError, ActionHandler, ActionRegistry};
pub use condition::{evaluate_condition, truthy, Condition, ConditionEvaluator, ExprError};
pub use context::{ExecutionContext, Overlay, VariableLookup, VariableWrite, Variables};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use edge::{select_edge, Edge};
pub use engine::{FlowEngine, RunSummary, StepReport, Transition};
pub use graph::{FlowBuilder, FlowGraph};
pub use node::{Node, NodeKind, NodeType, Position};
pub use preset::{loop_chat_flow, round_robin_flow};
pub use validator::{validate, Severity, ValidationIssue, ValidationReport};
