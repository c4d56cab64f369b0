use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use parley_core::config::EngineConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{ChatMessage, Participant};

use crate::action::{ActionHandler, ActionRegistry};
use crate::condition::ConditionEvaluator;
use crate::context::{ExecutionContext, Overlay, Variables};
use crate::diagnostic::Diagnostic;
use crate::dispatch::dispatch;
use crate::edge::select_edge;
use crate::graph::FlowGraph;
use crate::node::NodeType;

/// How a step left its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Moved along `edge_id` to `target`.
    Advanced { edge_id: String, target: String },
    /// Executed an `end` node.
    Ended,
    /// No outgoing edge to follow.
    DeadEnd,
}

impl Transition {
    /// Whether the run finished on this step.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Transition::Advanced { .. })
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub node_id: String,
    pub node_type: NodeType,
    /// Id of the message appended by this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub transition: Transition,
}

/// Totals for the whole run, as of the end of
/// [`FlowEngine::run_to_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Node executions since `start()`, including those before the call.
    pub steps: usize,
    pub messages: usize,
    pub diagnostics: usize,
}

/// Walks a [`FlowGraph`] one node per step.
///
/// The engine never loops on its own. A caller drives it with
/// [`FlowEngine::start`] and then [`FlowEngine::step`], doing any external
/// work (waiting on a generated reply, say) between steps and feeding results
/// back with [`FlowEngine::set_variable`].
///
/// The graph is shared and read-only; every engine owns its own context, so
/// many engines can run the same flow independently.
pub struct FlowEngine {
    graph: Arc<FlowGraph>,
    context: ExecutionContext,
    evaluator: ConditionEvaluator,
    actions: ActionRegistry,
    diagnostics: Vec<Diagnostic>,
    config: EngineConfig,
    started: bool,
}

impl FlowEngine {
    /// Create an engine over `graph` with a read-only participant roster.
    pub fn new(graph: impl Into<Arc<FlowGraph>>, participants: Vec<Participant>) -> Self {
        Self {
            graph: graph.into(),
            context: ExecutionContext::new(participants),
            evaluator: ConditionEvaluator::new(),
            actions: ActionRegistry::with_builtins(),
            diagnostics: Vec::new(),
            config: EngineConfig::default(),
            started: false,
        }
    }

    /// Replace the engine config.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the action registry. Built-ins are only present if the
    /// given registry has them.
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Register an action handler, replacing one with the same name.
    pub fn register_action(&mut self, handler: impl ActionHandler) {
        self.actions.register(handler);
    }

    /// Begin the run: locate the start node and execute it.
    ///
    /// Fails without touching the context if the graph has no start node,
    /// has more than one, or the first step hits a fatal error. An engine runs
    /// once; a second call after a successful start is an error.
    pub fn start(&mut self) -> Result<StepReport> {
        if self.started {
            return Err(ParleyError::AlreadyStarted);
        }
        let start_id = self.graph.find_start()?.id.clone();

        info!(start = %start_id, nodes = self.graph.nodes().len(), "Flow run started");
        let report = self.execute(&start_id)?;
        self.started = true;
        Ok(report)
    }

    /// Execute the current node and move on.
    ///
    /// Returns `Ok(None)` without doing anything once the run has finished
    /// or before it has started. A fatal error leaves the context exactly as
    /// it was before the call.
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        if self.context.is_finished {
            return Ok(None);
        }
        let Some(node_id) = self.context.current_node_id.clone() else {
            return Ok(None);
        };
        self.execute(&node_id).map(Some)
    }

    /// Start if needed, then step until the run finishes.
    ///
    /// Bounded by `max_steps` from the engine config, counted over the whole
    /// run. A flow that has taken that many steps without finishing yields
    /// [`ParleyError::StepLimitExceeded`], and so does every later call.
    pub fn run_to_completion(&mut self) -> Result<RunSummary> {
        while !self.context.is_finished {
            if self.context.history.len() >= self.config.max_steps {
                warn!(max_steps = self.config.max_steps, "Flow step limit reached");
                return Err(ParleyError::StepLimitExceeded(self.config.max_steps));
            }
            let report = if self.started {
                self.step()?
            } else {
                Some(self.start()?)
            };
            if report.is_none() {
                break;
            }
        }

        Ok(RunSummary {
            steps: self.context.history.len(),
            messages: self.context.messages.len(),
            diagnostics: self.diagnostics.len(),
        })
    }

    fn execute(&mut self, node_id: &str) -> Result<StepReport> {
        let graph = Arc::clone(&self.graph);
        let node = graph.resolve_node(node_id)?;
        debug!(
            node_id = %node.id,
            node_type = %node.node_type(),
            label = %node.label,
            "Executing node"
        );

        let effects = dispatch(node, &self.context, &mut self.evaluator, &self.actions);
        let mut diagnostics = effects.diagnostics;

        let transition = if effects.finish {
            Transition::Ended
        } else {
            let outgoing = graph.outgoing_edges(&node.id);
            let view = Overlay::new(&self.context.variables, &effects.writes);
            let evaluator = &mut self.evaluator;
            let selected = select_edge(&outgoing, |expr| match evaluator.evaluate(expr, &view) {
                Ok(result) => result,
                Err(e) => {
                    diagnostics.push(Diagnostic::invalid_expression(&node.id, expr, e));
                    false
                }
            });

            match selected {
                None => Transition::DeadEnd,
                Some(edge) => {
                    if graph.node(&edge.target).is_none() {
                        return Err(ParleyError::DanglingEdge {
                            edge: edge.id.clone(),
                            target: edge.target.clone(),
                        });
                    }
                    Transition::Advanced {
                        edge_id: edge.id.clone(),
                        target: edge.target.clone(),
                    }
                }
            }
        };

        // Commit
        self.context.variables.apply(effects.writes);
        let message_id = effects.message.as_ref().map(|m| m.id.clone());
        if let Some(message) = effects.message {
            self.context.messages.push(message);
        }
        self.context.history.push(node.id.clone());

        for d in &diagnostics {
            warn!(node_id = %d.node_id, kind = %d.kind, "{}", d.message);
        }
        self.diagnostics.extend(diagnostics.iter().cloned());

        match &transition {
            Transition::Advanced { edge_id, target } => {
                debug!(from = %node.id, edge = %edge_id, to = %target, "Following edge");
                self.context.current_node_id = Some(target.clone());
            }
            Transition::Ended => {
                info!(
                    node_id = %node.id,
                    steps = self.context.history.len(),
                    "Flow finished at end node"
                );
                self.context.finish();
            }
            Transition::DeadEnd => {
                info!(
                    node_id = %node.id,
                    steps = self.context.history.len(),
                    "Flow finished at dead end"
                );
                self.context.finish();
            }
        }

        Ok(StepReport {
            node_id: node.id.clone(),
            node_type: node.node_type(),
            message_id,
            diagnostics,
            transition,
        })
    }

    /// Bind a variable, e.g. to feed an external reply into the flow.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.context.variables.set(name, value);
    }

    /// A copy of a variable's current value.
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.context.variables.get(name).cloned()
    }

    /// All current variable bindings.
    pub fn variables(&self) -> &Variables {
        &self.context.variables
    }

    /// The live execution context.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// An owned copy of the whole context.
    pub fn snapshot(&self) -> ExecutionContext {
        self.context.clone()
    }

    /// Messages produced so far, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.context.messages
    }

    /// Ids of executed nodes, one entry per step.
    pub fn history(&self) -> &[String] {
        &self.context.history
    }

    /// Every diagnostic raised so far, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The node the next `step()` will execute. `None` before start and
    /// after the run finishes.
    pub fn current_node_id(&self) -> Option<&str> {
        self.context.current_node_id.as_deref()
    }

    /// Whether `start()` has succeeded.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the run reached an end node or a dead end.
    pub fn is_finished(&self) -> bool {
        self.context.is_finished
    }

    /// The shared graph definition.
    pub fn graph(&self) -> &Arc<FlowGraph> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionCall, ActionError, FnAction};
    use crate::context::VariableWrite;
    use crate::diagnostic::DiagnosticKind;
    use crate::edge::Edge;
    use crate::node::Node;
    use parley_core::types::Role;
    use serde_json::json;

    fn engine(graph: FlowGraph) -> FlowEngine {
        FlowEngine::new(graph, vec![])
    }

    #[test]
    fn test_single_start_dead_end() {
        let graph = FlowGraph::new(vec![Node::start("only")], vec![]).unwrap();
        let mut engine = engine(graph);

        let report = engine.start().unwrap();
        assert_eq!(report.transition, Transition::DeadEnd);
        assert!(engine.is_finished());
        assert_eq!(engine.history(), ["only"]);
        assert!(engine.current_node_id().is_none());
    }

    #[test]
    fn test_step_before_start_is_noop() {
        let graph = FlowGraph::new(vec![Node::start("s")], vec![]).unwrap();
        let mut engine = engine(graph);
        assert!(engine.step().unwrap().is_none());
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_step_after_finish_is_noop() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::end("e"))
            .connect("s", "e")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        engine.run_to_completion().unwrap();
        assert_eq!(engine.history(), ["s", "e"]);

        assert!(engine.step().unwrap().is_none());
        assert!(engine.step().unwrap().is_none());
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn test_start_twice_is_error() {
        let graph = FlowGraph::new(vec![Node::start("s")], vec![]).unwrap();
        let mut engine = engine(graph);
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(ParleyError::AlreadyStarted)));
    }

    #[test]
    fn test_missing_start_aborts_before_mutation() {
        let graph = FlowGraph::new(vec![Node::end("e")], vec![]).unwrap();
        let mut engine = engine(graph);
        assert!(matches!(engine.start(), Err(ParleyError::MissingStartNode)));
        assert!(!engine.is_started());
        assert_eq!(engine.snapshot(), ExecutionContext::default());
    }

    #[test]
    fn test_message_flow() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::message("sys", "hello"))
            .node(Node::message_from("said", "a1", "hello"))
            .node(Node::end("e"))
            .connect("s", "sys")
            .connect("sys", "said")
            .connect("said", "e")
            .build()
            .unwrap();
        let mut engine = engine(graph);

        engine.start().unwrap();
        let report = engine.step().unwrap().unwrap();
        assert_eq!(report.message_id.as_deref(), Some(engine.messages()[0].id.as_str()));
        engine.step().unwrap();

        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].assistant_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_edge_conditions_see_this_steps_writes() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::action("inc", "increment", json!({"name": "round"})))
            .node(Node::end("one"))
            .node(Node::end("other"))
            .connect("s", "inc")
            .connect_when("inc", "other", "round != 1")
            .connect_when("inc", "one", "round == 1")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        engine.run_to_completion().unwrap();

        assert_eq!(engine.history(), ["s", "inc", "one"]);
        assert!(engine.diagnostics().is_empty());
    }

    #[test]
    fn test_dangling_target_rolls_back_step() {
        let graph = FlowGraph::new(
            vec![Node::start("s"), Node::message("m", "lost")],
            vec![
                Edge::always("e1", "s", "m"),
                Edge::always("e2", "m", "void"),
            ],
        )
        .unwrap();
        let mut engine = engine(graph);
        engine.start().unwrap();
        let before = engine.snapshot();

        match engine.step() {
            Err(ParleyError::DanglingEdge { edge, target }) => {
                assert_eq!(edge, "e2");
                assert_eq!(target, "void");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(engine.snapshot(), before);
        assert!(engine.messages().is_empty());
        assert_eq!(engine.current_node_id(), Some("m"));
    }

    #[test]
    fn test_tolerated_errors_still_recorded_in_history() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::message("empty", ""))
            .node(Node::action("mystery", "dance", json!({})))
            .node(Node::assign("pick", "nobody", "speaker"))
            .node(Node::end("e"))
            .connect("s", "empty")
            .connect("empty", "mystery")
            .connect("mystery", "pick")
            .connect("pick", "e")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        let summary = engine.run_to_completion().unwrap();

        assert_eq!(summary.steps, 5);
        assert_eq!(engine.history().len(), 5);
        assert!(engine.messages().is_empty());
        let kinds: Vec<DiagnosticKind> = engine.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::MissingField,
                DiagnosticKind::UnknownAction,
                DiagnosticKind::UnknownParticipant,
            ]
        );
    }

    #[test]
    fn test_invalid_edge_condition_reports_and_falls_back() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::end("first"))
            .node(Node::end("second"))
            .connect_when("s", "first", "undefinedVar > 1")
            .connect_when("s", "second", "1; process.exit(1)")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        let report = engine.start().unwrap();

        assert_eq!(
            report.transition,
            Transition::Advanced {
                edge_id: "e1".into(),
                target: "first".into()
            }
        );
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report
            .diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::InvalidExpression));
    }

    #[test]
    fn test_step_limit() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::action("spin", "increment", json!({"name": "n"})))
            .connect("s", "spin")
            .connect("spin", "spin")
            .build()
            .unwrap();
        let mut engine = engine(graph).with_config(EngineConfig {
            max_steps: 10,
            ..Default::default()
        });

        assert!(matches!(
            engine.run_to_completion(),
            Err(ParleyError::StepLimitExceeded(10))
        ));
        assert_eq!(engine.history().len(), 10);
        assert_eq!(engine.variable("n"), Some(json!(9)));
    }

    #[test]
    fn test_external_results_between_steps() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::condition("replied", "reply contains 'agree'"))
            .node(Node::end("e"))
            .connect("s", "replied")
            .connect("replied", "e")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        engine.start().unwrap();
        engine.set_variable("reply", json!("I agree with the analyst"));
        engine.step().unwrap();

        assert_eq!(engine.variable("replied"), Some(json!(true)));
    }

    #[test]
    fn test_custom_action_handler() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::action("send", "sendMessage", json!({"to": "a2"})))
            .connect("s", "send")
            .build()
            .unwrap();
        let engine = engine(graph);
        let mut registry = ActionRegistry::with_builtins();
        registry.register_fn("sendMessage", |call| {
            Ok(vec![VariableWrite::new("pendingReply", json!(call.str_param("to")?))])
        });
        let mut engine = engine.with_actions(registry);

        engine.run_to_completion().unwrap();
        assert_eq!(engine.variable("pendingReply"), Some(json!("a2")));
    }

    #[test]
    fn test_variable_accessor_returns_copy() {
        let graph =
            FlowGraph::new(vec![Node::start_with("s", json!({"list": [1]}))], vec![]).unwrap();
        let mut engine = engine(graph);
        engine.start().unwrap();

        let mut copy = engine.variable("list").unwrap();
        copy.as_array_mut().unwrap().push(json!(2));
        assert_eq!(engine.variable("list"), Some(json!([1])));

        let mut snapshot = engine.snapshot();
        snapshot.history.clear();
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_shared_graph_independent_runs() {
        let graph = Arc::new(
            FlowGraph::builder()
                .node(Node::start("s"))
                .node(Node::action("inc", "increment", json!({"name": "n"})))
                .connect("s", "inc")
                .build()
                .unwrap(),
        );
        let mut a = FlowEngine::new(Arc::clone(&graph), vec![]);
        let mut b = FlowEngine::new(Arc::clone(&graph), vec![]);
        a.run_to_completion().unwrap();
        b.start().unwrap();

        assert_eq!(a.variable("n"), Some(json!(1)));
        assert_eq!(b.variable("n"), None);
        assert!(Arc::ptr_eq(a.graph(), b.graph()));
    }

    #[test]
    fn test_action_failures_are_tolerated() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::action("inc", "increment", json!({"name": "n"})))
            .node(Node::action("boom", "explode", json!({})))
            .connect("s", "inc")
            .connect("inc", "boom")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        engine.register_action(FnAction::new(
            "explode",
            |_: &ActionCall<'_>| -> std::result::Result<Vec<VariableWrite>, ActionError> {
                Err(ActionError::Failed("kaboom".into()))
            },
        ));
        engine.set_variable("n", json!(i64::MAX));

        engine.run_to_completion().unwrap();

        let kinds: Vec<DiagnosticKind> = engine.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::ActionFailed, DiagnosticKind::ActionFailed]);
        assert_eq!(engine.diagnostics()[0].node_id, "inc");
        assert!(engine.diagnostics()[1].message.contains("kaboom"));
        assert_eq!(engine.variable("n"), Some(json!(i64::MAX)));
        assert_eq!(engine.history(), ["s", "inc", "boom"]);
    }

    #[test]
    fn test_summary_counts_whole_run() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::message("m", "hi"))
            .node(Node::end("e"))
            .connect("s", "m")
            .connect("m", "e")
            .build()
            .unwrap();
        let mut engine = engine(graph);
        engine.start().unwrap();

        let summary = engine.run_to_completion().unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.steps, engine.history().len());
    }

    #[test]
    fn test_step_limit_spans_calls() {
        let graph = FlowGraph::builder()
            .node(Node::start("s"))
            .node(Node::action("spin", "increment", json!({"name": "n"})))
            .connect("s", "spin")
            .connect("spin", "spin")
            .build()
            .unwrap();
        let mut engine = engine(graph).with_config(EngineConfig {
            max_steps: 5,
            ..Default::default()
        });

        for _ in 0..2 {
            assert!(matches!(
                engine.run_to_completion(),
                Err(ParleyError::StepLimitExceeded(5))
            ));
        }
        assert_eq!(engine.history().len(), 5);
    }

    #[test]
    fn test_transition_is_terminal() {
        assert!(Transition::Ended.is_terminal());
        assert!(Transition::DeadEnd.is_terminal());
        assert!(!Transition::Advanced {
            edge_id: "e1".into(),
            target: "b".into()
        }
        .is_terminal());
    }
}
