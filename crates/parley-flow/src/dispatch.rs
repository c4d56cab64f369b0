use serde_json::Value;
use tracing::debug;

use parley_core::types::ChatMessage;

use crate::action::{ActionCall, ActionRegistry};
use crate::condition::ConditionEvaluator;
use crate::context::{ExecutionContext, VariableWrite};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::node::{
    ActionPayload, AssignPayload, ConditionPayload, MessagePayload, Node, NodeKind, StartPayload,
};

/// What executing one node would do to the context.
///
/// Nothing here has been applied yet; the engine commits it once the
/// transition out of the node is known to be valid.
#[derive(Debug, Default)]
pub(crate) struct NodeEffects {
    pub writes: Vec<VariableWrite>,
    pub message: Option<ChatMessage>,
    pub finish: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl NodeEffects {
    fn diagnostic(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Default::default()
        }
    }
}

/// Compute the effects of executing `node` against `ctx`.
pub(crate) fn dispatch(
    node: &Node,
    ctx: &ExecutionContext,
    evaluator: &mut ConditionEvaluator,
    actions: &ActionRegistry,
) -> NodeEffects {
    match &node.kind {
        NodeKind::Start(p) => start(node, p),
        NodeKind::Message(p) => message(node, p),
        NodeKind::Condition(p) => condition(node, p, ctx, evaluator),
        NodeKind::ParticipantAssign(p) => assign(node, p, ctx),
        NodeKind::Action(p) => action(node, p, ctx, actions),
        NodeKind::End => {
            debug!(node_id = %node.id, "Reached end node");
            NodeEffects {
                finish: true,
                ..Default::default()
            }
        }
    }
}

fn start(node: &Node, payload: &StartPayload) -> NodeEffects {
    debug!(node_id = %node.id, seeded = payload.variables.len(), "Starting flow");
    NodeEffects {
        writes: payload
            .variables
            .iter()
            .map(|(k, v)| VariableWrite::new(k.clone(), v.clone()))
            .collect(),
        ..Default::default()
    }
}

fn message(node: &Node, payload: &MessagePayload) -> NodeEffects {
    let Some(content) = payload.content.as_deref().filter(|c| !c.is_empty()) else {
        return NodeEffects::diagnostic(Diagnostic::missing_field(&node.id, "content"));
    };

    let author = payload.assistant_id.clone().filter(|id| !id.is_empty());
    let message = ChatMessage::authored(author, content);
    debug!(
        node_id = %node.id,
        message_id = %message.id,
        role = %message.role,
        target = payload.target.as_deref().unwrap_or("-"),
        "Message produced"
    );

    NodeEffects {
        message: Some(message),
        ..Default::default()
    }
}

fn condition(
    node: &Node,
    payload: &ConditionPayload,
    ctx: &ExecutionContext,
    evaluator: &mut ConditionEvaluator,
) -> NodeEffects {
    let Some(expr) = payload.expression.as_deref().filter(|e| !e.trim().is_empty()) else {
        return NodeEffects::diagnostic(Diagnostic::missing_field(&node.id, "expression"));
    };

    let mut effects = NodeEffects::default();
    let result = match evaluator.evaluate(expr, &ctx.variables) {
        Ok(result) => result,
        Err(e) => {
            effects
                .diagnostics
                .push(Diagnostic::invalid_expression(&node.id, expr, e));
            false
        }
    };
    debug!(node_id = %node.id, expr, result, "Condition evaluated");

    effects
        .writes
        .push(VariableWrite::new(node.id.clone(), Value::Bool(result)));
    effects
}

fn assign(node: &Node, payload: &AssignPayload, ctx: &ExecutionContext) -> NodeEffects {
    let Some(participant_id) = payload.assistant_id.as_deref().filter(|id| !id.is_empty()) else {
        return NodeEffects::diagnostic(Diagnostic::missing_field(&node.id, "assistantId"));
    };

    let Some(participant) = ctx.participant(participant_id) else {
        return NodeEffects::diagnostic(Diagnostic::new(
            DiagnosticKind::UnknownParticipant,
            &node.id,
            format!("participant '{}' is not in the roster", participant_id),
        ));
    };

    let Some(variable) = payload.variable.as_deref().filter(|v| !v.is_empty()) else {
        return NodeEffects::diagnostic(Diagnostic::missing_field(&node.id, "variable"));
    };

    debug!(node_id = %node.id, participant = %participant.name, variable, "Participant assigned");
    NodeEffects {
        writes: vec![VariableWrite::new(variable, participant.to_value())],
        ..Default::default()
    }
}

fn action(
    node: &Node,
    payload: &ActionPayload,
    ctx: &ExecutionContext,
    actions: &ActionRegistry,
) -> NodeEffects {
    let Some(name) = payload.action.as_deref().filter(|a| !a.is_empty()) else {
        return NodeEffects::diagnostic(Diagnostic::missing_field(&node.id, "action"));
    };

    let Some(handler) = actions.get(name) else {
        return NodeEffects::diagnostic(Diagnostic::new(
            DiagnosticKind::UnknownAction,
            &node.id,
            format!("no handler registered for action '{}'", name),
        ));
    };

    let call = ActionCall {
        node_id: &node.id,
        params: &payload.params,
        variables: &ctx.variables,
    };
    match handler.call(&call) {
        Ok(writes) => {
            debug!(node_id = %node.id, action = name, writes = writes.len(), "Action executed");
            NodeEffects {
                writes,
                ..Default::default()
            }
        }
        Err(e) => NodeEffects::diagnostic(e.into_diagnostic(&node.id, name)),
    }
}
