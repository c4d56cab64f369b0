use serde::{Deserialize, Serialize};

/// What went wrong in a tolerated, per-node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A required payload field is absent or empty.
    MissingField,
    /// A condition expression failed to parse or evaluate.
    InvalidExpression,
    /// A participant-assign node names a participant not in the roster.
    UnknownParticipant,
    /// No handler is registered for an action name.
    UnknownAction,
    /// A value had the wrong type for the requested operation.
    TypeMismatch,
    /// An action handler reported a failure.
    ActionFailed,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticKind::MissingField => "missing_field",
            DiagnosticKind::InvalidExpression => "invalid_expression",
            DiagnosticKind::UnknownParticipant => "unknown_participant",
            DiagnosticKind::UnknownAction => "unknown_action",
            DiagnosticKind::TypeMismatch => "type_mismatch",
            DiagnosticKind::ActionFailed => "action_failed",
        };
        f.write_str(s)
    }
}

/// A tolerated error. The node it names still counts as executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub node_id: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(node_id: &str, field: &str) -> Self {
        Self::new(
            DiagnosticKind::MissingField,
            node_id,
            format!("missing or empty field '{}'", field),
        )
    }

    pub fn invalid_expression(node_id: &str, expr: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            DiagnosticKind::InvalidExpression,
            node_id,
            format!("expression `{}` treated as false: {}", expr, reason),
        )
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.node_id, self.message)
    }
}
