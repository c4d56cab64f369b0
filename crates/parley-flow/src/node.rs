use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator for node dispatch, as written in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Start,
    Message,
    Condition,
    #[serde(alias = "agent-assign")]
    ParticipantAssign,
    Action,
    End,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeType::Start => "start",
            NodeType::Message => "message",
            NodeType::Condition => "condition",
            NodeType::ParticipantAssign => "participant-assign",
            NodeType::Action => "action",
            NodeType::End => "end",
        };
        f.write_str(s)
    }
}

/// Variables merged into the context when the flow starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartPayload {
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Speaking participant; absent means a system message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Addressee hint for the chat layer. Not interpreted by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPayload {
    #[serde(
        default,
        alias = "participantId",
        skip_serializing_if = "Option::is_none"
    )]
    pub assistant_id: Option<String>,
    /// Variable that receives the participant record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// Kind-specific node behavior and its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start(StartPayload),
    Message(MessagePayload),
    Condition(ConditionPayload),
    ParticipantAssign(AssignPayload),
    Action(ActionPayload),
    End,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start(_) => NodeType::Start,
            NodeKind::Message(_) => NodeType::Message,
            NodeKind::Condition(_) => NodeType::Condition,
            NodeKind::ParticipantAssign(_) => NodeType::ParticipantAssign,
            NodeKind::Action(_) => NodeType::Action,
            NodeKind::End => NodeType::End,
        }
    }
}

/// Editor canvas position. Carried through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeDef", into = "NodeDef")]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    pub kind: NodeKind,
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            position: None,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start(StartPayload::default()))
    }

    /// A start node seeding variables. Non-object values seed nothing.
    pub fn start_with(id: impl Into<String>, variables: Value) -> Self {
        let variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, NodeKind::Start(StartPayload { variables }))
    }

    /// A system message node.
    pub fn message(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Message(MessagePayload {
                content: Some(content.into()),
                ..Default::default()
            }),
        )
    }

    /// A message node spoken by `assistant_id`.
    pub fn message_from(
        id: impl Into<String>,
        assistant_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::Message(MessagePayload {
                content: Some(content.into()),
                assistant_id: Some(assistant_id.into()),
                target: None,
            }),
        )
    }

    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Condition(ConditionPayload {
                expression: Some(expression.into()),
            }),
        )
    }

    /// Bind participant `participant_id` to `variable`.
    pub fn assign(
        id: impl Into<String>,
        participant_id: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::ParticipantAssign(AssignPayload {
                assistant_id: Some(participant_id.into()),
                variable: Some(variable.into()),
            }),
        )
    }

    /// An action node. Non-object `params` are treated as empty.
    pub fn action(id: impl Into<String>, action: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(
            id,
            NodeKind::Action(ActionPayload {
                action: Some(action.into()),
                params,
            }),
        )
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::End)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// On-disk node form: `{id, type, label, data, position}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeDef {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

fn payload<T: serde::de::DeserializeOwned>(id: &str, data: Option<Value>) -> Result<T, String> {
    let data = match data {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(v) => v,
    };
    serde_json::from_value(data).map_err(|e| format!("node '{}': {}", id, e))
}

impl TryFrom<NodeDef> for Node {
    type Error = String;

    fn try_from(def: NodeDef) -> Result<Self, Self::Error> {
        let kind = match def.node_type {
            NodeType::Start => match def.data {
                None | Some(Value::Null) => NodeKind::Start(StartPayload::default()),
                Some(Value::Object(variables)) => NodeKind::Start(StartPayload { variables }),
                Some(_) => {
                    return Err(format!("node '{}': start data must be an object", def.id));
                }
            },
            NodeType::Message => NodeKind::Message(payload(&def.id, def.data)?),
            NodeType::Condition => NodeKind::Condition(payload(&def.id, def.data)?),
            NodeType::ParticipantAssign => {
                NodeKind::ParticipantAssign(payload(&def.id, def.data)?)
            }
            NodeType::Action => NodeKind::Action(payload(&def.id, def.data)?),
            NodeType::End => NodeKind::End,
        };

        Ok(Node {
            label: def.label.unwrap_or_else(|| def.id.clone()),
            id: def.id,
            kind,
            position: def.position,
        })
    }
}

impl From<Node> for NodeDef {
    fn from(node: Node) -> Self {
        let node_type = node.node_type();
        let data = match node.kind {
            NodeKind::Start(p) if p.variables.is_empty() => None,
            NodeKind::Start(p) => Some(Value::Object(p.variables)),
            NodeKind::Message(p) => serde_json::to_value(p).ok(),
            NodeKind::Condition(p) => serde_json::to_value(p).ok(),
            NodeKind::ParticipantAssign(p) => serde_json::to_value(p).ok(),
            NodeKind::Action(p) => serde_json::to_value(p).ok(),
            NodeKind::End => None,
        };
        NodeDef {
            id: node.id,
            node_type,
            label: Some(node.label),
            data,
            position: node.position,
        }
    }
}
