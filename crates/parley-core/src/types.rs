use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

/// A single content part in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
}

/// A chat message produced by a flow run.
///
/// Serializes to the shape chat-session storage consumes:
/// `{id, role, content: [{type: "text", text}], assistantId?, timestamp}`
/// with `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    #[serde(alias = "contentParts")]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// A system message with no authoring participant.
    pub fn system(text: impl Into<String>) -> Self {
        Self::build(Role::System, text.into(), None)
    }

    /// A message spoken by the participant with `assistant_id`.
    pub fn assistant(assistant_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::build(Role::Assistant, text.into(), Some(assistant_id.into()))
    }

    /// `assistant` when an author is given, `system` otherwise.
    pub fn authored(assistant_id: Option<String>, text: impl Into<String>) -> Self {
        match assistant_id {
            Some(id) => Self::assistant(id, text),
            None => Self::system(text),
        }
    }

    fn build(role: Role, text: String, assistant_id: Option<String>) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4()),
            role,
            content: vec![ContentPart::Text { text }],
            assistant_id,
            timestamp: Utc::now(),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A conversation participant supplied by the assistant registry.
///
/// Only `id` and `name` are interpreted; every other profile field is kept
/// as-is so that binding a participant to a variable exposes the full record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile: serde_json::Map::new(),
        }
    }

    /// Attach an extra profile field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.profile.insert(key.into(), value);
        self
    }

    /// The full record as a JSON object.
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = self.profile.clone();
        obj.insert("id".into(), serde_json::Value::String(self.id.clone()));
        obj.insert("name".into(), serde_json::Value::String(self.name.clone()));
        serde_json::Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authored_role() {
        assert_eq!(ChatMessage::authored(None, "hi").role, Role::System);
        let msg = ChatMessage::authored(Some("a1".into()), "hi");
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.assistant_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = ChatMessage::system("x");
        let b = ChatMessage::system("x");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("msg_"));
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = ChatMessage::assistant("a1", "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], json!([{"type": "text", "text": "hello"}]));
        assert_eq!(value["assistantId"], "a1");
        assert!(value["timestamp"].is_i64());

        let system = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert!(system.get("assistantId").is_none());
    }

    #[test]
    fn test_message_accepts_content_parts_alias() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "role": "system",
            "contentParts": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "timestamp": 1700000000000i64
        }))
        .unwrap();
        assert_eq!(msg.text(), "ab");
    }

    #[test]
    fn test_participant_profile_flattened() {
        let p: Participant = serde_json::from_value(json!({
            "id": "a1",
            "name": "Analyst",
            "systemPrompt": "Be rigorous.",
            "isActive": true
        }))
        .unwrap();
        assert_eq!(p.name, "Analyst");
        assert_eq!(p.profile["isActive"], json!(true));

        let value = p.to_value();
        assert_eq!(value["id"], "a1");
        assert_eq!(value["systemPrompt"], "Be rigorous.");
    }
}
