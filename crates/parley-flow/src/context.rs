use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::types::{ChatMessage, Participant};

/// Read access to variable bindings.
///
/// This is the only thing condition expressions and action handlers can see.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

/// A pending `variables[name] = value` produced by a node.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableWrite {
    pub name: String,
    pub value: Value,
}

impl VariableWrite {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Flow variables. Keys are strings; values are JSON. Last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    data: HashMap<String, Value>,
}

impl Variables {
    /// Create empty variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a value, replacing any previous binding.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Apply writes in order.
    pub fn apply(&mut self, writes: impl IntoIterator<Item = VariableWrite>) {
        for w in writes {
            self.data.insert(w.name, w.value);
        }
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// No variables are bound.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over bindings in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}

impl VariableLookup for Variables {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Variables as they will look once `writes` are applied.
pub struct Overlay<'a> {
    base: &'a Variables,
    writes: &'a [VariableWrite],
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a Variables, writes: &'a [VariableWrite]) -> Self {
        Self { base, writes }
    }
}

impl VariableLookup for Overlay<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.name == name)
            .map(|w| &w.value)
            .or_else(|| self.base.lookup(name))
    }
}

/// Per-run mutable state, owned by a single engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub current_node_id: Option<String>,
    pub variables: Variables,
    pub messages: Vec<ChatMessage>,
    pub participants: Vec<Participant>,
    pub history: Vec<String>,
    pub is_finished: bool,
}

impl ExecutionContext {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            participants,
            ..Default::default()
        }
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Latch the run as finished. There is no way back.
    pub(crate) fn finish(&mut self) {
        self.is_finished = true;
        self.current_node_id = None;
    }
}
