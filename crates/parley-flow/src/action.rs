use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::{VariableLookup, VariableWrite};
use crate::diagnostic::{Diagnostic, DiagnosticKind};

/// Everything an action handler may see while running.
pub struct ActionCall<'a> {
    pub node_id: &'a str,
    pub params: &'a Map<String, Value>,
    pub variables: &'a dyn VariableLookup,
}

impl ActionCall<'_> {
    /// A required string parameter.
    pub fn str_param(&self, name: &'static str) -> Result<&str, ActionError> {
        match self.params.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                Err(ActionError::MissingParam(name))
            }
            Some(_) => Err(ActionError::TypeMismatch(format!(
                "parameter '{}' must be a string",
                name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("missing parameter '{0}'")]
    MissingParam(&'static str),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub(crate) fn into_diagnostic(self, node_id: &str, action: &str) -> Diagnostic {
        let kind = match self {
            ActionError::MissingParam(_) => DiagnosticKind::MissingField,
            ActionError::TypeMismatch(_) => DiagnosticKind::TypeMismatch,
            ActionError::Failed(_) => DiagnosticKind::ActionFailed,
        };
        Diagnostic::new(kind, node_id, format!("action '{}': {}", action, self))
    }
}

/// A named action an `action` node can invoke.
///
/// Handlers never mutate the context directly. They return the variable
/// writes to apply, which the engine commits with the rest of the step.
pub trait ActionHandler: Send + Sync + 'static {
    /// Action name matched against the node's `action` field.
    fn name(&self) -> &str;

    fn call(&self, call: &ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError>;
}

/// `setVariable { name, value }`: `variables[name] = value`.
pub struct SetVariable;

impl ActionHandler for SetVariable {
    fn name(&self) -> &str {
        "setVariable"
    }

    fn call(&self, call: &ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> {
        let name = call.str_param("name")?;
        let value = call
            .params
            .get("value")
            .cloned()
            .ok_or(ActionError::MissingParam("value"))?;
        Ok(vec![VariableWrite::new(name, value)])
    }
}

/// `increment { name }`: `variables[name] = (variables[name] or 0) + 1`.
pub struct Increment;

impl ActionHandler for Increment {
    fn name(&self) -> &str {
        "increment"
    }

    fn call(&self, call: &ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> {
        let name = call.str_param("name")?;
        let next = match call.variables.lookup(name) {
            None | Some(Value::Null) => Value::from(1),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => i
                    .checked_add(1)
                    .map(Value::from)
                    .ok_or_else(|| ActionError::Failed(format!("'{}' overflowed", name)))?,
                None => n
                    .as_f64()
                    .and_then(|f| serde_json::Number::from_f64(f + 1.0))
                    .map(Value::Number)
                    .ok_or_else(|| ActionError::Failed(format!("'{}' is not finite", name)))?,
            },
            Some(other) => {
                return Err(ActionError::TypeMismatch(format!(
                    "cannot increment '{}': value is {}",
                    name, other
                )));
            }
        };
        Ok(vec![VariableWrite::new(name, next)])
    }
}

/// Adapts a closure into an [`ActionHandler`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ActionHandler for FnAction<F>
where
    F: Fn(&ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, call: &ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> {
        (self.f)(call)
    }
}

/// Registry of actions available to `action` nodes.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// An empty registry. See [`ActionRegistry::with_builtins`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with `setVariable` and `increment` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SetVariable);
        registry.register(Increment);
        registry
    }

    /// Register a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: impl ActionHandler) {
        let name = handler.name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    /// Register a closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ActionCall<'_>) -> Result<Vec<VariableWrite>, ActionError> + Send + Sync + 'static,
    {
        self.register(FnAction::new(name, f));
    }

    /// Unregister a handler by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    /// List all registered action names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}
