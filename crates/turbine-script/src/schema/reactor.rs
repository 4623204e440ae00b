//! Reactor and connection definition schema

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use turbine_core::{QueueConfig, Token};

/// Definition of a reactor placed on a pump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorDef {
    /// Unique identifier for this reactor
    pub name: Token,
    /// Name of the registered logic that builds the reactor
    pub logic: String,
    /// Pump that drives the reactor
    pub pump: Token,
    /// Shape of the reactor's mailboxes
    #[serde(default)]
    pub queue: QueueConfig,
    /// Input the subscriptions feed
    #[serde(default = "default_input")]
    pub input: String,
    /// Events routed into `input`
    #[serde(default)]
    pub subscriptions: Vec<Token>,
    /// Integer parameters handed to the logic
    #[serde(default)]
    pub params: IndexMap<String, i64>,
}

fn default_input() -> String {
    "in".to_string()
}

impl ReactorDef {
    pub fn new(name: impl Into<Token>, logic: impl Into<String>, pump: impl Into<Token>) -> Self {
        Self {
            name: name.into(),
            logic: logic.into(),
            pump: pump.into(),
            queue: QueueConfig::default(),
            input: default_input(),
            subscriptions: Vec::new(),
            params: IndexMap::new(),
        }
    }

    pub fn subscribe(mut self, event: impl Into<Token>) -> Self {
        self.subscriptions.push(event.into());
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Route from one reactor's output to another reactor's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub from: Token,
    pub output: String,
    pub to: Token,
    pub input: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbine_core::{OverflowPolicy, QueueKind};

    #[test]
    fn test_reactor_def_ron() {
        let ron_str = r#"
        (
            name: "doubler",
            logic: "scale",
            pump: "main",
            queue: (kind: linked, capacity: 16, overflow: DropOldest),
            subscriptions: ["numbers", "more.numbers"],
            params: { "factor": 2 },
        )
        "#;

        let def: ReactorDef = ron::from_str(ron_str).unwrap();
        assert_eq!(def.logic, "scale");
        assert_eq!(def.input, "in");
        assert_eq!(
            def.queue,
            QueueConfig::new(QueueKind::Linked, 16).with_overflow(OverflowPolicy::DropOldest)
        );
        assert_eq!(def.subscriptions.len(), 2);
        assert_eq!(def.params.get("factor"), Some(&2));
    }

    #[test]
    fn test_defaults() {
        let def: ReactorDef = ron::from_str(r#"(name: "r", logic: "l", pump: "p")"#).unwrap();
        assert_eq!(def.queue, QueueConfig::default());
        assert!(def.subscriptions.is_empty());
        assert!(def.params.is_empty());
    }

    #[test]
    fn test_connection_def_ron() {
        let def: ConnectionDef =
            ron::from_str(r#"(from: "a", output: "out", to: "b", input: "in")"#).unwrap();
        assert_eq!(def.from, Token::new("a"));
        assert_eq!(def.input, "in");
    }
}
