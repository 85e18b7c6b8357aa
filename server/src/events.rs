//! Server lifecycle events delivered to subscribers
//!
//! Every event carries a success flag, a timestamp, and a free-form
//! string-keyed parameter map for diagnostic context (remote ip, disconnect
//! reason). Subscribers receive events over unbounded channels; a dropped
//! subscriber is pruned on the next emit.

use std::collections::HashMap;
use std::time::SystemTime;

/// Common payload attached to every lifecycle event.
#[derive(Debug, Clone)]
pub struct EventArgs {
    pub success: bool,
    pub timestamp: SystemTime,
    pub params: HashMap<String, String>,
}

impl EventArgs {
    pub fn new(success: bool) -> Self {
        Self {
            success,
            timestamp: SystemTime::now(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Lifecycle notifications emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started { args: EventArgs },
    Stopped { args: EventArgs },
    Shutdown { args: EventArgs },
    Connected { client_id: String, args: EventArgs },
    Disconnected { client_id: String, args: EventArgs },
    Authenticated { client_id: String, args: EventArgs },
}

impl ServerEvent {
    /// Convenience accessor for the shared args of any variant.
    pub fn args(&self) -> &EventArgs {
        match self {
            ServerEvent::Started { args }
            | ServerEvent::Stopped { args }
            | ServerEvent::Shutdown { args }
            | ServerEvent::Connected { args, .. }
            | ServerEvent::Disconnected { args, .. }
            | ServerEvent::Authenticated { args, .. } => args,
        }
    }
}
