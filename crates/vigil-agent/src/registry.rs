//! Command registry: action name -> scopes, validator, handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use vigil_protocol::ErrorCode;

use crate::session::SessionContext;

/// What went wrong inside a validator or handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The request payload was rejected. The message is safe to echo.
    BadRequest,
    /// The handler failed. The message is logged, never echoed.
    Internal,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl CommandError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: CommandErrorKind::BadRequest,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request_with(message: impl Into<String>, details: Value) -> Self {
        Self {
            kind: CommandErrorKind::BadRequest,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: CommandErrorKind::Internal,
            message: message.into(),
            details: None,
        }
    }

    pub fn wire_code(&self) -> ErrorCode {
        match self.kind {
            CommandErrorKind::BadRequest => ErrorCode::BadRequest,
            CommandErrorKind::Internal => ErrorCode::InternalError,
        }
    }

    /// The message sent to the client. Internal failures get a fixed
    /// string so nothing about the fault leaks over the wire.
    pub fn client_message(&self) -> &str {
        match self.kind {
            CommandErrorKind::BadRequest => &self.message,
            CommandErrorKind::Internal => "internal error",
        }
    }

    /// Details are only ever echoed for payload rejections.
    pub fn client_details(&self) -> Option<Value> {
        match self.kind {
            CommandErrorKind::BadRequest => self.details.clone(),
            CommandErrorKind::Internal => None,
        }
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, CommandError>> + Send>>;
pub type Handler = Box<dyn Fn(Value, SessionContext) -> HandlerFuture + Send + Sync>;
/// Validators run synchronously on the connection task, before admission.
pub type Validator = Box<dyn Fn(&Value) -> Result<Value, CommandError> + Send + Sync>;

pub struct CommandDefinition {
    pub name: &'static str,
    /// Satisfied by wildcard or any single overlap. Empty means
    /// authentication alone suffices.
    pub required_scopes: Vec<String>,
    /// Normalises and checks the payload; the returned value is what the
    /// handler receives.
    pub validator: Option<Validator>,
    pub handler: Handler,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDefinition>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: CommandDefinition) {
        self.commands.insert(def.name, def);
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }
}
