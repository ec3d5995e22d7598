use crate::types::{ExecutionState, SourceLocation};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    /// Malformed script source.
    #[error("compile error: {message}")]
    Compile {
        message: String,
        location: Option<SourceLocation>,
    },

    /// Two capabilities (or one capability twice) export the same name.
    #[error("host function \"{name}\" is exported by both \"{first}\" and \"{second}\"")]
    DuplicateExport {
        name: String,
        first: String,
        second: String,
    },

    /// A capability export shadows an engine built-in.
    #[error("capability \"{capability}\" cannot export reserved name \"{name}\"")]
    ReservedExport { name: String, capability: String },

    /// Any error raised while the script runs, host call failures included.
    #[error("script error: {message}")]
    Runtime { message: String },

    /// The evaluator could not be prepared (state creation, built-in fragments).
    #[error("script context error: {message}")]
    Context { message: String },

    #[error("cannot {operation} while engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: ExecutionState,
    },

    /// Violation of the single-suspension rule.
    #[error("continuation store: {message}")]
    Store { message: String },

    /// A named text resource (script source) could not be loaded.
    #[error("cannot load \"{name}\": {message}")]
    Source { name: String, message: String },
}

impl ScriptError {
    pub fn compile(message: impl Into<String>) -> Self {
        let message = message.into();
        let location = SourceLocation::from_diagnostic(&message);
        Self::Compile { message, location }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn context(message: impl Into<String>) -> Self {
        Self::Context {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn resource(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile { .. } => "ENGINE_COMPILE",
            Self::DuplicateExport { .. } => "ENGINE_HOST_FUNCTION_DUPLICATE",
            Self::ReservedExport { .. } => "ENGINE_HOST_FUNCTION_RESERVED",
            Self::Runtime { .. } => "ENGINE_RUNTIME",
            Self::Context { .. } => "ENGINE_CONTEXT",
            Self::InvalidState { .. } => "ENGINE_INVALID_STATE",
            Self::Store { .. } => "ENGINE_CONTINUATION_STORE",
            Self::Source { .. } => "API_SOURCE_LOAD",
        }
    }

    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Self::Compile { location, .. } => *location,
            _ => None,
        }
    }
}

/// Failure reported by a capability method; surfaces in the script as a runtime error.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct HostCallError {
    pub message: String,
}

impl HostCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
