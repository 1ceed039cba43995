use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::executor::VmError;

/// Why a chunk failed, as recorded on the chunk
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The chunk history was inconsistent with what evaluation expected
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Session closed")]
    SessionClosed,
}

impl EngineError {
    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::Invariant(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Rendered parse or resolution error, caret line included
    #[error("{0}")]
    Syntax(String),

    #[error("Invalid bytecode: {0}")]
    Bytecode(String),

    #[error("Compiler unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("{capability}(): {message}")]
    InvalidArguments { capability: String, message: String },

    #[error("{capability}() timed out after {}ms", .timeout.as_millis())]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    #[error("{capability}() failed: {message}")]
    Failed { capability: String, message: String },

    #[error("Unknown capability: {0}")]
    Unknown(String),
}

impl CapabilityError {
    pub fn invalid(capability: &str, message: impl Into<String>) -> Self {
        CapabilityError::InvalidArguments {
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    pub fn failed(capability: &str, message: impl ToString) -> Self {
        CapabilityError::Failed {
            capability: capability.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = EngineError::from(RuntimeError::from(CapabilityError::Timeout {
            capability: "sleep".to_string(),
            timeout: Duration::from_millis(1500),
        }));
        assert_eq!(err.to_string(), "Runtime error: sleep() timed out after 1500ms");

        let err = EngineError::from(RuntimeError::from(VmError::Exception("Division by zero".to_string())));
        assert_eq!(err.to_string(), "Runtime error: Division by zero");

        let err = EngineError::from(CompileError::Syntax("bad".to_string()));
        assert_eq!(err.to_string(), "Compile error: bad");
    }
}
