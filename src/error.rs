//! Crate-wide error type

use regex::Error as RegexError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserCapsError {
    // Rule file errors
    #[error("{file}:{line}: {message}")]
    RuleSyntax {
        file: String,
        line: u32,
        message: String,
    },
    #[error("{file}:{line}: duplicate browser id '{id}'")]
    DuplicateId { file: String, line: u32, id: String },
    #[error("{file}:{line}: parent '{parent}' of '{id}' cannot be found")]
    UnresolvedParent {
        file: String,
        line: u32,
        id: String,
        parent: String,
    },
    #[error("{file}:{line}: circular parent reference detected at '{id}'")]
    CircularReference { file: String, line: u32, id: String },
    #[error("{file}:{line}: '{id}' would be a second root of the {tree} tree")]
    MultipleRoots {
        file: String,
        line: u32,
        id: String,
        tree: String,
    },

    // Compilation
    #[error("invalid pattern '{pattern}' in '{id}': {source}")]
    RegexCompile {
        id: String,
        pattern: String,
        #[source]
        source: RegexError,
    },
    #[error("rule cache failure: {0}")]
    RuleCacheError(String),

    // Capability lookup
    #[error("capability '{key}' has an invalid value '{value}'")]
    InvalidCapability { key: String, value: String },

    // Machine key
    #[error("machine key configuration: {0}")]
    MachineKeyConfig(String),
    /// Carries no detail about which check failed.
    #[error("unable to validate data")]
    UnableToValidateData,

    // Base errors
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("io failure: {0}")]
    Io(#[from] IoError),
    #[error("json parse failure: {0}")]
    Json(#[from] SerdeJsonError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl BrowserCapsError {
    pub(crate) fn syntax(file: &str, line: u32, message: impl Into<String>) -> Self {
        Self::RuleSyntax {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}

pub type BcResult<T> = Result<T, BrowserCapsError>;
