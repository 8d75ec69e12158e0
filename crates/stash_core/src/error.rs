use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ClusterId;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failure reported by a content collaborator (network, parse or remote-side).
///
/// The stash never looks inside; every `SourceError` just means "this attempt
/// failed".
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SourceError {
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum StashError {
    #[error("No content available for category '{category}'")]
    #[diagnostic(
        code(stash_core::content_unavailable),
        help(
            "Fallback synthesis was unusable ({fallback}) and the content source could not supply a first page. The stash was left unchanged; retry later."
        )
    )]
    ContentUnavailable {
        category: String,
        fallback: String,
        #[source]
        cause: SourceError,
    },

    #[error("Failed to fetch the next page of cluster {cluster} in '{category}'")]
    #[diagnostic(
        code(stash_core::page_fetch_failed),
        help("The cached cluster was left unchanged; the page can be requested again")
    )]
    PageFetchFailed {
        category: String,
        cluster: ClusterId,
        #[source]
        cause: SourceError,
    },

    #[error("Fallback synthesis failed for '{category}': {reason}")]
    #[diagnostic(
        code(stash_core::synthesis_failed),
        help("Check the allow-list configuration and the content source's detail lookup")
    )]
    SynthesisFailed { category: String, reason: String },

    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(stash_core::configuration_error),
        help("Check configuration at {config_path}\nExpected: {expected}")
    )]
    Configuration {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

impl StashError {
    pub(crate) fn configuration(
        config_path: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        cause: ConfigError,
    ) -> Self {
        Self::Configuration {
            config_path: config_path.into(),
            field: field.into(),
            expected: expected.into(),
            cause,
        }
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
