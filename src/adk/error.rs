// SPDX-License-Identifier: MIT

//! Typed error handling for nowwhat-rs
//!
//! Three families matter to callers:
//! - [`GraphError`] - configuration bugs in a graph definition, plus the
//!   executor's step ceiling. Never recovered.
//! - [`ModelError`] / [`SearchError`] - failures of external collaborators.
//!   Steps recover from these locally and record them in the audit trail.
//! - [`NowWhatError`] - the umbrella type everything converts into.

use crate::adk::model::TokenUsage;
use thiserror::Error;

/// Top-level error type for nowwhat-rs
#[derive(Debug, Error)]
pub enum NowWhatError {
    /// API errors from external services (OpenAI, Naver, Brave, Nominatim)
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Tool not found during execution
    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph definition or execution errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Model adapter errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Search provider errors
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Graph construction and execution errors
///
/// Everything except `StepLimitExceeded` is detected when the graph is
/// compiled, so a graph that compiles cannot hit them at run time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// No entry node was set, or the entry node is not registered
    #[error("Graph '{graph}' has no valid entry node")]
    MissingEntry { graph: String },

    /// An edge references a node that does not exist
    #[error("Edge {from} -> {to} references unknown node '{to}'")]
    UnknownNode { from: String, to: String },

    /// An edge starts at a node that does not exist
    #[error("Edge declared from unknown node '{0}'")]
    UnknownSource(String),

    /// Two nodes were registered under one name
    #[error("Node '{0}' registered twice")]
    DuplicateNode(String),

    /// A node has no outgoing edge
    #[error("Node '{0}' has no outgoing edge")]
    MissingEdge(String),

    /// A node has more than one outgoing edge definition
    #[error("Node '{0}' has more than one outgoing edge")]
    DuplicateEdge(String),

    /// A routing label has no successor in the edge map
    #[error("Route label '{label}' of node '{node}' has no successor")]
    UnmappedRoute { node: String, label: String },

    /// A routing predicate produced a label the edge map does not know
    #[error("Route label '{label}' of node '{node}' is not registered")]
    UnknownRoute { node: String, label: String },

    /// The step ceiling is below the longest path a guarded run can take
    #[error("Graph '{graph}' step limit {limit} is below the {needed} steps a bounded run needs")]
    StepLimitTooLow {
        graph: String,
        limit: usize,
        needed: usize,
    },

    /// The executor ran more steps than the graph allows
    #[error("Graph '{graph}' exceeded the step limit of {limit}")]
    StepLimitExceeded { graph: String, limit: usize },
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Credentials rejected by the provider
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Account quota exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// Model answered, but not in the requested shape. The tokens of
    /// the rejected reply were still billed.
    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String, usage: TokenUsage },

    /// Network-level failure talking to the provider
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ModelError {
    /// True for failures that retrying with a different prompt cannot fix
    pub fn is_quota_or_auth(&self) -> bool {
        matches!(
            self,
            ModelError::ApiKeyMissing(_)
                | ModelError::Unauthorized(_)
                | ModelError::RateLimited { .. }
                | ModelError::QuotaExceeded(_)
        )
    }

    /// Tokens billed for a call that still failed
    pub fn spent_usage(&self) -> Option<TokenUsage> {
        match self {
            ModelError::MalformedOutput { usage, .. } if usage.total() > 0 => Some(*usage),
            _ => None,
        }
    }

    /// Attach the usage of the reply that produced this error
    pub fn with_usage(self, spent: TokenUsage) -> Self {
        match self {
            ModelError::MalformedOutput { message, .. } => ModelError::MalformedOutput {
                message,
                usage: spent,
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

/// Search provider errors
#[derive(Debug, Error)]
pub enum SearchError {
    /// Provider credentials are not configured
    #[error("Credentials missing for {0}")]
    MissingCredentials(String),

    /// Request could not be sent
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    /// Provider response did not have the expected shape
    #[error("Invalid response from {provider}: {message}")]
    Decode { provider: String, message: String },

    /// Every query of the batch failed
    #[error("All {0} queries failed")]
    AllQueriesFailed(usize),
}

impl NowWhatError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a tool not found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for NowWhatError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for NowWhatError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
