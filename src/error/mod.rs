//! Error types for confab.

pub mod category;

pub use category::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all confab operations.
#[derive(Error, Debug)]
pub enum ConfabError {
    /// Invalid or ambiguous setup, raised before any network activity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A tool provider failed its handshake or could not be reached.
    #[error("Tool provider unavailable: {provider}: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool {tool_name} returned unsupported {content_type} content")]
    UnsupportedContent {
        tool_name: String,
        content_type: String,
    },

    /// A conversation invariant was broken (e.g. an unanswered tool call).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Hook failed for tool {tool_name}: {message}")]
    HookFailed { tool_name: String, message: String },

    #[error("Tool loop exceeded {0} rounds")]
    RoundLimitExceeded(usize),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl ConfabError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::MissingCredential(_) => ErrorCategory::Configuration,
            Self::ProviderUnavailable { .. } => ErrorCategory::ProviderUnavailable,
            Self::UnknownTool(_) => ErrorCategory::UnknownTool,
            Self::ToolExecution { .. } | Self::UnsupportedContent { .. } => {
                ErrorCategory::ToolExecution
            }
            Self::HookFailed { .. } => ErrorCategory::Hook,
            Self::ProtocolViolation(_) | Self::InvalidState(_) => ErrorCategory::Invariant,
            Self::Network(_) | Self::Stream(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit
            | ErrorCategory::Network
            | ErrorCategory::Server
            | ErrorCategory::ProviderUnavailable => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution | ErrorCategory::Hook | ErrorCategory::UnknownTool => {
                RecoverySuggestion::CheckToolImplementation
            }
            _ => RecoverySuggestion::ReportBug,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ConfabError>;
