//! Error types for the playground engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a turn or reject a call before it starts
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (network failure, connection reset, timeout at transport level)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (missing API key, endpoint, unknown provider)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Non-2xx response from the model provider
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Provider answered 2xx but the body did not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Failure of a single tool call.
///
/// These never abort a turn: the orchestrator turns them into the content of a
/// `tool` message so the model can react to the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolExecutionError {
    /// Arguments were not valid JSON or not a JSON object
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The bound HTTP request failed (network error or non-2xx status)
    #[error("{}", request_failed_message(*status, message))]
    RequestFailed { status: Option<u16>, message: String },

    /// The model referenced a function name no active tool carries
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),
}

fn request_failed_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Tool request failed with status {}: {}", code, message),
        None => format!("Tool request failed: {}", message),
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Non-2xx provider answer; `body` is the raw response text
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedResponse(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// True for failures that come from talking to the model provider.
    ///
    /// A provider error aborts the current turn but keeps the partial assistant
    /// content, marked as retryable.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Api { .. }
                | Error::MalformedResponse(_)
                | Error::Stream(_)
                | Error::Timeout
        )
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            Error::Tool(ToolExecutionError::RequestFailed { status, .. }) => *status,
            _ => None,
        }
    }
}

impl ToolExecutionError {
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        ToolExecutionError::InvalidArguments(msg.into())
    }

    pub fn request_failed(status: Option<u16>, msg: impl Into<String>) -> Self {
        ToolExecutionError::RequestFailed {
            status,
            message: msg.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        ToolExecutionError::ToolNotFound(name.into())
    }
}
