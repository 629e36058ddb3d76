//! Error types for the tabforge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all tabforge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Pipeline errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Errors produced by tool handlers.
///
/// Every variant is recoverable from the model's point of view: the stage
/// loop renders it as an error tool-result and asks the model to correct
/// itself. Nothing here aborts a stage.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Script exited with code {exit_code}.\nSTDERR:\n{stderr}")]
    ScriptFailed { exit_code: i32, stderr: String },

    #[error("Script timed out after {timeout_secs}s")]
    ScriptTimeout { timeout_secs: u64 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage finished without its promised report file. The one genuinely
    /// fatal condition in the system.
    #[error("Stage '{stage}' produced no report at {path}")]
    MissingReport { stage: String, path: String },

    #[error("Stage '{stage}' failed to start: {reason}")]
    StageEntry { stage: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn script_failure_carries_stderr() {
        let err = ToolError::ScriptFailed {
            exit_code: 1,
            stderr: "NameError: name 'pd' is not defined".into(),
        };
        assert!(err.to_string().contains("NameError"));
        assert!(err.to_string().contains("code 1"));
    }

    #[test]
    fn missing_report_names_the_stage() {
        let err = Error::Pipeline(PipelineError::MissingReport {
            stage: "cleaning".into(),
            path: "data/cleaning_report.json".into(),
        });
        assert!(err.to_string().contains("cleaning"));
        assert!(err.to_string().contains("no report"));
    }
}
