use thiserror::Error;

/// Errors surfaced by the core.
///
/// Read paths (listing, trees, audits, remote checks) swallow most of these and
/// degrade to empty values; mutating operations and the repository manifest
/// fetch propagate them.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected input: package name, URL, branch or workspace. Raised before
    /// any process is spawned or request is sent.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    Execution {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
