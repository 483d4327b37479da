use std::path::PathBuf;

/// Failures that end a single request with `success = false`.
///
/// Timeouts and non-zero exits are not errors; see [`crate::engine::Status`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("could not decode JSON POST request: {0}")]
    Protocol(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to stage files: {0}")]
    Staging(#[from] StagingError),

    #[error("sandbox unavailable: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("execution task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to start sandbox {name}: {reason}")]
    Start { name: String, reason: String },

    #[error("failed to stop sandbox {name}: {reason}")]
    Stop { name: String, reason: String },

    #[error("sandbox restart failed after {attempts} attempts: {last}")]
    RestartExhausted { attempts: u32, last: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("could not create temporary file: {0}")]
    TempFile(std::io::Error),

    #[error("could not prepare staging directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("could not chmod {}: {source}", path.display())]
    Chmod {
        path: PathBuf,
        source: std::io::Error,
    },
}
