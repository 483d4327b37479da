use std::path::Path;
use std::process::Command;

use crate::error::SandboxError;

/// The isolation tooling behind a [`super::Sandbox`].
///
/// `launch` and `destroy` block on external tools and are always called
/// from the blocking thread pool.
pub trait SandboxBackend: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Creates a fresh instance called `name` with `staging_dir` bind-mounted
    /// at the same path inside it
    fn launch(&self, name: &str, staging_dir: &Path) -> Result<(), SandboxError>;

    /// Forcefully terminates the instance. Callers treat errors as
    /// best-effort and only log them.
    fn destroy(&self, name: &str) -> Result<(), SandboxError>;

    /// Builds the host-side command that runs `argv` inside the instance.
    /// `argv` is never empty.
    fn attach(&self, name: &str, argv: &[String]) -> Command;
}

/// Renders captured output of a failed tool invocation for error messages
pub(super) fn describe_failure(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{}", output.status)
    } else {
        format!("{}: {stderr}", output.status)
    }
}
