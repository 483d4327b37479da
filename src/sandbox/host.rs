use std::path::Path;
use std::process::Command;

use crate::error::SandboxError;

use super::backend::SandboxBackend;

const HOST_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs submissions directly on the host.
///
/// Provides the same environment hygiene as the container backend but no
/// isolation at all. Intended for development and tests only.
pub struct HostBackend;

impl HostBackend {
    pub fn new() -> Self {
        log::warn!("HostBackend provides NO isolation - use only in trusted environments");
        Self
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxBackend for HostBackend {
    fn kind(&self) -> &'static str {
        "host"
    }

    fn launch(&self, _name: &str, _staging_dir: &Path) -> Result<(), SandboxError> {
        Ok(())
    }

    fn destroy(&self, _name: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    fn attach(&self, _name: &str, argv: &[String]) -> Command {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).env_clear().env("PATH", HOST_PATH);
        if let Ok(term) = std::env::var("TERM") {
            cmd.env("TERM", term);
        }
        cmd
    }
}
