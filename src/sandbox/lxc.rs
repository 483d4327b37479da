use std::path::Path;
use std::process::Command;

use crate::config::LxcConfig;
use crate::error::SandboxError;

use super::backend::{SandboxBackend, describe_failure};

/// Ephemeral LXC containers cloned from a base container.
///
/// Every lxc tool call can be prefixed (e.g. `sudo` or
/// `ssh ubuntu@localhost`) when the service itself lacks the privileges.
/// A remote-shell prefix re-parses the arguments, so prefer `sudo`.
///
/// Timeouts kill the host-side `lxc-attach` process group. Under a `sudo`
/// prefix that group belongs to root and an unprivileged service cannot
/// signal it; the engine then falls back to [`SandboxBackend::destroy`],
/// which runs with the prefix's privileges.
pub struct LxcBackend {
    base: String,
    prefix: Vec<String>,
    uid: Option<u32>,
    gid: Option<u32>,
    stop_timeout: u32,
}

impl LxcBackend {
    pub fn new(config: &LxcConfig) -> Self {
        Self {
            base: config.base_container.clone(),
            prefix: config.command_prefix.clone(),
            uid: config.uid,
            gid: config.gid,
            stop_timeout: config.stop_timeout,
        }
    }

    fn lxc(&self, tool: &str) -> Command {
        match self.prefix.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(tool);
                cmd
            }
            None => Command::new(tool),
        }
    }
}

impl SandboxBackend for LxcBackend {
    fn kind(&self) -> &'static str {
        "lxc"
    }

    fn launch(&self, name: &str, staging_dir: &Path) -> Result<(), SandboxError> {
        let start_error = |reason: String| SandboxError::Start {
            name: name.to_string(),
            reason,
        };

        let output = self
            .lxc("lxc-start-ephemeral")
            .args(["-d", "-o", &self.base, "-n", name, "-b"])
            .arg(staging_dir)
            .output()
            .map_err(|e| start_error(format!("failed to spawn lxc-start-ephemeral: {e}")))?;

        if !output.status.success() {
            return Err(start_error(describe_failure(&output)));
        }

        log::debug!("lxc container {name} started from {}", self.base);
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<(), SandboxError> {
        let stop_error = |reason: String| SandboxError::Stop {
            name: name.to_string(),
            reason,
        };

        let output = self
            .lxc("lxc-stop")
            .args(["--kill", "--timeout", &self.stop_timeout.to_string(), "--name", name])
            .output()
            .map_err(|e| stop_error(format!("failed to spawn lxc-stop: {e}")))?;

        if !output.status.success() {
            return Err(stop_error(describe_failure(&output)));
        }
        Ok(())
    }

    fn attach(&self, name: &str, argv: &[String]) -> Command {
        let mut cmd = self.lxc("lxc-attach");
        cmd.args(["-n", name, "--clear-env", "--keep-var", "TERM"]);
        if let Some(uid) = self.uid {
            cmd.arg("--uid").arg(uid.to_string());
        }
        if let Some(gid) = self.gid {
            cmd.arg("--gid").arg(gid.to_string());
        }
        cmd.arg("--").args(argv);
        cmd
    }
}
