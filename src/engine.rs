use std::fs::File;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};

use crate::sandbox::SandboxBackend;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    /// The deadline fired first and the process group was killed
    Timeout,
    /// Non-zero exit, death by signal, or failure to launch
    ProcessError(String),
}

/// How long a killed process may take to be reaped before the sandbox
/// itself is torn down
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Runs every invocation of `plan` inside the sandbox, in order, sharing one
/// deadline. The first invocation that does not succeed ends the chain, so
/// a failed compile never reaches the run step.
///
/// stdout and stderr of every invocation go to `output`.
///
/// On timeout the host-side process group is sent SIGKILL. That needs
/// permission to signal the attach process, which a `sudo` command prefix
/// takes away from an unprivileged service. When the process is not gone
/// after [`KILL_GRACE`], the sandbox is destroyed through the backend and
/// the caller must recycle it before the next use.
pub async fn run(
    backend: &Arc<dyn SandboxBackend>,
    sandbox_name: &str,
    plan: &[Vec<String>],
    output: &File,
    timeout: Duration,
) -> Status {
    run_with_kill(backend, sandbox_name, plan, output, timeout, kill_process_group).await
}

async fn run_with_kill(
    backend: &Arc<dyn SandboxBackend>,
    sandbox_name: &str,
    plan: &[Vec<String>],
    output: &File,
    timeout: Duration,
    kill: fn(u32),
) -> Status {
    let deadline = Instant::now() + timeout;

    for argv in plan {
        if Instant::now() >= deadline {
            return Status::Timeout;
        }
        let status = run_step(backend, sandbox_name, argv, output, deadline, kill).await;
        if status != Status::Success {
            return status;
        }
    }

    Status::Success
}

async fn run_step(
    backend: &Arc<dyn SandboxBackend>,
    sandbox_name: &str,
    argv: &[String],
    output: &File,
    deadline: Instant,
    kill: fn(u32),
) -> Status {
    if argv.is_empty() {
        return Status::ProcessError("empty command".to_string());
    }

    let (stdout, stderr) = match (output.try_clone(), output.try_clone()) {
        (Ok(stdout), Ok(stderr)) => (stdout, stderr),
        (Err(e), _) | (_, Err(e)) => {
            return Status::ProcessError(format!("cannot redirect output: {e}"));
        }
    };

    let mut cmd = backend.attach(sandbox_name, argv);
    cmd.stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0);
    let mut cmd = tokio::process::Command::from(cmd);
    cmd.kill_on_drop(true);

    log::debug!("Running {:?} in sandbox {sandbox_name}", argv);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Status::ProcessError(format!("failed to start {}: {e}", argv[0])),
    };
    let pid = child.id();

    match timeout_at(deadline, child.wait()).await {
        Ok(Ok(exit)) if exit.success() => Status::Success,
        Ok(Ok(exit)) => Status::ProcessError(describe_exit(exit)),
        Ok(Err(e)) => Status::ProcessError(format!("failed to wait for process: {e}")),
        Err(_) => {
            log::info!("Process {pid:?} exceeded its deadline, killing its process group");
            if let Some(pid) = pid {
                kill(pid);
            }
            if reap(&mut child).await {
                return Status::Timeout;
            }

            log::warn!("Process {pid:?} survived SIGKILL, destroying sandbox {sandbox_name}");
            destroy_sandbox(backend, sandbox_name).await;
            if !reap(&mut child).await {
                // Dropping the child retries the kill; the orphan is reaped
                // by the runtime whenever it exits.
                log::error!("Abandoning unreaped process {pid:?}");
            }
            Status::Timeout
        }
    }
}

/// Waits up to [`KILL_GRACE`] for a killed child. Returns false if it is
/// still running.
async fn reap(child: &mut tokio::process::Child) -> bool {
    match timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            log::warn!("Failed to reap killed process: {e}");
            true
        }
        Err(_) => false,
    }
}

async fn destroy_sandbox(backend: &Arc<dyn SandboxBackend>, sandbox_name: &str) {
    let backend = Arc::clone(backend);
    let name = sandbox_name.to_string();
    match tokio::task::spawn_blocking(move || backend.destroy(&name)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Emergency sandbox teardown failed: {e}"),
        Err(e) => log::error!("Emergency sandbox teardown task failed: {e}"),
    }
}

/// Sends SIGKILL to every process in the group led by `pid`
fn kill_process_group(pid: u32) {
    // SAFETY: killpg has no memory-safety preconditions
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc == -1 {
        let errno = std::io::Error::last_os_error();
        // ESRCH: already gone
        if errno.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("SIGKILL to process group {pid} failed: {errno}");
        }
    }
}

fn describe_exit(exit: ExitStatus) -> String {
    match (exit.code(), exit.signal()) {
        (Some(code), _) => format!("exit status {code}"),
        (None, Some(signal)) => format!("signal: {signal}"),
        (None, None) => exit.to_string(),
    }
}
