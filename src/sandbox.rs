mod backend;
mod host;
mod lxc;

pub use backend::SandboxBackend;
pub use host::HostBackend;
pub use lxc::LxcBackend;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, SandboxConfig};
use crate::error::SandboxError;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Restart retries were exhausted; the next execution tries again
    Degraded(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct SandboxInstance {
    name: String,
    state: SandboxState,
    /// Set by the last holder; the instance must not run anything else
    needs_restart: bool,
}

/// Owner of the single ephemeral sandbox.
///
/// Every use of the sandbox (running code, starting, stopping, recycling)
/// goes through [`Sandbox::lock`], so exactly one of them happens at a time.
pub struct Sandbox {
    backend: Arc<dyn SandboxBackend>,
    staging_dir: PathBuf,
    policy: RetryPolicy,
    instance: Mutex<SandboxInstance>,
    health: RwLock<Health>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Exclusive access to the sandbox, held for a whole execution or restart
pub struct SandboxGuard<'a> {
    sandbox: &'a Sandbox,
    instance: MutexGuard<'a, SandboxInstance>,
}

/// Creates the backend selected in the configuration
pub fn create_backend(config: &BackendConfig) -> Arc<dyn SandboxBackend> {
    match config {
        BackendConfig::Lxc(lxc) => {
            log::info!("Using lxc backend with base container {}", lxc.base_container);
            Arc::new(LxcBackend::new(lxc))
        }
        BackendConfig::Host => {
            log::info!("Using host backend (no isolation)");
            Arc::new(HostBackend::new())
        }
    }
}

impl Sandbox {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        staging_dir: impl Into<PathBuf>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            staging_dir: staging_dir.into(),
            policy,
            instance: Mutex::new(SandboxInstance {
                name: String::new(),
                state: SandboxState::Stopped,
                needs_restart: false,
            }),
            health: RwLock::new(Health::Healthy),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> anyhow::Result<Self> {
        let staging_dir = config.staging_dir()?;
        Ok(Self::new(
            create_backend(&config.backend),
            staging_dir,
            RetryPolicy {
                limit: config.restart_limit,
                backoff: Duration::from_millis(config.restart_backoff.0),
            },
        ))
    }

    /// Waits for exclusive access. No ordering between waiters is promised.
    pub async fn lock(&self) -> SandboxGuard<'_> {
        SandboxGuard {
            sandbox: self,
            instance: self.instance.lock().await,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn health(&self) -> Health {
        self.health.read().clone()
    }

    /// Number of successful starts so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Name and state of the current instance, or `None` while the sandbox
    /// is in use
    pub fn try_snapshot(&self) -> Option<(String, SandboxState)> {
        self.instance
            .try_lock()
            .ok()
            .map(|i| (i.name.clone(), i.state))
    }

    /// Recycles the sandbox in a detached task once it has been marked with
    /// [`SandboxGuard::mark_for_restart`].
    ///
    /// Whoever takes the lock first performs the restart: this task, or the
    /// next execution through [`SandboxGuard::ensure_running`].
    pub fn schedule_restart(self: &Arc<Self>) -> JoinHandle<()> {
        let sandbox = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = sandbox.shutdown.cancelled() => {
                    log::info!("Shutdown in progress, skipping scheduled sandbox restart");
                }
                mut guard = sandbox.lock() => {
                    if !guard.needs_restart() {
                        log::debug!("Sandbox {} was already recycled", guard.name());
                        return;
                    }
                    if let Err(e) = guard.restart().await {
                        log::error!("Scheduled sandbox restart failed: {e}");
                    }
                }
            }
        })
    }

    /// Cancels pending restarts and stops the current instance
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.lock().await.stop().await;
    }

    fn set_health(&self, health: Health) {
        *self.health.write() = health;
    }
}

impl SandboxGuard<'_> {
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn state(&self) -> SandboxState {
        self.instance.state
    }

    pub fn is_running(&self) -> bool {
        self.instance.state == SandboxState::Running
    }

    /// Retires the current instance. Nothing runs in it again; the next
    /// holder restarts the sandbox first.
    pub fn mark_for_restart(&mut self) {
        self.instance.needs_restart = true;
    }

    pub fn needs_restart(&self) -> bool {
        self.instance.needs_restart
    }

    pub fn sandbox(&self) -> &Sandbox {
        self.sandbox
    }

    /// Launches a fresh instance under a newly generated name
    pub async fn start(&mut self) -> Result<(), SandboxError> {
        let name = generate_name();
        self.instance.name = name.clone();
        self.instance.state = SandboxState::Starting;
        log::info!("Starting {} sandbox {name}", self.sandbox.backend.kind());

        let backend = Arc::clone(&self.sandbox.backend);
        let staging_dir = self.sandbox.staging_dir.clone();
        let launch_name = name.clone();
        let result = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&staging_dir).map_err(|e| SandboxError::Start {
                name: launch_name.clone(),
                reason: format!("cannot create {}: {e}", staging_dir.display()),
            })?;
            backend.launch(&launch_name, &staging_dir)
        })
        .await
        .unwrap_or_else(|e| {
            Err(SandboxError::Start {
                name: name.clone(),
                reason: format!("launch task failed: {e}"),
            })
        });

        match result {
            Ok(()) => {
                self.instance.state = SandboxState::Running;
                self.instance.needs_restart = false;
                self.sandbox.generation.fetch_add(1, Ordering::SeqCst);
                log::info!("Sandbox {name} is running");
                Ok(())
            }
            Err(e) => {
                self.instance.state = SandboxState::Stopped;
                Err(e)
            }
        }
    }

    /// Forcefully terminates the current instance. Never fails.
    pub async fn stop(&mut self) {
        if self.instance.name.is_empty() {
            self.instance.state = SandboxState::Stopped;
            return;
        }

        let name = self.instance.name.clone();
        self.instance.state = SandboxState::Stopping;
        log::info!("Stopping sandbox {name}");

        let backend = Arc::clone(&self.sandbox.backend);
        let destroy_name = name.clone();
        match tokio::task::spawn_blocking(move || backend.destroy(&destroy_name)).await {
            Ok(Ok(())) => log::debug!("Sandbox {name} stopped"),
            Ok(Err(e)) => log::warn!("Ignoring failure while stopping sandbox: {e}"),
            Err(e) => log::warn!("Stop task for sandbox {name} failed: {e}"),
        }
        self.instance.state = SandboxState::Stopped;
    }

    /// Stop then start, retried according to the sandbox's [`RetryPolicy`].
    ///
    /// Exhausting the retries marks the sandbox degraded instead of taking
    /// the process down.
    pub async fn restart(&mut self) -> Result<(), SandboxError> {
        let policy = self.sandbox.policy;
        let mut last = String::new();

        for attempt in 1..=policy.limit {
            self.stop().await;
            match self.start().await {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("Sandbox started on attempt {attempt}");
                    }
                    self.sandbox.set_health(Health::Healthy);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Sandbox start attempt {attempt}/{} failed: {e}", policy.limit);
                    last = e.to_string();
                }
            }
            if attempt < policy.limit {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        let err = SandboxError::RestartExhausted {
            attempts: policy.limit,
            last,
        };
        log::error!("Sandbox is degraded: {err}");
        self.sandbox.set_health(Health::Degraded(err.to_string()));
        Err(err)
    }

    /// Restarts the sandbox unless it is running and not marked for restart
    pub async fn ensure_running(&mut self) -> Result<(), SandboxError> {
        if self.needs_restart() {
            log::info!("Sandbox {} is retired, restarting before use", self.name());
        } else if self.is_running() {
            return Ok(());
        } else {
            log::info!("Sandbox is not running, trying to recover");
        }
        self.restart().await
    }
}

fn generate_name() -> String {
    format!("runner-{}", uuid::Uuid::new_v4().simple())
}
