use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::engine;
use crate::error::RunError;
use crate::gate::AdmissionGate;
use crate::language::{Language, LanguageProfile, LanguageRegistry};
use crate::output::{self, ExecutionResult};
use crate::sandbox::{Sandbox, SandboxGuard};
use crate::staging;

/// One submission to run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
    pub unit_test: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub output_limit: usize,
}

/// Service object owning everything an execution needs.
///
/// Built once at startup and shared by all request handlers.
pub struct Runner {
    registry: LanguageRegistry,
    gate: AdmissionGate,
    sandbox: Arc<Sandbox>,
    limits: Limits,
}

impl Runner {
    pub fn new(
        registry: LanguageRegistry,
        gate: AdmissionGate,
        sandbox: Arc<Sandbox>,
        limits: Limits,
    ) -> Self {
        Self {
            registry,
            gate,
            sandbox,
            limits,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry =
            LanguageRegistry::builtin(&config.sandbox.wrapper, &config.sandbox.assets_dir);
        let sandbox = Arc::new(Sandbox::from_config(&config.sandbox)?);
        Ok(Self::new(
            registry,
            AdmissionGate::new(config.runner.max_outstanding),
            sandbox,
            Limits {
                timeout: Duration::from_millis(config.runner.timeout.0),
                output_limit: config.runner.output_limit.0,
            },
        ))
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// Runs the request in its own task and waits for it.
    ///
    /// Dropping the returned future (e.g. when the client disconnects) does
    /// not cancel the execution; once admitted it runs to completion.
    pub async fn execute_detached(self: Arc<Self>, request: ExecutionRequest) -> ExecutionResult {
        match tokio::spawn(async move { self.execute(request).await }).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Execution task failed: {e}");
                ExecutionResult::failure(RunError::Task(e.to_string()))
            }
        }
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let tag = request_tag();
        log::info!(
            "[{tag}] {} submission received ({} bytes code, {} bytes test)",
            request.language,
            request.code.len(),
            request.unit_test.len()
        );

        let profile = match self.registry.get(request.language) {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("[{tag}] {e}");
                return ExecutionResult::failure(e);
            }
        };

        let _token = self.gate.acquire().await;
        log::debug!("[{tag}] admitted ({} in flight)", self.gate.in_flight());

        let mut guard = self.sandbox.lock().await;
        let (result, recycle) = match self.execute_locked(&tag, profile, &request, &mut guard).await
        {
            Ok(result) => {
                let recycle = !result.success || profile.recycle_after_run;
                (result, recycle)
            }
            Err(e) => {
                log::warn!("[{tag}] execution failed: {e}");
                // An unavailable sandbox was just retried; don't queue another round
                let recycle = !matches!(e, RunError::Sandbox(_));
                (ExecutionResult::failure(e), recycle)
            }
        };

        // Marked under the lock: a waiter that beats the restart task to the
        // lock restarts the sandbox itself
        if recycle {
            guard.mark_for_restart();
        }
        drop(guard);
        if recycle {
            log::info!("[{tag}] recycling the sandbox");
            self.sandbox.schedule_restart();
        }

        result
    }

    async fn execute_locked(
        &self,
        tag: &str,
        profile: &LanguageProfile,
        request: &ExecutionRequest,
        guard: &mut SandboxGuard<'_>,
    ) -> Result<ExecutionResult, RunError> {
        guard.ensure_running().await?;

        let staged = staging::stage(&request.code, &request.unit_test)?;
        let staging_dir = self.sandbox.staging_dir();
        staging::materialize(profile, &staged, staging_dir)?;

        let plan = profile.plan(staging_dir);
        let started = Instant::now();
        let status = engine::run(
            self.sandbox.backend(),
            guard.name(),
            &plan,
            staged.output.as_file(),
            self.limits.timeout,
        )
        .await;
        log::info!(
            "[{tag}] ran in sandbox {} for {:?}: {status:?}",
            guard.name(),
            started.elapsed()
        );

        let mut reader = staged.output.as_file();
        Ok(output::collect(&mut reader, self.limits.output_limit, &status))
    }
}

/// Short random prefix tying together the log lines of one request
fn request_tag() -> String {
    let mut tag = uuid::Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}
