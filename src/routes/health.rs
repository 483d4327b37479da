use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::runner::Runner;
use crate::sandbox::{Health, SandboxState};

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub healthy: bool,
    pub reason: Option<String>,
    /// `None` while an execution or restart holds the sandbox
    pub sandbox: Option<String>,
    pub state: Option<SandboxState>,
    pub generation: u64,
    pub in_flight: usize,
}

/// Liveness probe; answers even when the sandbox is down
#[get("/ping")]
pub async fn ping_handler() -> impl Responder {
    "pong"
}

#[get("/health")]
pub async fn health_handler(runner: web::Data<Runner>) -> impl Responder {
    let sandbox = runner.sandbox();
    let (healthy, reason) = match sandbox.health() {
        Health::Healthy => (true, None),
        Health::Degraded(reason) => (false, Some(reason)),
    };
    let (name, state) = sandbox.try_snapshot().unzip();

    let body = HealthResponse {
        healthy,
        reason,
        sandbox: name,
        state,
        generation: sandbox.generation(),
        in_flight: runner.gate().in_flight(),
    };

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
