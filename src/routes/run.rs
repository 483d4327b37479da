use actix_web::{HttpResponse, Responder, post, route, web};
use serde::Deserialize;

use super::with_run_cors;
use crate::language::Language;
use crate::output::ExecutionResult;
use crate::runner::{ExecutionRequest, Runner};

/// Body of `POST /run/{language}`.
///
/// Older clients also send a `recaptcha` field; unknown fields are ignored.
#[derive(Deserialize, Debug)]
pub struct RunRequest {
    pub code: String,
    pub unit_test: String,
}

#[post("/run/{language}")]
pub async fn run_handler(
    runner: web::Data<Runner>,
    language: web::Path<String>,
    body: web::Json<RunRequest>,
) -> impl Responder {
    let language = language.into_inner();
    let result = match language.parse::<Language>() {
        Ok(language) => {
            let RunRequest { code, unit_test } = body.into_inner();
            runner
                .into_inner()
                .execute_detached(ExecutionRequest {
                    language,
                    code,
                    unit_test,
                })
                .await
        }
        Err(e) => {
            log::warn!("Rejected request: {e}");
            ExecutionResult::failure(e)
        }
    };

    with_run_cors(HttpResponse::Ok()).json(result)
}

#[route("/run/{language}", method = "OPTIONS")]
pub async fn run_preflight_handler() -> impl Responder {
    with_run_cors(HttpResponse::Ok()).finish()
}
