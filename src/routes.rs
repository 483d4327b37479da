mod health;
mod run;

pub use health::*;
pub use run::*;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder};

use crate::error::RunError;
use crate::output::ExecutionResult;

/// Malformed bodies still get an in-band `{success, output}` answer
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected request body: {err}");
    let response = with_run_cors(HttpResponse::BadRequest())
        .json(ExecutionResult::failure(RunError::Protocol(err.to_string())));
    InternalError::from_response(err, response).into()
}

/// CORS headers of the `/run/{language}` resource. The allowed origin is
/// added to every response by the server's default headers.
pub fn with_run_cors(mut builder: HttpResponseBuilder) -> HttpResponseBuilder {
    builder
        .insert_header(("Access-Control-Allow-Methods", "POST, OPTIONS"))
        .insert_header(("Access-Control-Allow-Headers", "Content-Type"));
    builder
}
