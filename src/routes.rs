use actix_web::error::{InternalError, JsonPayloadError, UrlencodedError};
use actix_web::{Either, HttpRequest, HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use crate::playground::{Playground, Request};

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

/// Form-encoded submission; only `version=2` carries the source this way
#[derive(Deserialize)]
pub struct FormRequest {
    pub version: String,
    pub body: String,
}

fn invalid_argument() -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::debug!("error decoding request: {err}");
    InternalError::from_response(err, invalid_argument()).into()
}

pub fn form_error_handler(err: UrlencodedError, _req: &HttpRequest) -> actix_web::Error {
    log::debug!("error decoding form request: {err}");
    InternalError::from_response(err, invalid_argument()).into()
}

#[post("/compile")]
pub async fn compile_handler(
    playground: web::Data<Playground>,
    payload: Either<web::Form<FormRequest>, web::Json<Request>>,
) -> impl Responder {
    let request = match payload {
        Either::Left(form) => {
            let FormRequest { version, body } = form.into_inner();
            if version != "2" {
                log::debug!("Unsupported form request version {version:?}");
                return invalid_argument();
            }
            Request { body }
        }
        Either::Right(json) => json.into_inner(),
    };

    match playground.compile_and_run(&request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => {
            log::error!("Failed to compile and run submission: {e:#}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
