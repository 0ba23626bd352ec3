use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
    pub message: String,
}

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, payload: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_string(payload)?.into())
        .map_err(Box::new)?)
}

pub fn error_response(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> Result<Response<Body>, Error> {
    json_response(
        status,
        &ErrorResponse {
            error,
            message: message.into(),
        },
    )
}

pub fn empty_response(status: StatusCode) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

pub fn not_found() -> Result<Response<Body>, Error> {
    error_response(StatusCode::NOT_FOUND, "NotFound", "Not found")
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "Method not allowed")
}
