//! Shared response builder for every broker endpoint

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use safesend_core::types::ErrorBody;
use safesend_core::SafesendError;
use serde::Serialize;

/// Message sent for every failure that is not the caller's fault
const INTERNAL_ERROR_MESSAGE: &str = "internal error, please retry later";

/// JSON body with the CORS header set attached.
pub fn json<T: Serialize>(status: StatusCode, cors: &[(&'static str, String)], body: &T) -> Response {
    with_cors((status, Json(body)).into_response(), cors)
}

/// Map an error to its status and a body that never carries secrets.
///
/// Validation messages go back verbatim; everything else is logged here and
/// answered generically.
pub fn error(err: &SafesendError, cors: &[(&'static str, String)]) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match err {
        SafesendError::Validation(_) | SafesendError::OriginRejected => err.to_string(),
        _ => {
            tracing::error!(error = %err, "grant request failed");
            INTERNAL_ERROR_MESSAGE.to_string()
        }
    };
    json(status, cors, &ErrorBody { error: message })
}

/// Empty preflight answer.
pub fn preflight(status: StatusCode, cors: &[(&'static str, String)]) -> Response {
    with_cors(status.into_response(), cors)
}

fn with_cors(mut response: Response, cors: &[(&'static str, String)]) -> Response {
    let headers = response.headers_mut();
    for (name, value) in cors {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(*name), value);
            }
            Err(_) => tracing::warn!(header = *name, "dropping unrepresentable CORS header value"),
        }
    }
    response
}
