//! Grant endpoints
//!
//!   GET     /generate-upload-url?filename=<name>
//!   GET     /generate-download-url?key=<locator>
//!   OPTIONS on both paths answers the CORS preflight

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use safesend_core::SafesendError;
use serde::Deserialize;

use crate::broker::ObjectBroker;
use crate::origin::OriginDecision;
use crate::response;

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    key: Option<String>,
}

pub fn router(broker: Arc<ObjectBroker>) -> Router {
    Router::new()
        .route(
            "/generate-upload-url",
            get(generate_upload_url).options(preflight),
        )
        .route(
            "/generate-download-url",
            get(generate_download_url).options(preflight),
        )
        .with_state(broker)
}

fn caller_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(ORIGIN).and_then(|v| v.to_str().ok())
}

/// A query string that does not deserialize is the caller's mistake, but
/// only once the origin has been accepted.
fn query_error(
    broker: &ObjectBroker,
    origin: Option<&str>,
    rejection: QueryRejection,
) -> SafesendError {
    match broker.authorize(origin) {
        Ok(()) => SafesendError::validation(format!(
            "malformed query string: {}",
            rejection.body_text()
        )),
        Err(e) => e,
    }
}

async fn generate_upload_url(
    State(broker): State<Arc<ObjectBroker>>,
    headers: HeaderMap,
    query: Result<Query<UploadQuery>, QueryRejection>,
) -> Response {
    let origin = caller_origin(&headers);
    let cors = broker.guard().cors_headers(origin);
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return response::error(&query_error(&broker, origin, rejection), &cors)
        }
    };
    match broker
        .request_upload_grant(query.filename.as_deref(), origin)
        .await
    {
        Ok(body) => response::json(StatusCode::OK, &cors, &body),
        Err(e) => response::error(&e, &cors),
    }
}

async fn generate_download_url(
    State(broker): State<Arc<ObjectBroker>>,
    headers: HeaderMap,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Response {
    let origin = caller_origin(&headers);
    let cors = broker.guard().cors_headers(origin);
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return response::error(&query_error(&broker, origin, rejection), &cors)
        }
    };
    match broker
        .request_download_grant(query.key.as_deref(), origin)
        .await
    {
        Ok(body) => response::json(StatusCode::OK, &cors, &body),
        Err(e) => response::error(&e, &cors),
    }
}

async fn preflight(State(broker): State<Arc<ObjectBroker>>, headers: HeaderMap) -> Response {
    let origin = caller_origin(&headers);
    let cors = broker.guard().cors_headers(origin);
    let status = match broker.guard().check(origin) {
        OriginDecision::Allowed => StatusCode::NO_CONTENT,
        OriginDecision::Denied => StatusCode::FORBIDDEN,
    };
    response::preflight(status, &cors)
}
