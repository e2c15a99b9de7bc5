use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use tokio::fs;
use tracing::error;

use crate::{
    application::{error::HttpError, render::DiagramRenderer},
    cache::{AddressError, ExportAddress},
    domain::types::{RequestedSize, SourceRef},
};

use super::middleware::{log_responses, set_request_context};

/// Route prefix under which exported diagrams are served.
pub const EXPORT_ROUTE_PREFIX: &str = "/dia-export";

/// URL path under which the export of `source` at `size` is served.
pub fn export_url(source: &SourceRef, size: RequestedSize) -> Result<String, AddressError> {
    Ok(format!(
        "{EXPORT_ROUTE_PREFIX}{}",
        ExportAddress::encode(source, size)?
    ))
}

#[derive(Clone)]
pub struct ExportState {
    pub renderer: Arc<DiagramRenderer>,
}

pub fn build_export_router(state: ExportState) -> Router {
    Router::new()
        .route(&format!("{EXPORT_ROUTE_PREFIX}/{{*address}}"), get(serve_export))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn serve_export(State(state): State<ExportState>, Path(address): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::export::serve_export";

    let address = format!("/{}", address.trim_start_matches('/'));
    let export = match state.renderer.export_address(&address).await {
        Ok(Some(export)) => export,
        Ok(None) => {
            return HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Diagram not found",
                format!("No diagram export for `{address}`"),
            )
            .into_response();
        }
        Err(err) => {
            error!(
                target = SOURCE,
                address = %address,
                error = %err,
                "failed to export diagram"
            );
            return HttpError::from(err).into_response();
        }
    };

    match fs::read(&export.path).await {
        Ok(bytes) => build_png_response(&address, Bytes::from(bytes)),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read exported diagram",
            &err,
        )
        .into_response(),
    }
}

fn build_png_response(address: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(address).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}
