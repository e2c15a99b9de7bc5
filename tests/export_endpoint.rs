#![cfg(unix)]

mod support;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use diarender::{
    domain::types::SourceRef,
    infra::http::{ExportState, build_export_router, export_url},
};
use http_body_util::BodyExt;
use support::{BOOK, FAILING_CONVERTER, Fixture, confirming_converter};
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

#[tokio::test]
async fn serves_png_bytes_with_length_and_type() {
    let fixture = Fixture::new(&confirming_converter("0"));
    fixture.write_source("/figures/flow.dia");
    let app = build_export_router(ExportState {
        renderer: fixture.renderer.clone(),
    });

    let response = app
        .oneshot(get("/dia-export/docs/figures/flow-400x_.png"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"image/png"[..])
    );
    let length: usize = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("content length");

    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert_eq!(body.len(), length);
    assert!(body.starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn rendered_export_urls_are_served() {
    let fixture = Fixture::new(&confirming_converter("0"));
    fixture.write_source("/figures/flow.dia");
    let source = SourceRef::new(BOOK, "/figures/flow.dia");
    let app = build_export_router(ExportState {
        renderer: fixture.renderer.clone(),
    });

    let exports = fixture
        .renderer
        .render(&source, 200, 0)
        .await
        .expect("render")
        .expect("source exists");
    let calls = fixture.calls();

    for export in &exports {
        let url = export_url(&source, export.requested).expect("url");
        let response = app
            .clone()
            .oneshot(get(&url))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK, "{url}");
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        assert_eq!(body.to_vec(), std::fs::read(&export.path).expect("export"));
    }
    assert_eq!(
        export_url(&source, exports[0].requested).expect("url"),
        "/dia-export/docs/figures/flow-200x_.png"
    );
    assert_eq!(fixture.calls(), calls);
}

#[tokio::test]
async fn unresolvable_addresses_are_not_found() {
    let fixture = Fixture::new(&confirming_converter("0"));
    fixture.write_source("/flow.dia");
    let app = build_export_router(ExportState {
        renderer: fixture.renderer.clone(),
    });

    for uri in [
        "/dia-export/docs/flow.png",
        "/dia-export/docs/flow-abcx_.png",
        "/dia-export/docs/missing-200x_.png",
        "/dia-export/elsewhere/flow-200x_.png",
    ] {
        let response = app
            .clone()
            .oneshot(get(uri))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    assert_eq!(fixture.calls(), 0);
}

#[tokio::test]
async fn converter_failure_is_a_server_error() {
    let fixture = Fixture::new(FAILING_CONVERTER);
    fixture.write_source("/flow.dia");
    let app = build_export_router(ExportState {
        renderer: fixture.renderer.clone(),
    });

    let response = app
        .oneshot(get("/dia-export/docs/flow-200x_.png"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(fixture.calls(), 1);
}
