use std::sync::Arc;

use axum::{routing::get, Router};
use http::HeaderValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::csp::csp_middleware;
use crate::AppState;

pub mod appointments;
pub mod health;
pub mod notifications;
pub mod views;

/// Every route the service exposes, with state applied. Layers are added by
/// the caller.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/notifications", notifications::router())
        .nest("/api/views", views::router())
        .nest("/api/appointments", appointments::router())
        .with_state(state)
}

/// Wrap the routes in CSP, request tracing and CORS for `frontend_origin`.
pub fn with_layers(router: Router, frontend_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(frontend_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT])
        .allow_credentials(true);

    router
        // CSP middleware: set Content-Security-Policy headers
        .layer(axum::middleware::from_fn(csp_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}


#[cfg(test)]
pub mod testing {
    use axum::body::Body;
    use axum::Router;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Run one request through the router and decode the JSON body, if any.
    pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn empty(method: http::Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }
}
