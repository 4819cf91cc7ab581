use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{analysis, auth, config::AppConfig, state::AppState, storage::LOCAL_URL_PREFIX};

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .merge(analysis::router(state.config.max_upload_bytes))
        .merge(auth::router())
        .route("/health", get(health));

    let mut app = Router::new().route("/", get(root)).nest("/api", api);
    if state.serves_local_uploads() {
        app = app.nest_service(LOCAL_URL_PREFIX, ServeDir::new(&state.config.upload_dir));
    }

    let cors = cors_layer(state.config.cors_allowed_origins.clone());
    app.with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

fn cors_layer(allowed: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| origin_allowed(&allowed, o))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Patterns: `*`, exact origins, `scheme://host:*` (any port), `*.domain` (any subdomain).
pub(crate) fn origin_allowed(patterns: &[String], origin: &str) -> bool {
    patterns.iter().any(|p| {
        if p == "*" || p == origin {
            return true;
        }
        if let Some(prefix) = p.strip_suffix(":*") {
            return origin
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false);
        }
        if let Some(domain) = p.strip_prefix("*.") {
            let host = origin.split_once("://").map(|(_, h)| h).unwrap_or(origin);
            let host = host.split(':').next().unwrap_or(host);
            return host
                .strip_suffix(domain)
                .map(|sub| sub.len() > 1 && sub.ends_with('.'))
                .unwrap_or(false);
        }
        false
    })
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "NutriVeda API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "analyze": "POST /api/analyze",
            "history": "GET /api/analyze/history"
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": timestamp,
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
