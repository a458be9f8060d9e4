//! Application setup: shared state, router and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use tikastream_core::{EngineCommand, Extractor, FileAndHttpTransport, HttpTransport, Transport};

use crate::body::ExtractionBody;
use crate::config::ServerConfig;
use crate::ingress::{self, IngressLimits};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub limits: Arc<IngressLimits>,
    /// Reported by the health check
    pub jar: Option<PathBuf>,
}

impl AppState {
    pub fn new(extractor: Extractor, limits: IngressLimits) -> Self {
        Self {
            extractor: Arc::new(extractor),
            limits: Arc::new(limits),
            jar: None,
        }
    }

    pub fn with_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.jar = Some(jar.into());
        self
    }

    /// State for `config`, running `engine`
    pub fn from_config(config: &ServerConfig, engine: EngineCommand) -> Result<Self> {
        let jar = config.jar.clone().or_else(|| jar_argument(&engine));
        let limits = IngressLimits {
            max_json_body_bytes: config.max_json_body_bytes,
            max_multipart_bytes: config.max_multipart_bytes,
            spool_dir: config.spool_dir(),
        };
        let mut state = Self::new(build_extractor(config, engine)?, limits);
        state.jar = jar;
        Ok(state)
    }
}

/// Extractor with the configured timeouts and default transport
pub fn build_extractor(config: &ServerConfig, engine: EngineCommand) -> Result<Extractor> {
    let mut http = HttpTransport::new();
    if let Some(timeout) = config.fetch_timeout() {
        http = http.with_response_timeout(timeout);
    }

    let transport: Arc<dyn Transport> = if config.allow_local_files {
        let local = FileAndHttpTransport::new()
            .context("Failed to resolve working directory for local files")?;
        Arc::new(local.with_http(http))
    } else {
        Arc::new(http)
    };

    let mut extractor = Extractor::new(engine).with_default_transport(transport);
    if let Some(timeout) = config.engine_timeout() {
        extractor = extractor.with_engine_timeout(timeout);
    }
    Ok(extractor)
}

fn jar_argument(engine: &EngineCommand) -> Option<PathBuf> {
    let args = engine.args();
    args.iter()
        .position(|arg| arg == "-jar")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", any(extract_handler))
        // Ingress enforces its own caps while reading
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Extract text from the document named (or uploaded) by the request.
async fn extract_handler(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let extraction = match ingress::request_from_http(request, &state.limits).await {
        Ok(extraction) => extraction,
        Err(e) => {
            tracing::warn!(%method, error = %e, "rejected extraction request");
            return e.into_response();
        }
    };

    let result = match state.extractor.extract(extraction).await {
        Ok(result) => result,
        Err(e) => {
            // The request itself parsed; anything failing from here is ours
            tracing::warn!(%method, error = %e, "extraction failed before streaming");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mut response = Response::new(Body::new(ExtractionBody::new(result)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::TRAILER, HeaderValue::from_static("X-Extraction-Error"));
    response
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jar: Option<String>,
}

/// Health check endpoint
///
/// Returns 503 if the configured jar has gone missing.
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let jar_present = state.jar.as_ref().map_or(true, |jar| jar.is_file());
    let status_code = if jar_present {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if jar_present { "healthy" } else { "unhealthy" }.to_string(),
            engine: state.extractor.engine().program().display().to_string(),
            jar: state.jar.as_ref().map(|jar| jar.display().to_string()),
        }),
    )
}
