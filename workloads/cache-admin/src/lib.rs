//! Spin component exposing the incremental cache administration routes.
//!
//! - `POST /api/cache-update` applies a broadcast PUT or DELETE to this
//!   node's edge-local cache
//! - `GET /api/invalidate?key=K&strategy=local|global` drops an entry
//! - `GET /api/time` serves a cached timestamp (ttl 20s, swr 60s)
//!
//! Deferred revalidations are flushed after the response body is written.

use std::sync::Arc;

use futures::SinkExt;
use http::StatusCode;
use incremental_cache::{
    AdminHandler, AdminResponse, BackendError, CacheBackend, CacheConfig, CacheOptions,
    CacheRuntime, Deferral, LogFormat,
};
#[cfg(target_arch = "wasm32")]
use incremental_cache::DurableKvBackend;
use serde_json::json;
use spin_sdk::http::{Fields, IncomingRequest, Method, OutgoingResponse, ResponseOutparam};
use spin_sdk::http_component;
use tracing_subscriber::EnvFilter;

#[http_component]
async fn handle(req: IncomingRequest, response_out: ResponseOutparam) {
    let config = load_config();
    init_logging(config.log_format);

    let runtime = Arc::new(build_runtime(config));
    let admin = AdminHandler::new(runtime.clone());

    let path_with_query = req.path_with_query().unwrap_or_default();
    let (path, query) = path_with_query
        .split_once('?')
        .unwrap_or((path_with_query.as_str(), ""));
    tracing::debug!(path, method = ?req.method(), "request started");

    let response = match (req.method(), path) {
        (Method::Post, "/api/cache-update") => match req.into_body().await {
            Ok(body) => admin.handle_cache_update(&body).await,
            Err(err) => {
                tracing::warn!(error = ?err, "failed to read request body");
                AdminResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: json!({ "ok": false }),
                }
            }
        },
        (Method::Get, "/api/invalidate") => admin.handle_invalidate(query).await,
        (Method::Get, "/api/time") => current_time(&runtime).await,
        _ => AdminResponse {
            status: StatusCode::NOT_FOUND,
            body: json!({ "ok": false }),
        },
    };

    write_response(response_out, &response).await;

    let report = runtime.flush().await;
    if report.total() > 0 {
        tracing::debug!(
            completed = report.completed,
            failed = report.failed,
            "flushed deferred work"
        );
    }
}

/// Environment defaults, overridden by Spin variables when defined.
fn load_config() -> CacheConfig {
    let mut config = CacheConfig::from_env();
    if let Some(base_url) = variable("cache_base_url") {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(label) = variable("cache_kv_store") {
        config.kv_store = Some(label);
    }
    if let Some(format) = variable("cache_log_format") {
        config.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Human,
        };
    }
    config
}

fn variable(name: &str) -> Option<String> {
    spin_sdk::variables::get(name)
        .ok()
        .filter(|value| !value.is_empty())
}

fn build_runtime(config: CacheConfig) -> CacheRuntime {
    let durable = open_durable(config.kv_store.as_deref());

    let mut builder = CacheRuntime::builder()
        .config(config)
        .http_broadcaster()
        .deferral(Deferral::Manual);
    match durable {
        Ok(backend) => builder = builder.durable(backend),
        Err(err) => tracing::warn!(error = %err, "durable store unavailable, using edge-local only"),
    }
    builder.build()
}

#[cfg(target_arch = "wasm32")]
fn open_durable(label: Option<&str>) -> Result<Arc<dyn CacheBackend>, BackendError> {
    let backend = match label {
        Some(label) => DurableKvBackend::open(label)?,
        None => DurableKvBackend::open_default()?,
    };
    Ok(Arc::new(backend))
}

#[cfg(not(target_arch = "wasm32"))]
fn open_durable(_label: Option<&str>) -> Result<Arc<dyn CacheBackend>, BackendError> {
    Err(BackendError::Open(
        "Spin key-value store requires wasm32".to_string(),
    ))
}

async fn current_time(runtime: &CacheRuntime) -> AdminResponse {
    let result = runtime
        .cached_with_status(
            || async { Ok(chrono::Utc::now().to_rfc3339()) },
            CacheOptions::new("time", 20).with_swr(60),
        )
        .await;

    match result {
        Ok(cached) => AdminResponse {
            status: StatusCode::OK,
            body: json!({ "time": cached.value, "cache": cached.status }),
        },
        Err(err) => {
            tracing::error!(error = %err, "time lookup failed");
            AdminResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({ "ok": false }),
            }
        }
    }
}

async fn write_response(response_out: ResponseOutparam, response: &AdminResponse) {
    let headers = match Fields::from_list(&[(
        "content-type".to_owned(),
        b"application/json".to_vec(),
    )]) {
        Ok(headers) => headers,
        Err(err) => {
            tracing::error!(error = ?err, "failed to build response headers");
            return;
        }
    };

    let outgoing = OutgoingResponse::new(headers);
    if outgoing.set_status_code(response.status.as_u16()).is_err() {
        tracing::error!(status = response.status.as_u16(), "invalid status code");
    }

    let mut body = outgoing.take_body();
    response_out.set(outgoing);
    if let Err(err) = body.send(response.to_bytes()).await {
        tracing::error!(error = %err, "failed to write response body");
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // The component may be instantiated more than once per process.
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Human => builder.try_init(),
    };
}
