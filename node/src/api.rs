//! # Query API
//!
//! The axum router that exposes the registry over HTTP. All endpoints share
//! [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description          |
//! |--------|-----------|----------------------|
//! | GET    | `/health` | Liveness probe       |
//! | GET    | `/status` | Indexer status and pass counters |
//! | POST   | `/rpc`    | JSON-RPC 2.0 gateway |
//!
//! ## RPC Methods
//!
//! Params may be passed by name or by position.
//!
//! | Method                  | Params              | Result                           |
//! |-------------------------|---------------------|----------------------------------|
//! | `lookupvalue`           | `key`, `isstring`   | `{type, value}`                  |
//! | `lookupowner`           | `key`, `isstring`   | owner address                    |
//! | `lookupactivationblock` | `key`, `isstring`   | block height                     |
//! | `lookupallentrysof`     | `owner`             | `[{key, type, value, ...}]`      |
//! | `checkvalidity`         |                     | `true` if the index matches      |
//! | `updatelookup`          |                     | `true` if new blocks were applied |
//! | `rebuildlookup`         |                     | `null`                           |
//! | `getheight`             |                     | indexed height                   |
//! | `shutdown`              |                     | `null`                           |
//!
//! Keys are hex unless `isstring` is `true`, in which case the UTF-8 bytes
//! of the string are the key.

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use chainreg_protocol::codec::{bytes_to_hex, hex_to_bytes, EntryKey, EntryValue};
use chainreg_protocol::lookup::{LookupManager, LookupRecord, ManagerStatus, SyncError};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The indexer. Owns the registry table.
    pub manager: Arc<LookupManager>,
    pub metrics: SharedMetrics,
    /// Flipped to `true` by the `shutdown` RPC. The sync loop and the
    /// servers in `main` watch it.
    pub shutdown_tx: Arc<watch::Sender<bool>>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    /// Method parameters, by name or by position.
    pub params: Option<Value>,
    /// Echoed back in the response.
    pub id: Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error codes returned by `/rpc`.
pub mod codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// No entry under the requested key.
    pub const NOT_FOUND: i32 = -32001;
    /// Another update or rebuild is running.
    pub const ALREADY_INDEXING: i32 = -32002;
    /// The chain daemon failed or returned something unusable.
    pub const DAEMON_FAILURE: i32 = -32003;
    /// The indexer is shutting down.
    pub const SHUTTING_DOWN: i32 = -32004;
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }
}

impl From<SyncError> for JsonRpcError {
    fn from(e: SyncError) -> Self {
        let code = match &e {
            SyncError::AlreadyIndexing => codes::ALREADY_INDEXING,
            SyncError::ShuttingDown => codes::SHUTTING_DOWN,
            SyncError::Daemon(_) => codes::DAEMON_FAILURE,
            SyncError::Lookup(_) | SyncError::Storage(_) => codes::INTERNAL_ERROR,
        };
        Self::new(code, e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Params of the three per-key lookups.
#[derive(Debug, Deserialize)]
struct KeyParams {
    key: String,
    #[serde(default)]
    isstring: bool,
}

impl KeyParams {
    const NAMES: &'static [&'static str] = &["key", "isstring"];

    fn entry_key(&self) -> Result<EntryKey, JsonRpcError> {
        if self.isstring {
            return Ok(self.key.as_bytes().to_vec());
        }
        hex_to_bytes(&self.key).map_err(|_| {
            JsonRpcError::invalid_params(format!(
                "could not convert {:?} into a byte key; pass isstring=true for text keys",
                self.key
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwnerParams {
    owner: String,
}

impl OwnerParams {
    const NAMES: &'static [&'static str] = &["owner"];
}

/// Deserializes named or positional params. Positional params are matched
/// to `names` in order.
fn parse_params<T: DeserializeOwned>(
    params: Option<Value>,
    names: &[&str],
) -> Result<T, JsonRpcError> {
    let object = match params {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Array(items)) => {
            if items.len() > names.len() {
                return Err(JsonRpcError::invalid_params(format!(
                    "expected at most {} params, got {}",
                    names.len(),
                    items.len()
                )));
            }
            let map: Map<String, Value> = names
                .iter()
                .map(|name| name.to_string())
                .zip(items)
                .collect();
            Value::Object(map)
        }
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(other) => {
            return Err(JsonRpcError::invalid_params(format!(
                "params must be an object or an array, got {other}"
            )))
        }
    };

    serde_json::from_value(object).map_err(|e| {
        JsonRpcError::invalid_params(format!("Invalid params: expected {names:?}: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub indexer: ManagerStatus,
    pub sync: SyncCounters,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

/// Lifetime pass counters, read from the metrics registry.
#[derive(Debug, Serialize)]
pub struct SyncCounters {
    pub passes: u64,
    pub errors: u64,
    pub blocks_indexed: u64,
}

/// JSON form of an [`EntryValue`]: its type name plus the payload as hex.
/// `none` has a null value.
fn value_json(value: &EntryValue) -> Value {
    let payload = match value {
        EntryValue::None => Value::Null,
        other => Value::String(bytes_to_hex(&other.payload())),
    };
    json!({ "type": value.type_name(), "value": payload })
}

fn entry_json(key: &[u8], record: &LookupRecord) -> Value {
    let mut entry = value_json(&record.value);
    entry["key"] = json!(bytes_to_hex(key));
    entry["owner"] = json!(record.owner);
    entry["activation_block"] = json!(record.activation_block);
    entry
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        indexer: state.manager.status().await,
        sync: SyncCounters {
            passes: state.metrics.sync_passes_total.get(),
            errors: state.metrics.sync_errors_total.get(),
            blocks_indexed: state.metrics.blocks_indexed_total.get(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /rpc`: JSON-RPC 2.0 gateway.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let outcome = if req.jsonrpc != "2.0" {
        Err(JsonRpcError::new(
            codes::INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ))
    } else {
        dispatch(&state, &req.method, req.params).await
    };

    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code, message = %e.message, "rpc error");
            (None, Some(e))
        }
    };

    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

async fn dispatch(
    state: &AppState,
    method: &str,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    let manager = &state.manager;

    match method {
        "lookupvalue" => {
            let p: KeyParams = parse_params(params, KeyParams::NAMES)?;
            let key = p.entry_key()?;
            manager
                .lookup_value(&key)
                .await
                .map(|value| value_json(&value))
                .ok_or_else(|| not_found(&p.key))
        }
        "lookupowner" => {
            let p: KeyParams = parse_params(params, KeyParams::NAMES)?;
            let key = p.entry_key()?;
            manager
                .lookup_owner(&key)
                .await
                .map(Value::String)
                .ok_or_else(|| not_found(&p.key))
        }
        "lookupactivationblock" => {
            let p: KeyParams = parse_params(params, KeyParams::NAMES)?;
            let key = p.entry_key()?;
            manager
                .lookup_activation_block(&key)
                .await
                .map(|block| json!(block))
                .ok_or_else(|| not_found(&p.key))
        }
        "lookupallentrysof" => {
            let p: OwnerParams = parse_params(params, OwnerParams::NAMES)?;
            let entries: Vec<Value> = manager
                .entries_of_owner(&p.owner)
                .await
                .iter()
                .map(|(key, record)| entry_json(key, record))
                .collect();
            Ok(Value::Array(entries))
        }
        "checkvalidity" => Ok(json!(manager.check_validity().await?)),
        "updatelookup" => Ok(json!(manager.update_lookup().await?)),
        "rebuildlookup" => {
            manager.rebuild_lookup().await?;
            Ok(Value::Null)
        }
        "getheight" => Ok(json!(manager.height().await)),
        "shutdown" => {
            tracing::info!("shutdown requested over rpc");
            manager.shutdown();
            state.shutdown_tx.send_replace(true);
            Ok(Value::Null)
        }
        other => Err(JsonRpcError::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn not_found(key: &str) -> JsonRpcError {
    JsonRpcError::new(codes::NOT_FOUND, format!("no entries with key {key} found"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
