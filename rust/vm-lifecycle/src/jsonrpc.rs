//! XAPI JSON-RPC session.
//!
//! Speaks JSON-RPC 2.0 to `<pool master>/jsonrpc`. Every call but the login
//! carries the session reference as its first parameter.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::client::XapiClient;
use crate::config::XapiConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::types::{ObjectClass, OpaqueRef};

const API_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<RpcError> for LifecycleError {
    fn from(err: RpcError) -> Self {
        let params = match err.data {
            Some(Value::Array(items)) => items.into_iter().map(value_to_param).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![value_to_param(other)],
        };
        LifecycleError::Api {
            code: err.message,
            params,
        }
    }
}

fn value_to_param(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn decode_response(response: RpcResponse) -> LifecycleResult<Value> {
    match (response.result, response.error) {
        (_, Some(error)) => Err(error.into()),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}

/// Authenticated session against a pool master.
pub struct XapiSession {
    client: Client,
    endpoint: String,
    config: XapiConfig,
    session: RwLock<Option<OpaqueRef>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for XapiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XapiSession")
            .field("endpoint", &self.endpoint)
            .field("logged_in", &self.session.read().is_some())
            .finish_non_exhaustive()
    }
}

impl XapiSession {
    pub fn new(config: &XapiConfig) -> LifecycleResult<Self> {
        if config.url.is_empty() {
            return Err(LifecycleError::ConfigurationError(
                "xapi.url is required to connect".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.allow_unauthorized)
            .build()
            .map_err(|e| LifecycleError::NetworkError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/jsonrpc", config.url.trim_end_matches('/')),
            config: config.clone(),
            session: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Open the session with the configured credentials.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn login(&self) -> LifecycleResult<()> {
        let params = [
            json!(self.config.username),
            json!(self.config.password),
            json!(API_VERSION),
            json!(self.config.originator),
        ];
        let value = self.rpc("session.login_with_password", &params).await?;
        let session = crate::client::expect_ref("session.login_with_password", value)?;
        *self.session.write() = Some(session);
        info!(username = %self.config.username, "XAPI session opened");
        Ok(())
    }

    /// Close the session. Calling it without an open session is a no-op.
    pub async fn logout(&self) -> LifecycleResult<()> {
        let Some(session) = self.session.write().take() else {
            return Ok(());
        };
        self.rpc("session.logout", &[json!(session)]).await?;
        info!("XAPI session closed");
        Ok(())
    }

    fn session_ref(&self) -> LifecycleResult<OpaqueRef> {
        self.session.read().clone().ok_or_else(|| {
            LifecycleError::ConfigurationError("XAPI session is not logged in".to_string())
        })
    }

    async fn rpc(&self, method: &str, params: &[Value]) -> LifecycleResult<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!(method = method, id = request.id, "Sending XAPI request");

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            warn!(method = method, status = %status, "XAPI returned HTTP error");
            return Err(LifecycleError::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        decode_response(response.json::<RpcResponse>().await?)
    }
}

#[async_trait]
impl XapiClient for XapiSession {
    async fn call(&self, method: &str, args: Vec<Value>) -> LifecycleResult<Value> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(json!(self.session_ref()?));
        params.extend(args);
        self.rpc(method, &params).await
    }

    async fn get_record(&self, class: ObjectClass, reference: &OpaqueRef) -> LifecycleResult<Value> {
        self.call(&format!("{class}.get_record"), vec![json!(reference)])
            .await
    }

    async fn get_ref_by_uuid(&self, class: ObjectClass, uuid: &str) -> LifecycleResult<OpaqueRef> {
        let method = format!("{class}.get_by_uuid");
        let value = self.call(&method, vec![json!(uuid)]).await?;
        crate::client::expect_ref(&method, value)
    }
}
