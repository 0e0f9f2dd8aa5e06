//! Generic webhook adapter: POSTs `{operation, parameters}` to a configured
//! endpoint and maps the HTTP outcome onto [`AdapterError`].

use crate::adapter::{Adapter, AdapterError};
use crate::config::AdapterEndpoint;
use crate::schema::{OperationSpec, Server};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub struct HttpAdapter {
    server: Server,
    client: Client,
    endpoint: String,
    token: Option<String>,
    empty_on_not_found: bool,
}

impl HttpAdapter {
    /// Build the client. The bearer token is read from `token_env` now so a
    /// missing credential surfaces on first use, not mid-batch.
    pub fn connect(server: Server, cfg: &AdapterEndpoint) -> Result<Self, AdapterError> {
        let token = match &cfg.token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                AdapterError::Permission(format!("{server}: environment variable {var} is not set"))
            })?),
            None => None,
        };
        let mut builder = Client::builder();
        if cfg.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(cfg.timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("{server}: {e}")))?;
        Ok(Self {
            server,
            client,
            endpoint: cfg.endpoint.clone(),
            token,
            empty_on_not_found: cfg.empty_on_not_found,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Timeout(format!("{}: {err}", self.server))
        } else if err.is_connect() {
            AdapterError::Unavailable(format!("{}: {err}", self.server))
        } else {
            AdapterError::Other(format!("{}: {err}", self.server))
        }
    }
}

impl Adapter for HttpAdapter {
    fn invoke(
        &mut self,
        spec: &OperationSpec,
        params: &Map<String, Value>,
    ) -> Result<Value, AdapterError> {
        let body = serde_json::json!({
            "operation": spec.operation.as_str(),
            "parameters": params,
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        debug!(server = %self.server, operation = %spec.operation, "dispatching");
        let resp = req.send().map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let text = resp.text().map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AdapterError::Permission(
                format!("{} {}: {}", self.server, status.as_u16(), text.trim()),
            )),
            // Some read endpoints answer 404 when the account simply has no data yet.
            StatusCode::NOT_FOUND if !spec.side_effecting && self.empty_on_not_found => {
                Ok(serde_json::json!({ "items": [] }))
            }
            _ => Err(AdapterError::Http {
                status: status.as_u16(),
                message: text.trim().to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
