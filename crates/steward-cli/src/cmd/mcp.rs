use crate::tools::{self, SessionInfo, StewardTool, ToolContext};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use steward_core::adapter::AdapterPool;
use steward_core::audit::AuditLog;
use steward_core::config::Config;
use steward_core::lock::ProcessLock;
use steward_core::paths;
use steward_core::schema::Server;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

const PROTOCOL_VERSION: &str = "2024-11-05";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolContent {
    r#type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct ToolCallResult {
    content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Handshaking,
    Ready,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Handshaking => "handshaking",
            Phase::Ready => "ready",
            Phase::ShuttingDown => "shutting_down",
            Phase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One adapter exposed over stdio. Owns the adapter pool; handlers get it
/// through `&mut`, one request at a time.
pub struct McpServer {
    root: PathBuf,
    server: Server,
    config: Config,
    phase: Phase,
    adapters: AdapterPool,
    audit: AuditLog,
    tools: Vec<Box<dyn StewardTool>>,
    session: SessionInfo,
}

impl McpServer {
    pub fn new(root: &Path, server: Server, config: Config, adapters: AdapterPool) -> Self {
        Self {
            root: root.to_path_buf(),
            server,
            phase: Phase::Uninitialized,
            audit: AuditLog::new(root),
            tools: tools::tools_for(server),
            session: SessionInfo::new(),
            config,
            adapters,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handle one raw input line. `None` means nothing is written back.
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        if line.trim().is_empty() {
            return None;
        }

        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(JsonRpcResponse::err(None, PARSE_ERROR, format!("parse error: {e}")));
            }
        };

        let Some(obj) = raw.as_object() else {
            return Some(JsonRpcResponse::err(
                None,
                INVALID_REQUEST,
                "invalid request: expected a JSON object",
            ));
        };
        let is_initialize = obj.get("method").and_then(Value::as_str) == Some("initialize");
        let has_id = obj.contains_key("id");
        let id = obj.get("id").cloned();

        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) if has_id || is_initialize => {
                return Some(JsonRpcResponse::err(id, INVALID_REQUEST, format!("invalid request: {e}")));
            }
            Err(e) => {
                debug!(error = %e, "ignoring malformed notification");
                return None;
            }
        };

        // Notifications have no "id" key and get no response, except
        // `initialize`, which is always answered.
        if !has_id && !is_initialize {
            self.handle_notification(&request);
            return None;
        }

        Some(self.handle_request(&request))
    }

    fn handle_notification(&mut self, req: &JsonRpcRequest) {
        match req.method.as_str() {
            "notifications/initialized" if self.phase == Phase::Handshaking => {
                self.phase = Phase::Ready;
                info!(server = %self.server, "handshake complete");
            }
            other => debug!(method = other, "notification ignored"),
        }
    }

    pub fn handle_request(&mut self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id.clone();

        if req.method == "initialize" {
            if self.phase == Phase::Uninitialized {
                self.phase = Phase::Handshaking;
            }
            return JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {}
                    },
                    "serverInfo": {
                        "name": format!("steward-{}", self.server),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            );
        }

        match self.phase {
            Phase::Uninitialized => {
                return JsonRpcResponse::err(
                    id,
                    METHOD_NOT_FOUND,
                    format!("server not initialized: {} rejected", req.method),
                );
            }
            Phase::ShuttingDown | Phase::Terminated => {
                return JsonRpcResponse::err(id, INTERNAL_ERROR, "server is shutting down");
            }
            // Any request after `initialize` completes the handshake.
            Phase::Handshaking => self.phase = Phase::Ready,
            Phase::Ready => {}
        }

        match req.method.as_str() {
            "ping" => JsonRpcResponse::ok(id, serde_json::json!({})),

            "tools/list" => {
                let tool_list: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.schema()
                        })
                    })
                    .collect();
                JsonRpcResponse::ok(id, serde_json::json!({ "tools": tool_list }))
            }

            "tools/call" => self.call_tool(id, req.params.as_ref()),

            other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
        }
    }

    fn call_tool(&mut self, id: Option<Value>, params: Option<&Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::err(id, INVALID_PARAMS, "missing params");
        };
        let Some(tool_name) = params["name"].as_str() else {
            return JsonRpcResponse::err(id, INVALID_PARAMS, "missing tool name in params");
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let Some(tool) = self.tools.iter().find(|t| t.name() == tool_name) else {
            return JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("tool not found: {tool_name}"));
        };

        self.session.calls += 1;
        let outcome = {
            let mut ctx = ToolContext {
                root: &self.root,
                server: self.server,
                config: &self.config,
                adapters: &mut self.adapters,
                audit: &self.audit,
                session: &self.session,
            };
            tool.call(args, &mut ctx)
        };

        let (text, is_error) = match outcome {
            Ok(v) => (
                serde_json::to_string_pretty(&v).unwrap_or_else(|e| format!("serialization error: {e}")),
                false,
            ),
            Err(e) => {
                self.session.failures += 1;
                warn!(tool = tool_name, error = %e, "tool call failed");
                (e, true)
            }
        };

        let call_result = ToolCallResult {
            content: vec![ToolContent { r#type: "text", text }],
            is_error,
        };
        match serde_json::to_value(&call_result) {
            Ok(v) => JsonRpcResponse::ok(id, v),
            Err(e) => JsonRpcResponse::err(id, INTERNAL_ERROR, format!("internal error: {e}")),
        }
    }

    /// Release the adapter session. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        self.phase = Phase::ShuttingDown;
        self.adapters.close_all();
        self.phase = Phase::Terminated;
        info!(
            server = %self.server,
            calls = self.session.calls,
            failures = self.session.failures,
            "server terminated"
        );
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

pub fn run(root: &Path, server_name: &str) -> anyhow::Result<()> {
    crate::cmd::require_init(root)?;
    let server: Server = server_name.parse()?;
    let config = Config::load(root).context("failed to load config")?;

    let lock_path = paths::lock_path(root, server.as_str());
    let mut lock = ProcessLock::acquire(&lock_path)
        .with_context(|| format!("cannot start {server} server"))?;
    info!(server = %server, lock = %lock.path().display(), "mcp server starting");

    let adapters = AdapterPool::from_config(&config);
    let mut state = McpServer::new(root, server, config, adapters);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(serve(&mut state, tokio::io::stdin(), tokio::io::stdout()));
    // The stdin reader may still be parked in a blocking read; waiting for
    // it would keep the process alive after a signal.
    rt.shutdown_background();

    state.shutdown();
    lock.release();
    info!(server = %server, phase = %state.phase(), "mcp server stopped");
    result
}

/// Read requests until EOF or a shutdown signal, answering each in order.
pub async fn serve<R, W>(state: &mut McpServer, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    info!("stdin closed");
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let response = tokio::task::block_in_place(|| state.handle_line(&line));
                if let Some(response) = response {
                    let mut frame = serde_json::to_vec(&response)?;
                    frame.push(b'\n');
                    output.write_all(&frame).await?;
                    output.flush().await?;
                }
            }
        }
    }

    state.shutdown();
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{fast_config, pool_with};
    use steward_core::adapter::AdapterError;
    use steward_core::resource::ResourceState;
    use tempfile::TempDir;

    fn server(dir: &TempDir, outcomes: Vec<Result<Value, AdapterError>>) -> McpServer {
        let (pool, _) = pool_with(Server::Odoo, outcomes);
        McpServer::new(dir.path(), Server::Odoo, fast_config(), pool)
    }

    fn ready(dir: &TempDir) -> McpServer {
        let mut srv = server(dir, vec![Ok(serde_json::json!({"id": 42}))]);
        srv.handle_line(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#)
            .unwrap();
        srv
    }

    fn send(srv: &mut McpServer, line: &str) -> Value {
        let resp = srv.handle_line(line).expect("response expected");
        serde_json::to_value(&resp).unwrap()
    }

    #[test]
    fn initialize_returns_capabilities() {
        let dir = TempDir::new().unwrap();
        let mut srv = server(&dir, vec![Ok(Value::Null)]);
        let resp = send(&mut srv, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(resp["result"]["capabilities"]["tools"].is_object());
        assert_eq!(resp["result"]["serverInfo"]["name"], "steward-odoo");
        assert_eq!(srv.phase(), Phase::Handshaking);
    }

    #[test]
    fn initialize_without_id_is_still_answered() {
        let dir = TempDir::new().unwrap();
        let mut srv = server(&dir, vec![Ok(Value::Null)]);
        let resp = send(&mut srv, r#"{"method":"initialize"}"#);
        assert!(resp["result"].is_object());
        assert_eq!(resp["jsonrpc"], "2.0");
    }

    #[test]
    fn requests_before_initialize_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut srv = server(&dir, vec![Ok(Value::Null)]);
        let resp = send(&mut srv, r#"{"id":1,"method":"tools/list"}"#);
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(srv.phase(), Phase::Uninitialized);
    }

    #[test]
    fn initialized_notification_completes_handshake() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        assert!(srv
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .is_none());
        assert_eq!(srv.phase(), Phase::Ready);
    }

    #[test]
    fn tools_list_matches_menu() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        let resp = send(&mut srv, r#"{"id":2,"method":"tools/list"}"#);
        let names: Vec<&str> = resp["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["create_record", "create_invoice", "read_records", "report_failure", "session_status"]
        );
        assert_eq!(srv.phase(), Phase::Ready);
    }

    #[test]
    fn unknown_tool_then_next_request_still_answered() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        let resp = send(
            &mut srv,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
        );
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);

        let resp = send(&mut srv, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#);
        assert_eq!(resp["id"], 2);
        assert!(resp["result"].is_object());
    }

    #[test]
    fn parse_error_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        assert!(srv.handle_line("   ").is_none());
        let resp = send(&mut srv, "{not json");
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert!(resp["id"].is_null());
        let resp = send(&mut srv, "[1,2]");
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
    }

    #[test]
    fn tool_success_and_lazy_resource() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        assert_eq!(srv.adapters.state(Server::Odoo), Some(ResourceState::Uninitialized));

        let resp = send(
            &mut srv,
            r#"{"id":3,"method":"tools/call","params":{"name":"create_record","arguments":{"model":"res.partner","values":{"name":"ACME"}}}}"#,
        );
        assert_eq!(resp["result"]["isError"], false);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("42"));
        assert_eq!(srv.adapters.state(Server::Odoo), Some(ResourceState::Ready));
    }

    #[test]
    fn tool_failure_is_an_error_result_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        let resp = send(
            &mut srv,
            r#"{"id":4,"method":"tools/call","params":{"name":"create_record","arguments":{"model":"res.partner"}}}"#,
        );
        assert!(resp["error"].is_null());
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(srv.session.failures, 1);
    }

    #[test]
    fn missing_params_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        let resp = send(&mut srv, r#"{"id":5,"method":"tools/call"}"#);
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn shutdown_is_idempotent_and_closes_resource() {
        let dir = TempDir::new().unwrap();
        let mut srv = ready(&dir);
        send(
            &mut srv,
            r#"{"id":3,"method":"tools/call","params":{"name":"read_records","arguments":{}}}"#,
        );
        srv.shutdown();
        srv.shutdown();
        assert_eq!(srv.phase(), Phase::Terminated);
        assert_eq!(srv.adapters.state(Server::Odoo), Some(ResourceState::Closed));
        let resp = send(&mut srv, r#"{"id":9,"method":"ping"}"#);
        assert_eq!(resp["error"]["code"], INTERNAL_ERROR);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serve_answers_in_order_and_stops_at_eof() {
        let dir = TempDir::new().unwrap();
        let mut srv = server(&dir, vec![Ok(Value::Null)]);
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n"
        );
        let mut output = Vec::new();
        serve(&mut srv, input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
        assert_eq!(srv.phase(), Phase::Terminated);
    }
}
