use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use steward_core::adapter::AdapterPool;
use steward_core::audit::AuditLog;
use steward_core::config::Config;
use steward_core::schema::Server;

pub mod operation;
pub mod report_failure;
pub mod session_status;

/// Per-process counters exposed by `session_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub calls: u64,
    pub failures: u64,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            calls: 0,
            failures: 0,
        }
    }
}

/// Everything a tool handler may touch. The adapter pool is borrowed
/// mutably, so only one handler can use the remote session at a time.
pub struct ToolContext<'a> {
    pub root: &'a Path,
    pub server: Server,
    pub config: &'a Config,
    pub adapters: &'a mut AdapterPool,
    pub audit: &'a AuditLog,
    pub session: &'a SessionInfo,
}

pub trait StewardTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> serde_json::Value;
    fn call(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> Result<serde_json::Value, String>;
}

/// The tool menu for one server: its catalog operations, then the
/// failure reporter and session status.
pub fn tools_for(server: Server) -> Vec<Box<dyn StewardTool>> {
    let mut tools: Vec<Box<dyn StewardTool>> = server
        .operations()
        .map(|spec| Box::new(operation::OperationTool::new(spec)) as Box<dyn StewardTool>)
        .collect();
    tools.push(Box::new(report_failure::ReportFailureTool));
    tools.push(Box::new(session_status::SessionStatusTool));
    tools
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::{Map, Value};
    use std::sync::{Arc, Mutex};
    use steward_core::adapter::{Adapter, AdapterError};
    use steward_core::schema::OperationSpec;

    /// Adapter that replays scripted outcomes and logs each call.
    pub struct Scripted {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub outcomes: Vec<Result<Value, AdapterError>>,
    }

    impl Adapter for Scripted {
        fn invoke(&mut self, spec: &OperationSpec, _: &Map<String, Value>) -> Result<Value, AdapterError> {
            self.calls.lock().unwrap().push(spec.operation.to_string());
            if self.outcomes.len() > 1 {
                self.outcomes.remove(0)
            } else {
                self.outcomes[0].clone()
            }
        }
    }

    /// A pool with one scripted adapter registered for `server`.
    pub fn pool_with(
        server: Server,
        outcomes: Vec<Result<Value, AdapterError>>,
    ) -> (AdapterPool, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&calls);
        let mut pool = AdapterPool::new();
        pool.register(server, move || {
            Ok(Box::new(Scripted {
                calls: Arc::clone(&shared),
                outcomes: outcomes.clone(),
            }) as Box<dyn Adapter>)
        });
        (pool, calls)
    }

    /// Zero-delay retry config so tests never sleep.
    pub fn fast_config() -> Config {
        let mut cfg = Config::default();
        cfg.retry.base_delay_secs = 0;
        cfg
    }
}
