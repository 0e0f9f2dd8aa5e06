use super::{StewardTool, ToolContext};
use serde_json::{Map, Value};
use steward_core::adapter::{AdapterError, AdapterProvider};
use steward_core::audit::{ApprovalStatus, AuditResult, EntryDraft};
use steward_core::executor::is_partial;
use steward_core::remediation;
use steward_core::retry::call_with_backoff;
use steward_core::schema::{self, OperationSpec};
use tracing::warn;

/// Arguments consumed by the tool itself, never forwarded to the adapter.
const APPROVAL_REF: &str = "approval_ref";
const APPROVED_BY: &str = "approved_by";

/// One catalog operation exposed as a protocol tool.
pub struct OperationTool {
    spec: &'static OperationSpec,
}

impl OperationTool {
    pub fn new(spec: &'static OperationSpec) -> Self {
        Self { spec }
    }
}

impl StewardTool for OperationTool {
    fn name(&self) -> &str {
        self.spec.operation.as_str()
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn schema(&self) -> Value {
        let mut schema = self.spec.input_schema();
        if self.spec.side_effecting {
            if let Some(props) = schema["properties"].as_object_mut() {
                props.insert(
                    APPROVAL_REF.to_string(),
                    serde_json::json!({
                        "type": "string",
                        "description": "Id of the approved plan this call carries out"
                    }),
                );
                props.insert(
                    APPROVED_BY.to_string(),
                    serde_json::json!({
                        "type": "string",
                        "description": "Who approved the plan"
                    }),
                );
            }
        }
        schema
    }

    fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<Value, String> {
        let mut params: Map<String, Value> = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err("arguments must be an object".to_string()),
        };
        let approval_ref = take_string(&mut params, APPROVAL_REF);
        let approved_by = take_string(&mut params, APPROVED_BY);

        let spec = schema::validate(
            ctx.server.as_str(),
            self.spec.operation.as_str(),
            &params,
        )
        .map_err(|e| e.to_string())?;

        let policy = ctx.config.retry.policy();
        let server = ctx.server;
        let adapters: &mut dyn AdapterProvider = &mut *ctx.adapters;
        let outcome: Result<Value, AdapterError> =
            call_with_backoff(&policy, || adapters.adapter(server)?.invoke(spec, &params));

        if spec.side_effecting {
            let (approval_status, approved_by) = match (&approval_ref, approved_by) {
                (Some(_), who) => (ApprovalStatus::Approved, who.unwrap_or_else(|| "unknown".to_string())),
                (None, _) => (ApprovalStatus::Auto, "auto".to_string()),
            };
            ctx.audit.record(EntryDraft {
                action_type: format!("{}.{}", server, spec.operation),
                actor: ctx.config.actor.clone(),
                target: Some(server.to_string()),
                parameters: Value::Object(params.clone()),
                approval_status,
                approval_ref: approval_ref.clone(),
                approved_by,
                result: match &outcome {
                    Ok(value) if is_partial(value) => AuditResult::Partial,
                    Ok(_) => AuditResult::Success,
                    Err(_) => AuditResult::Failure,
                },
                error: outcome.as_ref().err().map(|e| e.to_string()),
            });
        }

        match outcome {
            Ok(result) => Ok(serde_json::json!({
                "server": server.as_str(),
                "operation": spec.operation.as_str(),
                "result": result,
            })),
            Err(e) => {
                let message = e.to_string();
                let Some(failure_type) = e.failure_type() else {
                    return Err(message);
                };
                let report = remediation::record_failure(ctx.root, failure_type, server.as_str(), &message);
                if !report.fully_recorded() {
                    warn!(errors = ?report.errors, "remediation only partially recorded");
                }
                let task = report
                    .task_path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "not created".to_string());
                Err(format!("{message} [{failure_type}; remediation task: {task}]"))
            }
        }
    }
}

fn take_string(params: &mut Map<String, Value>, key: &str) -> Option<String> {
    match params.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}
