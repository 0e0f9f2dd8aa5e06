use super::{StewardTool, ToolContext};
use serde_json::Value;
use steward_core::remediation;

/// Lets the controller report a failure it observed itself, e.g. a
/// client-side timeout, so it lands in the same remediation flow.
pub struct ReportFailureTool;

impl StewardTool for ReportFailureTool {
    fn name(&self) -> &str {
        "report_failure"
    }

    fn description(&self) -> &str {
        "Record an infrastructure failure and open a remediation task for a human"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "failure_type": {
                    "type": "string",
                    "enum": ["connection_timeout", "auth_failure", "rate_limit", "server_error"],
                    "description": "Failure classification"
                },
                "error_message": {
                    "type": "string",
                    "description": "Error text as observed"
                },
                "server": {
                    "type": "string",
                    "description": "Server name (defaults to this server)"
                }
            },
            "required": ["failure_type", "error_message"]
        })
    }

    fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<Value, String> {
        let failure_type = args["failure_type"]
            .as_str()
            .ok_or_else(|| "missing required argument: failure_type".to_string())?;
        let message = args["error_message"]
            .as_str()
            .ok_or_else(|| "missing required argument: error_message".to_string())?;
        let server = args["server"].as_str().unwrap_or(ctx.server.as_str());

        let report = remediation::report_failure(ctx.root, failure_type, server, message)
            .map_err(|e| e.to_string())?;
        serde_json::to_value(&report).map_err(|e| e.to_string())
    }
}
