use super::{StewardTool, ToolContext};
use serde_json::Value;
use steward_core::resource::ResourceState;

pub struct SessionStatusTool;

impl StewardTool for SessionStatusTool {
    fn name(&self) -> &str {
        "session_status"
    }

    fn description(&self) -> &str {
        "Report whether the remote session is open and how many calls this server has handled"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn call(&self, _args: Value, ctx: &mut ToolContext<'_>) -> Result<Value, String> {
        let state = ctx.adapters.state(ctx.server);
        Ok(serde_json::json!({
            "server": ctx.server.as_str(),
            "configured": state.is_some(),
            "resource": state.unwrap_or(ResourceState::Uninitialized),
            "session": ctx.session,
        }))
    }
}
