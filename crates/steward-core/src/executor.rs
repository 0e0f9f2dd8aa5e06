//! Approval-gated batch execution.
//!
//! One run consumes one approved plan: every action is validated against
//! the operation catalog, then (unless dry-run) dispatched through the
//! retry wrapper, audited, and on infrastructure failures turned into a
//! remediation task. The plan file itself is never touched.

use crate::adapter::{AdapterError, AdapterProvider};
use crate::audit::{ApprovalStatus, AuditLog, AuditResult, EntryDraft};
use crate::config::Config;
use crate::plan::{self, Plan, PlannedAction};
use crate::remediation;
use crate::retry::{call_with_backoff_using, RetryPolicy};
use crate::schema::{self, OperationSpec, Server};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Dry-run only: passed validation, not dispatched.
    Validated,
    Success,
    /// The adapter reported that only part of the operation took effect.
    Partial,
    Failed,
    /// Never started: the batch was halted, or its adapter was unreachable earlier.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub index: usize,
    pub server: String,
    pub operation: String,
    /// Outcome of catalog validation; identical for dry and real runs.
    pub valid: bool,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ActionResult {
    fn new(index: usize, action: &PlannedAction, valid: bool, status: ActionStatus) -> Self {
        Self {
            index,
            server: action.server.clone(),
            operation: action.operation.clone(),
            valid,
            status,
            error: None,
            output: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, ActionStatus::Validated | ActionStatus::Success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_path: Option<PathBuf>,
    pub actions_attempted: usize,
    pub actions_succeeded: usize,
    pub results: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    fn aborted(plan: Option<&Plan>, dry_run: bool, error: String) -> Self {
        Self {
            success: false,
            dry_run,
            plan_id: plan.map(|p| p.id()),
            plan_path: plan.map(|p| p.path.clone()),
            actions_attempted: 0,
            actions_succeeded: 0,
            results: Vec::new(),
            error: Some(error),
        }
    }

    fn from_results(plan: &Plan, dry_run: bool, results: Vec<ActionResult>) -> Self {
        let attempted = results
            .iter()
            .filter(|r| r.status != ActionStatus::Skipped)
            .count();
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        Self {
            success: succeeded == results.len(),
            dry_run,
            plan_id: Some(plan.id()),
            plan_path: Some(plan.path.clone()),
            actions_attempted: attempted,
            actions_succeeded: succeeded,
            results,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;

pub struct Executor<'a> {
    root: &'a Path,
    actor: String,
    policy: RetryPolicy,
    budget: Duration,
    stop_on_first_error: bool,
    adapters: &'a mut dyn AdapterProvider,
    audit: AuditLog,
    sleeper: Sleeper<'a>,
}

impl<'a> Executor<'a> {
    pub fn new(root: &'a Path, config: &Config, adapters: &'a mut dyn AdapterProvider) -> Self {
        Self {
            root,
            actor: config.actor.clone(),
            policy: config.retry.policy(),
            budget: config.batch_budget(),
            stop_on_first_error: config.executor.stop_on_first_error,
            adapters,
            audit: AuditLog::new(root),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    pub fn stop_on_first_error(mut self, stop: bool) -> Self {
        self.stop_on_first_error = stop;
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + 'a) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Locate the newest approved plan for `domain` and run it.
    pub fn execute(&mut self, domain: &str, dry_run: bool) -> ExecutionReport {
        match plan::find_approved(self.root, domain) {
            Ok(plan) => self.execute_plan(&plan, dry_run),
            Err(e) => {
                warn!(domain, error = %e, "no plan to execute");
                ExecutionReport::aborted(None, dry_run, e.to_string())
            }
        }
    }

    pub fn execute_plan(&mut self, plan: &Plan, dry_run: bool) -> ExecutionReport {
        let plan_id = plan.id();
        if plan.actions.is_empty() {
            return ExecutionReport::aborted(Some(plan), dry_run, "plan contains no actions".into());
        }
        info!(
            plan = %plan_id,
            actions = plan.actions.len(),
            dry_run,
            "executing approved plan"
        );

        let started = Instant::now();
        let mut halted: Option<String> = None;
        // Adapters that could not be reached; only their own later actions are skipped.
        let mut down_servers: BTreeSet<Server> = BTreeSet::new();
        let mut results = Vec::with_capacity(plan.actions.len());

        for (index, action) in plan.actions.iter().enumerate() {
            if let Some(reason) = &halted {
                results.push(
                    ActionResult::new(index, action, false, ActionStatus::Skipped)
                        .with_error(reason.clone()),
                );
                continue;
            }

            let spec = match schema::validate(&action.server, &action.operation, &action.parameters)
            {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(index, action = %action.action_type(), error = %e, "action failed validation");
                    results.push(
                        ActionResult::new(index, action, false, ActionStatus::Failed).with_error(e.to_string()),
                    );
                    if self.stop_on_first_error {
                        halted = Some(format!("not started: action {index} failed"));
                    }
                    continue;
                }
            };

            if dry_run {
                results.push(ActionResult::new(index, action, true, ActionStatus::Validated));
                continue;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                let msg = format!(
                    "timed out: batch budget of {}s exhausted before this action started",
                    self.budget.as_secs()
                );
                warn!(index, action = %action.action_type(), "{msg}");
                results.push(ActionResult::new(index, action, true, ActionStatus::Failed).with_error(msg));
                continue;
            }

            if down_servers.contains(&spec.server) {
                results.push(
                    ActionResult::new(index, action, true, ActionStatus::Skipped)
                        .with_error(format!("not started: {} adapter unavailable", spec.server)),
                );
                continue;
            }

            let (result, fatal) = self.dispatch(plan, &plan_id, index, action, spec);
            if fatal {
                down_servers.insert(spec.server);
            }
            if result.status == ActionStatus::Failed && self.stop_on_first_error {
                halted = Some(format!("not started: action {index} failed"));
            }
            results.push(result);
        }

        let report = ExecutionReport::from_results(plan, dry_run, results);
        info!(
            plan = %plan_id,
            attempted = report.actions_attempted,
            succeeded = report.actions_succeeded,
            success = report.success,
            "plan execution finished"
        );
        report
    }

    /// Call the adapter through the retry wrapper, audit the attempt, and
    /// raise a remediation task for infrastructure failures. The flag is set
    /// when the error makes the rest of the batch pointless.
    fn dispatch(
        &mut self,
        plan: &Plan,
        plan_id: &str,
        index: usize,
        action: &PlannedAction,
        spec: &'static OperationSpec,
    ) -> (ActionResult, bool) {
        let server = spec.server;
        let adapters = &mut *self.adapters;
        let outcome: Result<Value, AdapterError> =
            call_with_backoff_using(&self.policy, &mut self.sleeper, || {
                adapters.adapter(server)?.invoke(spec, &action.parameters)
            });

        let fatal = outcome.as_ref().err().is_some_and(AdapterError::is_fatal);
        let (status, audit_result, error, output) = match outcome {
            Ok(value) if is_partial(&value) => {
                (ActionStatus::Partial, AuditResult::Partial, None, Some(value))
            }
            Ok(value) => (ActionStatus::Success, AuditResult::Success, None, Some(value)),
            Err(e) => {
                warn!(index, action = %action.action_type(), error = %e, "action failed");
                if let Some(failure_type) = e.failure_type() {
                    let report =
                        remediation::record_failure(self.root, failure_type, server.as_str(), &e.to_string());
                    if !report.fully_recorded() {
                        warn!(errors = ?report.errors, "remediation only partially recorded");
                    }
                }
                (ActionStatus::Failed, AuditResult::Failure, Some(e.to_string()), None)
            }
        };

        self.audit.record(EntryDraft {
            action_type: action.action_type(),
            actor: self.actor.clone(),
            target: Some(server.to_string()),
            parameters: Value::Object(action.parameters.clone()),
            approval_status: ApprovalStatus::Approved,
            approval_ref: Some(plan_id.to_string()),
            approved_by: plan.approved_by().to_string(),
            result: audit_result,
            error: error.clone(),
        });

        if status != ActionStatus::Failed {
            info!(index, action = %action.action_type(), status = ?status, "action completed");
        }
        let result = ActionResult {
            error,
            output,
            ..ActionResult::new(index, action, true, status)
        };
        (result, fatal)
    }
}

/// Whether an adapter response reports that only part of the operation took effect.
pub fn is_partial(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("partial")
        || value.get("partial").and_then(Value::as_bool) == Some(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use chrono::Utc;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Scripted remote: pops one response per call, then falls back.
    struct FakeRemote {
        calls: Vec<String>,
        script: VecDeque<Result<Value, AdapterError>>,
        fallback: Result<Value, AdapterError>,
    }

    impl FakeRemote {
        fn ok() -> Self {
            Self::scripted(Vec::new(), Ok(json!({"id": "ok"})))
        }

        fn scripted(script: Vec<Result<Value, AdapterError>>, fallback: Result<Value, AdapterError>) -> Self {
            Self {
                calls: Vec::new(),
                script: script.into(),
                fallback,
            }
        }
    }

    impl Adapter for FakeRemote {
        fn invoke(&mut self, spec: &OperationSpec, _: &Map<String, Value>) -> Result<Value, AdapterError> {
            self.calls.push(format!("{}.{}", spec.server, spec.operation));
            self.script.pop_front().unwrap_or_else(|| self.fallback.clone())
        }
    }

    impl AdapterProvider for FakeRemote {
        fn adapter(&mut self, _: Server) -> Result<&mut dyn Adapter, AdapterError> {
            Ok(self)
        }
    }

    /// Provider where one server is unreachable and the rest answer.
    struct PartlyOffline {
        down: Server,
        remote: FakeRemote,
    }

    impl AdapterProvider for PartlyOffline {
        fn adapter(&mut self, server: Server) -> Result<&mut dyn Adapter, AdapterError> {
            if server == self.down {
                return Err(AdapterError::Unavailable(format!("no adapter configured for {server}")));
            }
            Ok(&mut self.remote)
        }
    }

    const IMAGE: &str = r#"{"server":"instagram","operation":"post_image","parameters":{"caption":"We're live","image_url":"https://cdn.example.com/launch.png"}}"#;
    const NO_CAPTION: &str = r#"{"server":"instagram","operation":"post_image","parameters":{"image_url":"https://cdn.example.com/launch.png"}}"#;
    const TEXT_ON_INSTAGRAM: &str = r#"{"server":"instagram","operation":"post_text","parameters":{"text":"hello"}}"#;
    const FB_TEXT: &str = r#"{"server":"facebook","operation":"post_text","parameters":{"text":"hello"}}"#;

    fn write_plan(dir: &TempDir, actions: &[&str]) -> PathBuf {
        let body = format!(
            "---\nid: 20261016-0900-launch\noperation: social\napproved_by: alice\napproved_at: 2026-10-16T09:12:00Z\n---\n# Launch\n\n```json\n[{}]\n```\n",
            actions.join(",")
        );
        let path = crate::paths::approved_dir(dir.path()).join("launch.md");
        crate::io::atomic_write(&path, body.as_bytes()).unwrap();
        path
    }

    fn today_audit(dir: &TempDir) -> Vec<crate::audit::AuditEntry> {
        AuditLog::new(dir.path()).read_day(Utc::now().date_naive()).unwrap()
    }

    fn run(dir: &TempDir, remote: &mut dyn AdapterProvider, cfg: &Config, dry_run: bool) -> ExecutionReport {
        let mut ex = Executor::new(dir.path(), cfg, remote).with_sleeper(|_| {});
        ex.execute("social", dry_run)
    }

    #[test]
    fn dry_run_single_valid_action() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE]);
        let mut remote = FakeRemote::ok();
        let report = run(&dir, &mut remote, &Config::default(), true);

        assert!(report.success);
        assert_eq!(report.actions_attempted, 1);
        assert_eq!(report.actions_succeeded, 1);
        assert_eq!(report.results[0].status, ActionStatus::Validated);
        assert!(remote.calls.is_empty());
        assert!(today_audit(&dir).is_empty());
    }

    #[test]
    fn dry_run_missing_caption_fails_validation() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[NO_CAPTION]);
        let mut remote = FakeRemote::ok();
        let report = run(&dir, &mut remote, &Config::default(), true);

        assert!(!report.success);
        assert_eq!(report.actions_succeeded, 0);
        assert!(!report.results[0].valid);
        assert!(report.results[0].error.as_deref().unwrap().contains("caption"));
    }

    #[test]
    fn dry_run_validation_matches_real_run() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE, NO_CAPTION, TEXT_ON_INSTAGRAM, FB_TEXT]);
        let cfg = Config::default();

        let mut dry_remote = FakeRemote::ok();
        let dry = run(&dir, &mut dry_remote, &cfg, true);
        let mut real_remote = FakeRemote::ok();
        let real = run(&dir, &mut real_remote, &cfg, false);

        let outcome = |r: &ExecutionReport| -> Vec<(bool, Option<String>)> {
            r.results
                .iter()
                .map(|a| (a.valid, if a.valid { None } else { a.error.clone() }))
                .collect()
        };
        assert_eq!(outcome(&dry), outcome(&real));
        assert_eq!(real_remote.calls, vec!["instagram.post_image", "facebook.post_text"]);
        assert!(real.results[2].error.as_deref().unwrap().contains("text-only"));
    }

    #[test]
    fn one_audit_entry_per_dispatched_action_in_order() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE, NO_CAPTION, FB_TEXT, IMAGE]);
        let mut remote = FakeRemote::scripted(
            vec![
                Ok(json!({"id": "p1"})),
                Err(AdapterError::Http {
                    status: 400,
                    message: "duplicate post".into(),
                }),
            ],
            Ok(json!({"status": "partial"})),
        );
        let report = run(&dir, &mut remote, &Config::default(), false);

        assert!(!report.success);
        assert_eq!(report.actions_attempted, 4);
        assert_eq!(report.actions_succeeded, 1);
        let entries = today_audit(&dir);
        // The invalid action never reached an adapter, so it has no entry.
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.result).collect::<Vec<_>>(),
            vec![AuditResult::Success, AuditResult::Failure, AuditResult::Partial]
        );
        assert_eq!(entries[0].action_type, "instagram.post_image");
        assert_eq!(entries[1].action_type, "facebook.post_text");
        assert_eq!(entries[1].error.as_deref(), Some("HTTP 400: duplicate post"));
        assert!(entries
            .iter()
            .all(|e| e.approval_ref.as_deref() == Some("20261016-0900-launch") && e.approved_by == "alice"));
        // 400 is not an infrastructure failure: no remediation task.
        assert!(!crate::paths::needs_action_dir(dir.path()).exists());
    }

    #[test]
    fn permission_error_is_not_retried_and_raises_task() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[FB_TEXT]);
        let mut remote = FakeRemote::scripted(
            Vec::new(),
            Err(AdapterError::Permission("token lacks pages_manage_posts".into())),
        );
        let mut slept = Vec::new();
        let cfg = Config::default();
        let report = {
            let mut ex = Executor::new(dir.path(), &cfg, &mut remote).with_sleeper(|d| slept.push(d));
            ex.execute("social", false)
        };

        assert_eq!(remote.calls.len(), 1);
        assert!(slept.is_empty());
        assert!(!report.success);
        assert!(report.results[0].error.as_deref().unwrap().contains("pages_manage_posts"));
        assert_eq!(today_audit(&dir)[0].result, AuditResult::Failure);
        let records = remediation::read_failure_log(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_type, remediation::FailureType::AuthFailure);
    }

    #[test]
    fn rate_limit_is_retried_then_succeeds() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE]);
        let limited = || {
            Err(AdapterError::Http {
                status: 429,
                message: "Too Many Requests".into(),
            })
        };
        let mut remote = FakeRemote::scripted(vec![limited(), limited()], Ok(json!({"id": "p"})));
        let mut slept = Vec::new();
        let cfg = Config::default();
        let report = {
            let mut ex = Executor::new(dir.path(), &cfg, &mut remote).with_sleeper(|d| slept.push(d));
            ex.execute("social", false)
        };

        assert!(report.success);
        assert_eq!(remote.calls.len(), 3);
        assert_eq!(slept, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(today_audit(&dir).len(), 1);
    }

    #[test]
    fn unavailable_adapter_skips_its_later_actions() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE, IMAGE]);
        let mut provider = PartlyOffline {
            down: Server::Instagram,
            remote: FakeRemote::ok(),
        };
        let report = run(&dir, &mut provider, &Config::default(), false);

        assert_eq!(report.results[0].status, ActionStatus::Failed);
        assert_eq!(report.results[1].status, ActionStatus::Skipped);
        assert!(report.results[1].error.as_deref().unwrap().contains("instagram adapter unavailable"));
        assert_eq!(report.actions_attempted, 1);
        assert_eq!(today_audit(&dir).len(), 1);
    }

    #[test]
    fn unavailable_adapter_does_not_stop_other_servers() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[FB_TEXT, IMAGE]);
        let mut provider = PartlyOffline {
            down: Server::Facebook,
            remote: FakeRemote::ok(),
        };
        let report = run(&dir, &mut provider, &Config::default(), false);

        assert_eq!(report.results[0].status, ActionStatus::Failed);
        assert_eq!(report.results[1].status, ActionStatus::Success);
        assert_eq!(provider.remote.calls, vec!["instagram.post_image".to_string()]);
        assert_eq!(report.actions_attempted, 2);
        assert!(!report.success);
        assert_eq!(today_audit(&dir).len(), 2);
    }

    #[test]
    fn stop_on_first_error_skips_the_rest() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[NO_CAPTION, IMAGE]);
        let mut remote = FakeRemote::ok();
        let cfg = Config::default();
        let report = {
            let mut ex = Executor::new(dir.path(), &cfg, &mut remote)
                .stop_on_first_error(true)
                .with_sleeper(|_| {});
            ex.execute("social", false)
        };

        assert_eq!(report.results[1].status, ActionStatus::Skipped);
        assert!(remote.calls.is_empty());
    }

    #[test]
    fn exhausted_budget_fails_actions_with_timeout() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[IMAGE, FB_TEXT]);
        let mut cfg = Config::default();
        cfg.executor.batch_budget_secs = 0;
        let mut remote = FakeRemote::ok();
        let report = run(&dir, &mut remote, &cfg, false);

        assert!(remote.calls.is_empty());
        assert!(report
            .results
            .iter()
            .all(|r| r.status == ActionStatus::Failed && r.error.as_deref().unwrap().contains("timed out")));
        assert_eq!(report.actions_attempted, 2);
    }

    #[test]
    fn missing_plan_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mut remote = FakeRemote::ok();
        let report = run(&dir, &mut remote, &Config::default(), false);

        assert!(!report.success);
        assert_eq!(report.actions_attempted, 0);
        assert!(report.error.as_deref().unwrap().contains("social"));
    }

    #[test]
    fn empty_plan_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_plan(&dir, &[]);
        let mut remote = FakeRemote::ok();
        let report = run(&dir, &mut remote, &Config::default(), true);
        assert!(!report.success);
        assert!(report.error.is_some());
    }

    #[test]
    fn plan_file_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_plan(&dir, &[IMAGE]);
        let before = std::fs::read(&path).unwrap();
        let mut remote = FakeRemote::ok();
        run(&dir, &mut remote, &Config::default(), false);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
