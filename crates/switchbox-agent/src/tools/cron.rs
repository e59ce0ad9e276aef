//! Cron tool — lets the agent schedule tasks for future execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use switchbox_core::types::ToolResult;
use switchbox_cron::{CronJob, CronPayload, CronPayloadKind, CronSchedule, CronService};

use super::base::{optional_bool, optional_i64, optional_string, require_string, ContextualTool, Tool};

/// Schedule one-time or recurring tasks. The agent drives this the same way
/// it drives `message` — `set_context` pins the conversation a new job
/// delivers its result to, `set_service` wires in the shared scheduler.
pub struct CronTool {
    service: Mutex<Option<Arc<CronService>>>,
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new() -> Self {
        Self {
            service: Mutex::new(None),
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Attach the shared cron service. Called once during gateway startup.
    pub async fn set_service(&self, service: Arc<CronService>) {
        *self.service.lock().await = Some(service);
    }
}

impl Default for CronTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule tasks for future execution. Supports one-time delays, \
         recurring intervals, and cron expressions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove", "enable", "disable"],
                    "description": "Action to perform"
                },
                "name": {"type": "string", "description": "Job name (for add)"},
                "message": {"type": "string", "description": "Task prompt (for add)"},
                "command": {"type": "string", "description": "Shell command to run (for add)"},
                "at_seconds": {"type": "integer", "description": "One-time delay in seconds from now (for add)"},
                "every_seconds": {"type": "integer", "description": "Recurring interval in seconds (for add)"},
                "cron_expr": {"type": "string", "description": "Cron expression e.g. '0 9 * * *' (for add)"},
                "deliver": {"type": "boolean", "description": "Send result directly to channel (default true)"},
                "job_id": {"type": "string", "description": "Job ID (for remove/enable/disable)"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let action = require_string(&params, "action")?;

        let service = self.service.lock().await.clone();
        let Some(service) = service else {
            return Ok(ToolResult::error("Cron service not initialized"));
        };

        match action.as_str() {
            "add" => self.add_job(&service, &params).await,
            "list" => Ok(list_jobs(&service).await),
            "remove" => Ok(remove_job(&service, &optional_string(&params, "job_id").unwrap_or_default()).await),
            "enable" => Ok(toggle_job(&service, &optional_string(&params, "job_id").unwrap_or_default(), true).await),
            "disable" => Ok(toggle_job(&service, &optional_string(&params, "job_id").unwrap_or_default(), false).await),
            other => Ok(ToolResult::error(format!("Unknown action: {other}"))),
        }
    }

    fn as_contextual(&self) -> Option<&dyn ContextualTool> {
        Some(self)
    }
}

#[async_trait]
impl ContextualTool for CronTool {
    async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

impl CronTool {
    async fn add_job(&self, service: &CronService, params: &HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let name = optional_string(params, "name").unwrap_or_else(|| "Unnamed job".to_string());
        let message = optional_string(params, "message").unwrap_or_default();
        let command = optional_string(params, "command");
        let deliver = optional_bool(params, "deliver");

        if message.is_empty() && command.is_none() {
            return Ok(ToolResult::error("Either 'message' or 'command' is required"));
        }

        let schedule = if let Some(at_seconds) = optional_i64(params, "at_seconds") {
            let at_ms = chrono::Utc::now().timestamp_millis() + at_seconds * 1000;
            CronSchedule::at(at_ms)
        } else if let Some(every_seconds) = optional_i64(params, "every_seconds") {
            CronSchedule::every(every_seconds * 1000)
        } else if let Some(expr) = optional_string(params, "cron_expr") {
            CronSchedule::cron(expr)
        } else {
            return Ok(ToolResult::error(
                "One of at_seconds, every_seconds, or cron_expr is required",
            ));
        };

        let (channel, chat_id) = self.context.lock().await.clone();
        let kind = if command.is_some() {
            CronPayloadKind::ShellCommand
        } else {
            CronPayloadKind::AgentTurn
        };
        let payload = CronPayload {
            kind,
            message,
            command,
            deliver,
            channel: Some(channel),
            to: Some(chat_id),
        };

        let job = CronJob::new(&name, schedule, payload);
        let id = job.id.clone();
        service.add_job(job).await?;
        Ok(ToolResult::success(format!("Job '{name}' created with ID: {id}")))
    }
}

async fn list_jobs(service: &CronService) -> ToolResult {
    let jobs = service.list_jobs().await;
    if jobs.is_empty() {
        return ToolResult::success("No scheduled jobs.");
    }
    let lines: Vec<String> = jobs
        .iter()
        .map(|job| {
            let status = if job.enabled { "enabled" } else { "disabled" };
            format!("- {} (ID: {}, {})", job.name, job.id, status)
        })
        .collect();
    ToolResult::success(lines.join("\n"))
}

async fn remove_job(service: &CronService, job_id: &str) -> ToolResult {
    if job_id.is_empty() {
        return ToolResult::error("job_id is required");
    }
    match service.remove_job(job_id).await {
        Ok(true) => ToolResult::success(format!("Job {job_id} removed.")),
        Ok(false) => ToolResult::error(format!("Job {job_id} not found.")),
        Err(e) => ToolResult::error(format!("Failed to remove job: {e}")),
    }
}

async fn toggle_job(service: &CronService, job_id: &str, enabled: bool) -> ToolResult {
    if job_id.is_empty() {
        return ToolResult::error("job_id is required");
    }
    let state = if enabled { "enabled" } else { "disabled" };
    match service.set_enabled(job_id, enabled).await {
        Ok(true) => ToolResult::success(format!("Job {job_id} {state}.")),
        Ok(false) => ToolResult::error(format!("Job {job_id} not found.")),
        Err(e) => ToolResult::error(format!("Failed to update job: {e}")),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use switchbox_core::bus::queue::MessageBus;

    fn make_service() -> Arc<CronService> {
        Arc::new(CronService::new(Arc::new(MessageBus::new(8)), None))
    }

    #[tokio::test]
    async fn test_execute_without_service() {
        let tool = CronTool::new();
        let mut params = HashMap::new();
        params.insert("action".into(), json!("list"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_add_job_requires_message_or_command() {
        let tool = CronTool::new();
        tool.set_service(make_service()).await;
        let mut params = HashMap::new();
        params.insert("action".into(), json!("add"));
        params.insert("every_seconds".into(), json!(60));
        let result = tool.execute(params).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_add_job_requires_schedule() {
        let tool = CronTool::new();
        tool.set_service(make_service()).await;
        let mut params = HashMap::new();
        params.insert("action".into(), json!("add"));
        params.insert("message".into(), json!("check the weather"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_add_then_list_then_remove() {
        let tool = CronTool::new();
        tool.set_service(make_service()).await;
        tool.set_context("telegram", "chat_1").await;

        let mut add_params = HashMap::new();
        add_params.insert("action".into(), json!("add"));
        add_params.insert("name".into(), json!("daily check"));
        add_params.insert("message".into(), json!("check the weather"));
        add_params.insert("every_seconds".into(), json!(3600));
        let added = tool.execute(add_params).await.unwrap();
        assert!(!added.is_error);
        assert!(added.for_llm.contains("created with ID"));
        let job_id = added.for_llm.rsplit(": ").next().unwrap().to_string();

        let mut list_params = HashMap::new();
        list_params.insert("action".into(), json!("list"));
        let listed = tool.execute(list_params).await.unwrap();
        assert!(listed.for_llm.contains("daily check"));

        let mut remove_params = HashMap::new();
        remove_params.insert("action".into(), json!("remove"));
        remove_params.insert("job_id".into(), json!(job_id));
        let removed = tool.execute(remove_params).await.unwrap();
        assert!(removed.for_llm.contains("removed"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let tool = CronTool::new();
        tool.set_service(make_service()).await;
        let mut params = HashMap::new();
        params.insert("action".into(), json!("explode"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.is_error);
    }
}
