use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ToolHandler, ToolSet};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;
use crate::scheduler::{Scheduler, When};

pub const SCHEDULE_TASK: &str = "scheduleTask";
pub const GET_SCHEDULED_TASKS: &str = "getScheduledTasks";
pub const CANCEL_SCHEDULED_TASK: &str = "cancelScheduledTask";

#[derive(Debug, Deserialize)]
struct ScheduleTaskInput {
    description: String,
    when: When,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelTaskInput {
    task_id: String,
}

struct ScheduleTask(Arc<Scheduler>);

#[async_trait]
impl ToolHandler for ScheduleTask {
    async fn call(&self, input: Value) -> AgentResult<Value> {
        let input: ScheduleTaskInput = serde_json::from_value(input)
            .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;

        if input.when == When::NoSchedule {
            return Ok(json!("Not a valid schedule input"));
        }

        let schedule = self.0.schedule(&input.when, &input.description)?;
        Ok(json!(format!(
            "Task {} scheduled for {}: {}",
            schedule.id,
            schedule.time.to_rfc3339(),
            schedule.description
        )))
    }
}

struct GetScheduledTasks(Arc<Scheduler>);

#[async_trait]
impl ToolHandler for GetScheduledTasks {
    async fn call(&self, _input: Value) -> AgentResult<Value> {
        let schedules = self.0.list()?;
        if schedules.is_empty() {
            return Ok(json!("No scheduled tasks found."));
        }
        serde_json::to_value(schedules).map_err(|e| AgentError::Internal(e.to_string()))
    }
}

struct CancelScheduledTask(Arc<Scheduler>);

#[async_trait]
impl ToolHandler for CancelScheduledTask {
    async fn call(&self, input: Value) -> AgentResult<Value> {
        let input: CancelTaskInput = serde_json::from_value(input)
            .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;

        if self.0.cancel(&input.task_id)? {
            Ok(json!(format!(
                "Task {} has been successfully canceled.",
                input.task_id
            )))
        } else {
            Err(AgentError::ExecutionError(format!(
                "No scheduled task with id {}",
                input.task_id
            )))
        }
    }
}

/// Tools that create, list and cancel scheduled tasks. All of them run without confirmation.
pub fn tools(scheduler: Arc<Scheduler>) -> ToolSet {
    ToolSet::new()
        .with_tool(
            Tool::new(
                SCHEDULE_TASK,
                "A tool to schedule a task to be executed at a later time",
                json!({
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "What should happen when the task runs"
                        },
                        "when": {
                            "type": "object",
                            "properties": {
                                "type": {
                                    "type": "string",
                                    "enum": ["scheduled", "delayed", "cron", "no-schedule"]
                                },
                                "date": {"type": "string", "format": "date-time"},
                                "delayInSeconds": {"type": "number"},
                                "cron": {"type": "string"}
                            },
                            "required": ["type"]
                        }
                    },
                    "required": ["description", "when"]
                }),
            ),
            Some(Arc::new(ScheduleTask(scheduler.clone()))),
        )
        .with_tool(
            Tool::new(
                GET_SCHEDULED_TASKS,
                "List all tasks that have been scheduled",
                json!({"type": "object", "properties": {}}),
            ),
            Some(Arc::new(GetScheduledTasks(scheduler.clone()))),
        )
        .with_tool(
            Tool::new(
                CANCEL_SCHEDULED_TASK,
                "Cancel a scheduled task using its ID",
                json!({
                    "type": "object",
                    "properties": {
                        "taskId": {
                            "type": "string",
                            "description": "The ID of the task to cancel"
                        }
                    },
                    "required": ["taskId"]
                }),
            ),
            Some(Arc::new(CancelScheduledTask(scheduler))),
        )
}
