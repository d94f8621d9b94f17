use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{AgentError, AgentResult};
use crate::prompt_template::load_prompt_file;
use crate::scheduler::schedule_prompt;

#[derive(Serialize)]
struct SystemPromptContext {
    schedule_block: String,
}

/// Build the system prompt for a chat turn. The scheduling context is only
/// included when the user asked for something scheduling related.
pub fn build_system_prompt(wants_scheduling: bool, now: DateTime<Utc>) -> AgentResult<String> {
    let schedule_block = if wants_scheduling {
        schedule_prompt(now)?
    } else {
        String::new()
    };

    load_prompt_file("system.md", &SystemPromptContext { schedule_block })
        .map_err(|e| AgentError::Internal(e.to_string()))
}
