use serde_json::{json, Value};

use super::{handler, Executions, ToolSet};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const GET_WEATHER_INFORMATION: &str = "getWeatherInformation";
pub const GET_LOCAL_TIME: &str = "getLocalTime";

fn required_str(input: &Value, field: &str) -> AgentResult<String> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AgentError::InvalidParameters(format!("{} parameter required", field)))
}

/// Weather needs confirmation before it runs; local time runs straight away
pub fn tools() -> ToolSet {
    ToolSet::new()
        .with_tool(
            Tool::new(
                GET_WEATHER_INFORMATION,
                "show the weather in a given city to the user",
                json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }),
            ),
            None,
        )
        .with_tool(
            Tool::new(
                GET_LOCAL_TIME,
                "get the local time for a specified location",
                json!({
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }),
            ),
            Some(handler(|input| {
                Box::pin(async move {
                    let location = required_str(&input, "location")?;
                    tracing::debug!("getting local time for {}", location);
                    Ok::<_, AgentError>(json!("10am"))
                })
            })),
        )
}

/// Handlers that only run once a human confirmed the call
pub fn executions() -> Executions {
    let mut executions = Executions::new();
    executions.insert(
        GET_WEATHER_INFORMATION.to_string(),
        handler(|input| {
            Box::pin(async move {
                let city = required_str(&input, "city")?;
                Ok::<_, AgentError>(json!(format!("The weather in {} is sunny", city)))
            })
        }),
    );
    executions
}
