//! The chat agent: one addressable conversation with its own history and scheduler.
//!
//! A chat turn cleans the stored history, runs any tool calls the user confirmed,
//! decides whether scheduling tools are relevant, and streams the model's reply.
//! Fired schedules come back through [`ChatAgent::execute_task`].
pub mod intent;
pub mod prompt;
pub mod sanitize;
pub mod streamer;
pub mod tool_calls;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolCallState};
use crate::models::role::Role;
use crate::providers::base::Provider;
use crate::scheduler::{Schedule, Scheduler, TaskCallback};
use crate::store::MessageStore;
use crate::tools::{default_tools, Executions, ToolSet};
use crate::ui_stream::UiStreamWriter;

pub use intent::wants_scheduling;
pub use prompt::build_system_prompt;
pub use sanitize::sanitize_messages;
pub use streamer::{stream_response, OnFinish, StreamOutcome, StreamRequest, MAX_STEPS};
pub use tool_calls::process_tool_calls;

/// Collaborators shared by every agent instance
#[derive(Clone)]
pub struct AgentContext {
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn MessageStore>,
    pub clock: SharedClock,
    /// Tools discovered outside the agent, merged over the built in ones
    pub extra_tools: ToolSet,
}

pub struct ChatAgent {
    name: String,
    context: AgentContext,
    tools: ToolSet,
    executions: Executions,
    scheduler: Arc<Scheduler>,
    history: Mutex<()>,
}

fn store_error(e: anyhow::Error) -> AgentError {
    AgentError::Store(e.to_string())
}

impl ChatAgent {
    pub fn new(name: impl Into<String>, context: AgentContext) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|agent: &Weak<ChatAgent>| {
            let callback: Weak<dyn TaskCallback> = agent.clone();
            let scheduler = Arc::new(Scheduler::new(callback, context.clock.clone()));
            let (tools, executions) = default_tools(scheduler.clone());
            ChatAgent {
                name,
                context,
                tools,
                executions,
                scheduler,
                history: Mutex::new(()),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Persisted history for this agent
    pub async fn messages(&self) -> AgentResult<Vec<Message>> {
        self.context
            .store
            .load(&self.name)
            .await
            .map_err(store_error)
    }

    /// Replace the persisted history
    pub async fn save_messages(&self, messages: &[Message]) -> AgentResult<()> {
        let _guard = self.history.lock().await;
        self.context
            .store
            .save(&self.name, messages)
            .await
            .map_err(store_error)
    }

    pub async fn clear(&self) -> AgentResult<()> {
        let _guard = self.history.lock().await;
        self.context.store.clear(&self.name).await.map_err(store_error)
    }

    /// Load, change and save the history as one step
    async fn update_history<F>(&self, update: F) -> AgentResult<()>
    where
        F: FnOnce(&mut Vec<Message>) + Send,
    {
        let _guard = self.history.lock().await;
        let mut messages = self
            .context
            .store
            .load(&self.name)
            .await
            .map_err(store_error)?;
        update(&mut messages);
        self.context
            .store
            .save(&self.name, &messages)
            .await
            .map_err(store_error)
    }

    /// Tools offered for this turn: none unless the user asked about scheduling
    pub fn tools_for_turn(&self, wants_scheduling: bool) -> ToolSet {
        if wants_scheduling {
            self.tools.union(&self.context.extra_tools)
        } else {
            ToolSet::new()
        }
    }

    /// Answer the persisted conversation, streaming the reply into `writer`.
    ///
    /// Once the reply completes, the confirmed tool calls run during this turn and
    /// the new assistant message are written back to history. Cancelling `cancel`
    /// stops generation and nothing is appended.
    pub async fn on_chat_message(
        self: &Arc<Self>,
        writer: &UiStreamWriter,
        cancel: &CancellationToken,
    ) -> AgentResult<StreamOutcome> {
        let messages = self.messages().await?;
        let wants = wants_scheduling(&messages);
        let tools = self.tools_for_turn(wants);
        info!(
            agent = %self.name,
            scheduling = wants,
            tools = tools.len(),
            "chat turn"
        );

        let cleaned = sanitize_messages(&messages);
        let processed = process_tool_calls(cleaned, writer, &tools, &self.executions).await;
        let settled = settled_calls(&messages, &processed);
        let system = build_system_prompt(wants, self.context.clock.now())?;

        let agent = Arc::clone(self);
        let on_finish: OnFinish = Box::new(move |message| {
            Box::pin(async move {
                if let Err(e) = agent.record_turn(settled, message).await {
                    warn!(agent = %agent.name, "failed to save chat turn: {}", e);
                }
            })
        });

        let request = StreamRequest {
            system,
            messages: processed,
            tools: &tools,
            created_at: self.context.clock.now(),
        };
        stream_response(
            self.context.provider.as_ref(),
            request,
            writer,
            cancel,
            on_finish,
        )
        .await
    }

    /// Store the outcome of each call run this turn and append the reply.
    /// Every other part of the history, including calls still awaiting
    /// confirmation and messages added while the turn ran, is left as stored.
    async fn record_turn(&self, settled: SettledCalls, reply: Message) -> AgentResult<()> {
        self.update_history(move |messages| {
            for message in messages.iter_mut() {
                let id = message.id.clone();
                for call in message.tool_calls_mut() {
                    if let Some(state) = settled.get(&(id.clone(), call.tool_call_id.clone())) {
                        call.state = state.clone();
                    }
                }
            }
            messages.push(reply);
        })
        .await
    }

    /// Append the synthetic user message for a fired schedule. The model is not
    /// called here; the next chat turn answers it.
    pub async fn execute_task(&self, description: &str) -> AgentResult<()> {
        let message = Message::new(Role::User, self.context.clock.now())
            .with_text(format!("Running scheduled task: {}", description));
        debug!(agent = %self.name, "appending scheduled task message");
        self.update_history(move |messages| messages.push(message))
            .await
    }
}

#[async_trait]
impl TaskCallback for ChatAgent {
    async fn execute_task(&self, description: &str, _schedule: &Schedule) -> AgentResult<()> {
        ChatAgent::execute_task(self, description).await
    }
}

/// Creates agents on first use and hands out the same instance per name afterwards
pub struct AgentRegistry {
    context: AgentContext,
    agents: Mutex<HashMap<String, Arc<ChatAgent>>>,
}

impl AgentRegistry {
    pub fn new(context: AgentContext) -> Self {
        Self {
            context,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, name: &str) -> AgentResult<Arc<ChatAgent>> {
        if !is_valid_agent_name(name) {
            return Err(AgentError::InvalidParameters(format!(
                "invalid agent name: {:?}",
                name
            )));
        }

        let mut agents = self.agents.lock().await;
        let agent = agents
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(agent = %name, "creating agent");
                ChatAgent::new(name, self.context.clone())
            })
            .clone();
        Ok(agent)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ChatAgent>> {
        self.agents.lock().await.get(name).cloned()
    }
}

/// New states of the calls that were confirmed before the turn, keyed by message id and call id
type SettledCalls = HashMap<(String, String), ToolCallState>;

fn settled_calls(before: &[Message], after: &[Message]) -> SettledCalls {
    let confirmed: HashSet<(&str, &str)> = before
        .iter()
        .flat_map(|message| {
            message
                .tool_calls()
                .filter(|call| call.state == ToolCallState::Confirmed)
                .map(move |call| (message.id.as_str(), call.tool_call_id.as_str()))
        })
        .collect();

    after
        .iter()
        .flat_map(|message| {
            message
                .tool_calls()
                .filter(|call| call.state.is_terminal())
                .map(move |call| (message, call))
        })
        .filter(|(message, call)| {
            confirmed.contains(&(message.id.as_str(), call.tool_call_id.as_str()))
        })
        .map(|(message, call)| {
            (
                (message.id.clone(), call.tool_call_id.clone()),
                call.state.clone(),
            )
        })
        .collect()
}

fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::providers::mock::MockProvider;
    use crate::store::MemoryStore;
    use crate::tools::local_info::GET_WEATHER_INFORMATION;
    use crate::tools::scheduling::SCHEDULE_TASK;
    use crate::ui_stream::UiEvent;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context(provider: MockProvider) -> AgentContext {
        AgentContext {
            provider: Arc::new(provider),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap())),
            extra_tools: ToolSet::new(),
        }
    }

    async fn run_turn(agent: &Arc<ChatAgent>) -> (AgentResult<StreamOutcome>, Vec<UiEvent>) {
        let (writer, mut rx): (UiStreamWriter, mpsc::Receiver<UiEvent>) =
            UiStreamWriter::channel(256);
        let result = agent
            .on_chat_message(&writer, &CancellationToken::new())
            .await;
        drop(writer);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn test_plain_turn_has_no_tools_or_schedule_block() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Sunny, probably")]);
        let agent = ChatAgent::new("default", context(provider.clone()));
        agent
            .save_messages(&[Message::user().with_text("what's the weather")])
            .await
            .unwrap();

        let (result, _) = run_turn(&agent).await;
        assert_eq!(result.unwrap(), StreamOutcome::Finished);

        let calls = provider.calls();
        assert!(calls[0].tools.is_empty());
        assert!(!calls[0].system.contains("Schedule Parser"));

        let history = agent.messages().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text(), "Sunny, probably");
    }

    #[tokio::test]
    async fn test_scheduling_turn_offers_tools_and_prompt() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("ok")]);
        let agent = ChatAgent::new("default", context(provider.clone()));
        agent
            .save_messages(&[Message::user().with_text("Remind me to stretch")])
            .await
            .unwrap();

        run_turn(&agent).await.0.unwrap();

        let calls = provider.calls();
        let names: Vec<&str> = calls[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&SCHEDULE_TASK));
        assert!(names.contains(&GET_WEATHER_INFORMATION));
        assert!(calls[0].system.contains("Schedule Parser"));
        assert!(calls[0]
            .system
            .contains(&Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap().to_rfc2822()));
    }

    #[tokio::test]
    async fn test_extra_tools_override_built_in() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("ok")]);
        let mut ctx = context(provider.clone());
        ctx.extra_tools = ToolSet::new().with_tool(
            crate::models::tool::Tool::new(SCHEDULE_TASK, "remote scheduler", json!({})),
            None,
        );
        let agent = ChatAgent::new("default", ctx);
        assert_eq!(
            agent.tools_for_turn(true).get(SCHEDULE_TASK).unwrap().tool.description,
            "remote scheduler"
        );
        assert!(agent.tools_for_turn(false).is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_call_runs_and_is_saved() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("It is sunny")]);
        let agent = ChatAgent::new("default", context(provider.clone()));
        let ask = Message::user().with_text("weather in Lisbon?");
        let call = Message::assistant().with_tool_call(
            "call_1",
            GET_WEATHER_INFORMATION,
            json!({"city": "Lisbon"}),
            ToolCallState::Confirmed,
        );
        agent.save_messages(&[ask, call]).await.unwrap();

        let (_, events) = run_turn(&agent).await;
        assert_eq!(
            events[0],
            UiEvent::ToolResult {
                id: "call_1".to_string(),
                result: json!("The weather in Lisbon is sunny"),
            }
        );

        let history = agent.messages().await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(matches!(
            history[1].tool_calls().next().unwrap().state,
            ToolCallState::Resolved { .. }
        ));
    }

    #[tokio::test]
    async fn test_pending_confirmation_survives_a_turn() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Porto is sunny")]);
        let agent = ChatAgent::new("default", context(provider.clone()));
        let pending = Message::assistant()
            .with_text("Let me check the weather.")
            .with_tool_call(
                "call_weather",
                GET_WEATHER_INFORMATION,
                json!({"city": "Lisbon"}),
                ToolCallState::PendingConfirmation,
            )
            .with_tool_call(
                "call_porto",
                GET_WEATHER_INFORMATION,
                json!({"city": "Porto"}),
                ToolCallState::Confirmed,
            );
        agent
            .save_messages(&[Message::user().with_text("weather in Lisbon and Porto?"), pending.clone()])
            .await
            .unwrap();

        run_turn(&agent).await.0.unwrap();

        // the model never sees the pending call
        let sent = &provider.calls()[0].messages;
        assert!(sent[1].tool_calls().all(|c| c.tool_call_id != "call_weather"));

        let history = agent.messages().await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].id, pending.id);
        assert_eq!(history[1].parts.len(), 3);
        assert_eq!(history[1].first_text(), Some("Let me check the weather."));
        let states: Vec<&ToolCallState> = history[1].tool_calls().map(|c| &c.state).collect();
        assert_eq!(states[0], &ToolCallState::PendingConfirmation);
        assert!(matches!(states[1], ToolCallState::Resolved { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_calls_never_reach_model() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("ok")]);
        let agent = ChatAgent::new("default", context(provider.clone()));
        agent
            .save_messages(&[
                Message::user().with_text("hi"),
                Message::assistant().with_tool_call(
                    "call_1",
                    GET_WEATHER_INFORMATION,
                    json!({"city": "Lisbon"}),
                    ToolCallState::PendingConfirmation,
                ),
            ])
            .await
            .unwrap();

        run_turn(&agent).await.0.unwrap();
        let sent = &provider.calls()[0].messages;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].first_text(), Some("hi"));
    }

    #[tokio::test]
    async fn test_provider_failure_saves_nothing() {
        let provider = MockProvider::with_results(vec![Err("upstream down".to_string())]);
        let agent = ChatAgent::new("default", context(provider));
        agent
            .save_messages(&[Message::user().with_text("hi")])
            .await
            .unwrap();

        let (result, events) = run_turn(&agent).await;
        assert!(result.is_err());
        assert_eq!(events[0], UiEvent::Error("upstream down".to_string()));
        assert_eq!(agent.messages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_task_appends_user_message() {
        let agent = ChatAgent::new("default", context(MockProvider::new(vec![])));
        let prior = vec![
            Message::user().with_text("remind me"),
            Message::assistant().with_text("done"),
        ];
        agent.save_messages(&prior).await.unwrap();

        agent.execute_task("Send weekly report").await.unwrap();

        let history = agent.messages().await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(&history[..2], &prior[..]);
        assert_eq!(history[2].role, Role::User);
        assert_eq!(history[2].parts.len(), 1);
        assert_eq!(
            history[2].first_text(),
            Some("Running scheduled task: Send weekly report")
        );
        assert_eq!(
            history[2].metadata.created_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_registry_reuses_agents() {
        let registry = AgentRegistry::new(context(MockProvider::new(vec![])));
        let first = registry.get_or_create("alpha").await.unwrap();
        let again = registry.get_or_create("alpha").await.unwrap();
        let other = registry.get_or_create("beta").await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(registry.get("gamma").await.is_none());
        assert!(registry.get_or_create("../etc").await.is_err());
        assert!(registry.get_or_create("").await.is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let agent = ChatAgent::new("default", context(MockProvider::new(vec![])));
        agent
            .save_messages(&[Message::user().with_text("hi")])
            .await
            .unwrap();
        agent.clear().await.unwrap();
        assert!(agent.messages().await.unwrap().is_empty());
    }
}
