//! Tools offered to the model, and the handlers that run them.
//!
//! A [`ToolSet`] maps tool names to their schema and an optional handler. Tools
//! without a handler need human confirmation; their handler lives in the
//! [`Executions`] map and only runs once the call has been confirmed.
pub mod local_info;
pub mod scheduling;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::errors::AgentResult;
use crate::models::tool::Tool;
use crate::scheduler::Scheduler;

/// Runs a tool with the arguments chosen by the model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> AgentResult<Value>;
}

/// Adapter so plain async closures can serve as handlers
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, AgentResult<Value>> + Send + Sync,
{
    async fn call(&self, input: Value) -> AgentResult<Value> {
        (self.0)(input).await
    }
}

pub fn handler<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> BoxFuture<'static, AgentResult<Value>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers for tools that require confirmation before running, keyed by tool name
pub type Executions = HashMap<String, Arc<dyn ToolHandler>>;

#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Tool,
    /// `None` when the tool needs human confirmation before it runs
    pub execute: Option<Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("tool", &self.tool.name)
            .field("auto_execute", &self.execute.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ToolSet {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any existing tool with the same name
    pub fn with_tool(mut self, tool: Tool, execute: Option<Arc<dyn ToolHandler>>) -> Self {
        self.entries
            .insert(tool.name.clone(), ToolEntry { tool, execute });
        self
    }

    /// Key union of two sets. On a name collision the entry from `other` wins.
    pub fn union(&self, other: &ToolSet) -> ToolSet {
        let mut entries = self.entries.clone();
        for (name, entry) in &other.entries {
            entries.insert(name.clone(), entry.clone());
        }
        ToolSet { entries }
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Tool schemas in name order, as offered to the model
    pub fn tools(&self) -> Vec<Tool> {
        self.entries.values().map(|entry| entry.tool.clone()).collect()
    }
}

/// The tools every chat agent carries, together with their confirmation handlers
pub fn default_tools(scheduler: Arc<Scheduler>) -> (ToolSet, Executions) {
    let tools = scheduling::tools(scheduler).union(&local_info::tools());
    (tools, local_info::executions())
}
