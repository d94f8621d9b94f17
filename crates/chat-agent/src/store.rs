//! Durable conversation history, one history per agent name.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::models::message::Message;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Load the history for an agent, empty if nothing was saved yet
    async fn load(&self, name: &str) -> Result<Vec<Message>>;

    /// Replace the history for an agent
    async fn save(&self, name: &str, messages: &[Message]) -> Result<()>;

    async fn clear(&self, name: &str) -> Result<()>;
}

/// Keeps histories in process memory only
#[derive(Default)]
pub struct MemoryStore {
    histories: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn load(&self, name: &str) -> Result<Vec<Message>> {
        Ok(self
            .histories
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, name: &str, messages: &[Message]) -> Result<()> {
        self.histories
            .lock()
            .await
            .insert(name.to_string(), messages.to_vec());
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        self.histories.lock().await.remove(name);
        Ok(())
    }
}

/// Stores each history as a JSON lines file, `<dir>/<name>.jsonl`
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn history_file(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("Invalid agent name: {:?}", name));
        }
        Ok(self.dir.join(format!("{}.jsonl", name)))
    }
}

#[async_trait]
impl MessageStore for JsonlStore {
    async fn load(&self, name: &str) -> Result<Vec<Message>> {
        let path = self.history_file(name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            messages.push(serde_json::from_str(line)?);
        }
        Ok(messages)
    }

    async fn save(&self, name: &str, messages: &[Message]) -> Result<()> {
        let path = self.history_file(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut content = String::new();
        for message in messages {
            content.push_str(&serde_json::to_string(message)?);
            content.push('\n');
        }

        // Write then rename so a crash never leaves a half written history behind
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        let path = self.history_file(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ToolCallState;
    use serde_json::json;

    fn history() -> Vec<Message> {
        vec![
            Message::user().with_text("remind me to stretch"),
            Message::assistant()
                .with_text("Done")
                .with_tool_call(
                    "call_1",
                    "scheduleTask",
                    json!({"description": "stretch"}),
                    ToolCallState::Resolved {
                        output: json!("scheduled"),
                    },
                ),
        ]
    }

    #[tokio::test]
    async fn test_jsonl_store_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonlStore::new(dir.path().join("sessions"));

        assert!(store.load("default").await?.is_empty());

        let messages = history();
        store.save("default", &messages).await?;

        let reopened = JsonlStore::new(dir.path().join("sessions"));
        assert_eq!(reopened.load("default").await?, messages);

        reopened.clear("default").await?;
        assert!(reopened.load("default").await?.is_empty());
        reopened.clear("default").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_jsonl_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        assert!(store.load("../escape").await.is_err());
        assert!(store.save("", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_isolates_names() -> Result<()> {
        let store = MemoryStore::new();
        store.save("a", &history()).await?;
        assert_eq!(store.load("a").await?.len(), 2);
        assert!(store.load("b").await?.is_empty());
        store.clear("a").await?;
        assert!(store.load("a").await?.is_empty());
        Ok(())
    }
}
