//! These models represent the objects passed around by the chat agent
//!
//! There are a few related formats we need to interact with:
//! - ui messages with typed parts, sent from the chat interface and persisted per agent
//! - data stream protocol events, sent from the agent to the interface
//! - openai compatible messages/tools, sent from the agent to the LLM
//!
//! The ui message shape is the internal one. Tool calls carry an explicit state rather
//! than having it inferred from which optional fields happen to be present.
pub mod message;
pub mod role;
pub mod tool;
