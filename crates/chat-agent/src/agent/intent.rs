use lazy_static::lazy_static;
use regex::Regex;

use crate::models::message::Message;
use crate::models::role::Role;

lazy_static! {
    static ref SCHEDULING_INTENT: Regex =
        Regex::new(r"(?i)(schedule|remind|reminder|task|todo|calendar|appointment)").unwrap();
}

/// First text part of the most recent user message, empty when there is none
pub fn last_user_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .and_then(Message::first_text)
        .unwrap_or_default()
}

/// Whether the latest user message asks for anything scheduling related.
/// Scheduling tools and the scheduling prompt are only offered when it does.
pub fn wants_scheduling(messages: &[Message]) -> bool {
    SCHEDULING_INTENT.is_match(last_user_text(messages))
}
