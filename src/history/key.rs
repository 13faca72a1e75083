//! Conversation addressing
//!
//! A conversation is addressed by `(user_id, chat_id)`. The store filters on the
//! raw pair; the cache uses a single string key built as
//! `{prefix}:user_{user_id}:{chat_id}` with `%` and `:` escaped inside each
//! identifier, so two distinct pairs can never produce the same key.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    user_id: String,
    chat_id: String,
}

impl ConversationKey {
    pub fn new(user_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Key of this conversation's list in the cache namespace `prefix`
    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{}:user_{}:{}",
            prefix,
            escape_component(&self.user_id),
            escape_component(&self.chat_id)
        )
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user_{}:{}",
            escape_component(&self.user_id),
            escape_component(&self.chat_id)
        )
    }
}

fn escape_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}
