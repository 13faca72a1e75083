use super::documents::SimilarDoc;
use super::llm::ChatMessage;
use crate::history::{Role, Turn};

const DOCS_PREAMBLE: &str = "You are a helpful assistant. Use the provided documents when relevant.";

/// Compose the completion request: optional document context, prior turns in
/// order, then the current question.
pub fn build_messages(history: &[Turn], query: &str, similar_docs: &[SimilarDoc]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    if !similar_docs.is_empty() {
        let mut lines = vec![DOCS_PREAMBLE.to_string(), "Similar documents:".to_string()];
        for (i, doc) in similar_docs.iter().enumerate() {
            lines.push(format!("{}. {}\n   {}", i + 1, doc.title, doc.content));
        }
        messages.push(ChatMessage::new(Role::System, lines.join("\n")));
    }

    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::new(Role::User, query));
    messages
}
