//! Query orchestration
//!
//! One user query: history → optional similar documents → completion →
//! record both turns. Recording failures are logged and never hold back an
//! answer that has already been produced.

use crate::core::documents::{DocumentClient, SimilarDocs};
use crate::core::llm::{CompletionError, LLMClient};
use crate::core::prompt::build_messages;
use crate::history::{ConversationKey, HistoryCoordinator, HistoryError, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub chat_id: String,
    pub query: String,
    #[serde(default)]
    pub selected_doc_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
}

impl QueryRequest {
    fn validate(&self) -> Result<(), QueryError> {
        for (field, value) in [
            ("user_id", &self.user_id),
            ("chat_id", &self.chat_id),
            ("query", &self.query),
        ] {
            if value.trim().is_empty() {
                return Err(QueryError::InvalidRequest(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    fn doc_title(&self) -> Option<&str> {
        self.selected_doc_title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
    }
}

pub struct QueryService {
    history: Arc<HistoryCoordinator>,
    documents: DocumentClient,
    llm: LLMClient,
}

impl QueryService {
    pub fn new(history: Arc<HistoryCoordinator>, documents: DocumentClient, llm: LLMClient) -> Self {
        Self {
            history,
            documents,
            llm,
        }
    }

    pub fn history(&self) -> &Arc<HistoryCoordinator> {
        &self.history
    }

    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        request.validate()?;
        let key = ConversationKey::new(&request.user_id, &request.chat_id);

        let history = self.history.get_history(&key, None).await?;

        let similar = match request.doc_title() {
            Some(title) => self.documents.fetch_similar(title, &request.query).await,
            None => SimilarDocs::Empty,
        };
        if let SimilarDocs::Unavailable(reason) = &similar {
            tracing::info!(conversation = %key, %reason, "Answering without similar documents");
        }

        let messages = build_messages(&history, &request.query, similar.docs());
        tracing::debug!(
            conversation = %key,
            history = history.len(),
            documents = similar.docs().len(),
            messages = messages.len(),
            "Prompt composed"
        );

        let answer = self.llm.complete(&messages).await?;

        self.record_exchange(&key, &request.query, &answer).await;

        Ok(QueryResponse { answer })
    }

    async fn record_exchange(&self, key: &ConversationKey, query: &str, answer: &str) {
        // The assistant turn is only recorded after the user turn it answers.
        if let Err(e) = self.history.append_history(key, Role::User, query).await {
            tracing::warn!(conversation = %key, error = %e, "Failed to record user turn");
            return;
        }
        if let Err(e) = self.history.append_history(key, Role::Assistant, answer).await {
            tracing::warn!(conversation = %key, error = %e, "Failed to record assistant turn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &str, chat: &str, query: &str) -> QueryRequest {
        QueryRequest {
            user_id: user.to_string(),
            chat_id: chat.to_string(),
            query: query.to_string(),
            selected_doc_title: None,
        }
    }

    #[test]
    fn test_blank_fields_rejected() {
        assert!(request("u", "c", "q").validate().is_ok());
        assert!(matches!(
            request(" ", "c", "q").validate(),
            Err(QueryError::InvalidRequest(_))
        ));
        assert!(request("u", "", "q").validate().is_err());
        assert!(request("u", "c", "\n").validate().is_err());
    }

    #[test]
    fn test_blank_doc_title_is_ignored() {
        let mut req = request("u", "c", "q");
        req.selected_doc_title = Some("   ".to_string());
        assert_eq!(req.doc_title(), None);
        req.selected_doc_title = Some(" Manual ".to_string());
        assert_eq!(req.doc_title(), Some("Manual"));
    }

    #[test]
    fn test_request_without_title_deserializes() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"user_id":"u","chat_id":"c","query":"q"}"#).unwrap();
        assert!(req.selected_doc_title.is_none());
    }
}
