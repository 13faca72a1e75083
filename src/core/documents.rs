//! Similar-document retrieval
//!
//! Information Hiding:
//! - RAG service protocol hidden behind `DocumentClient::fetch_similar`
//! - Failures never propagate: they come back as `SimilarDocs::Unavailable`,
//!   which the prompt treats like "no documents" while logs and tests can
//!   still tell the difference

use crate::config::ServicesConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDoc {
    pub title: String,
    pub content: String,
    pub distance: f64,
}

/// Outcome of a retrieval call
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarDocs {
    Found(Vec<SimilarDoc>),
    /// The service answered and had nothing relevant
    Empty,
    /// The service could not be used; carries the reason
    Unavailable(String),
}

impl SimilarDocs {
    pub fn docs(&self) -> &[SimilarDoc] {
        match self {
            SimilarDocs::Found(docs) => docs,
            SimilarDocs::Empty | SimilarDocs::Unavailable(_) => &[],
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    title: &'a str,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Option<Vec<Value>>,
}

pub struct DocumentClient {
    client: Client,
    endpoint: String,
    max_docs: usize,
}

impl DocumentClient {
    pub fn new(services: &ServicesConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(services.request_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/search", services.rag_url.trim_end_matches('/')),
            max_docs: services.max_similar_docs,
        })
    }

    pub async fn fetch_similar(&self, selected_title: &str, query: &str) -> SimilarDocs {
        let request = SearchRequest {
            title: selected_title,
            query,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return self.unavailable(format!("request failed: {}", e)),
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return SimilarDocs::Empty;
        }
        if !status.is_success() {
            return self.unavailable(format!("status {}", status));
        }

        let body = match response.json::<SearchResponse>().await {
            Ok(body) => body,
            Err(e) => return self.unavailable(format!("invalid body: {}", e)),
        };

        let docs: Vec<SimilarDoc> = body
            .results
            .unwrap_or_default()
            .iter()
            .take(self.max_docs)
            .map(parse_doc)
            .collect();

        tracing::debug!(
            title = selected_title,
            found = docs.len(),
            "[DocumentClient] Retrieved similar documents"
        );

        if docs.is_empty() {
            SimilarDocs::Empty
        } else {
            SimilarDocs::Found(docs)
        }
    }

    fn unavailable(&self, reason: String) -> SimilarDocs {
        tracing::warn!(endpoint = %self.endpoint, %reason, "[DocumentClient] Retrieval unavailable");
        SimilarDocs::Unavailable(reason)
    }
}

/// Lenient field extraction: missing or mistyped fields fall back to defaults
fn parse_doc(raw: &Value) -> SimilarDoc {
    let text = |field: &str| {
        raw.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let distance = match raw.get("distance") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    SimilarDoc {
        title: text("title"),
        content: text("content"),
        distance,
    }
}
