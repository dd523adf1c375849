//! Ollama chat backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{QueryBackend, QueryError};
use crate::config::QueryConfig;

#[derive(Debug)]
pub struct OllamaBackend {
    config: QueryConfig,
    client: Client,
}

impl OllamaBackend {
    pub fn new(config: QueryConfig) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QueryError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.url.trim_end_matches('/'))
    }

    fn system_prompt(summary: &str) -> String {
        format!("You are a data analyst. Here is the dataset:\n{}", summary)
    }

    fn map_error(&self, e: reqwest::Error) -> QueryError {
        if e.is_timeout() {
            QueryError::Timeout(self.config.timeout_secs)
        } else {
            QueryError::Connection(e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl QueryBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn ask(&self, question: &str, summary: &str) -> Result<String, QueryError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt(summary),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: question.to_string(),
                },
            ],
            stream: false,
        };

        debug!(model = %self.config.model, url = %self.chat_url(), "sending chat request");

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "ollama returned an error");
            if status.as_u16() == 404 {
                return Err(QueryError::ModelNotFound(self.config.model.clone()));
            }
            return Err(QueryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| QueryError::InvalidResponse(e.to_string()))?;
        Ok(reply.message.content)
    }
}
