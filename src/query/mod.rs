//! Free-form questions about a detection run, answered by a language model
//! that sees the run's summary.

pub mod ollama;

pub use ollama::OllamaBackend;

use async_trait::async_trait;
use thiserror::Error;

use crate::report::format::dataset_summary;
use crate::report::DetectionReport;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("empty question")]
    EmptyQuestion,
}

/// Something that can answer a question given a dataset summary.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn ask(&self, question: &str, summary: &str) -> Result<String, QueryError>;
}

/// Ask `question` about `report`, passing its summary as context.
pub async fn ask_report(
    backend: &dyn QueryBackend,
    report: &DetectionReport,
    question: &str,
) -> Result<String, QueryError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(QueryError::EmptyQuestion);
    }
    let summary = dataset_summary(report);
    tracing::info!(backend = backend.name(), summary_bytes = summary.len(), "asking backend");
    backend.ask(question, &summary).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMap, ReportConfig};
    use crate::events::normalize;
    use std::sync::Mutex;

    /// Echoes back what it was given.
    struct Echo {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl QueryBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn ask(&self, question: &str, summary: &str) -> Result<String, QueryError> {
            self.seen
                .lock()
                .unwrap()
                .push((question.to_string(), summary.to_string()));
            Ok(format!("answer to {}", question))
        }
    }

    fn empty_report() -> DetectionReport {
        let table = normalize(&[], &ColumnMap::default(), 60);
        DetectionReport::build(&table, Vec::new(), Vec::new(), Vec::new(), &ReportConfig::default())
    }

    #[tokio::test]
    async fn test_ask_passes_summary() {
        let backend = Echo { seen: Mutex::new(Vec::new()) };
        let answer = ask_report(&backend, &empty_report(), "  which ip is worst? ")
            .await
            .unwrap();
        assert_eq!(answer, "answer to which ip is worst?");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.starts_with("attack_type,platform,entities,suspicious_requests"));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let backend = Echo { seen: Mutex::new(Vec::new()) };
        let err = ask_report(&backend, &empty_report(), "   ").await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyQuestion));
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}
