//! attackscope -- batch abuse and anomaly detection for API access logs.
//!
//! Raw log records are normalized into an [`events::EventTable`], scanned by
//! a bank of rule detectors and a statistical scorer, and merged into a
//! [`report::DetectionReport`].

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod events;
pub mod query;
pub mod report;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};
use crate::detect::engine::Pipeline;
use crate::events::RawRecord;

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the HTTP API.
pub async fn serve(bind: &str, config: Config) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let app = api::router(api::state::AppState {
        pipeline: Arc::new(pipeline),
    });

    let addr: std::net::SocketAddr = bind.parse().with_context(|| format!("invalid bind address: {}", bind))?;
    tracing::info!(%addr, "attackscope listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Read log records from `path`: a JSON array of objects, or one object per
/// line (JSON Lines). Blank lines are skipped; a line that is not an object
/// is skipped with a warning.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    parse_records(&content).with_context(|| format!("failed to parse input file: {}", path.display()))
}

pub fn parse_records(content: &str) -> Result<Vec<RawRecord>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
        let total = values.len();
        let records: Vec<RawRecord> = values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        if records.len() < total {
            tracing::warn!(skipped = total - records.len(), "skipped non-object array entries");
        }
        return Ok(records);
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) => records.push(map),
            Ok(_) => skipped += 1,
            Err(e) => {
                if records.is_empty() && skipped == 0 && lineno == 0 && !line.starts_with('{') {
                    bail!("input is neither a JSON array nor JSON Lines: {}", e);
                }
                tracing::warn!(line = lineno + 1, error = %e, "skipping malformed line");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, "skipped unreadable input lines");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_array() {
        let records = parse_records(r#"[{"a": 1}, 2, {"b": "x"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["b"], "x");
    }

    #[test]
    fn test_parse_json_lines() {
        let records = parse_records("{\"a\": 1}\n\n{broken\n{\"a\": 2}\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_records("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_records("start_time,x_real_ip\n").is_err());
    }

    #[test]
    fn test_read_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"x_real_ip\": \"1.1.1.1\"}}").unwrap();
        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(read_records(Path::new("/nonexistent/attackscope.json")).is_err());
    }
}
