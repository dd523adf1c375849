//! TOML configuration for attackscope.
//!
//! Every threshold the detectors and scorers use lives here. Each section
//! falls back to its defaults when absent, so a config file only needs to
//! name the values it changes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "ATTACKSCOPE_CONFIG";

/// Config file looked up in the working directory when nothing else is given.
pub const LOCAL_CONFIG: &str = "attackscope.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a detection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub columns: ColumnMap,
    #[serde(default)]
    pub brute_force: BruteForceConfig,
    #[serde(default)]
    pub ddos: DdosConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. An explicit path (`--config`), which must load.
    /// 2. The path in the `ATTACKSCOPE_CONFIG` environment variable.
    /// 3. `./attackscope.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ATTACKSCOPE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject values no detector can work with.
    pub fn validate(&self) -> Result<()> {
        if self.window.bucket_secs == 0 {
            anyhow::bail!("window.bucket_secs must be greater than zero");
        }
        for (name, value) in [
            ("scorer.contamination", self.scorer.contamination),
            ("scorer.burst_contamination", self.scorer.burst_contamination),
        ] {
            if !(value > 0.0 && value <= 0.5) {
                anyhow::bail!("{} must be in (0, 0.5], got {}", name, value);
            }
        }
        if self.scorer.trees == 0 || self.scorer.sample_size < 2 {
            anyhow::bail!("scorer.trees must be > 0 and scorer.sample_size >= 2");
        }
        if self.api.max_body_bytes == 0 {
            anyhow::bail!("api.max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Windowing
// ---------------------------------------------------------------------------

/// Time-bucket settings shared by the volumetric detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Width of a time bucket in seconds.
    pub bucket_secs: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { bucket_secs: 60 }
    }
}

// ---------------------------------------------------------------------------
// Source columns
// ---------------------------------------------------------------------------

/// Source column names for each logical event field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub timestamp: String,
    pub entity_key: String,
    pub user_key: String,
    pub path: String,
    pub user_agent: String,
    pub duration: String,
    pub platform: String,
    pub country_code: String,
    pub vpn_flags: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            timestamp: "start_time".to_string(),
            entity_key: "x_real_ip".to_string(),
            user_key: "dr_uid".to_string(),
            path: "request_path".to_string(),
            user_agent: "user_agent".to_string(),
            duration: "duration".to_string(),
            platform: "dr_platform".to_string(),
            country_code: "x_country_code".to_string(),
            vpn_flags: "vpn_flags".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule detectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BruteForceConfig {
    /// Flag an entity when its keyword hits in one bucket exceed this.
    pub threshold: u64,
    /// Case-insensitive substrings marking an authentication path.
    pub auth_keywords: Vec<String>,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            auth_keywords: vec!["login".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DdosConfig {
    /// Flag an entity when its requests in one bucket exceed this.
    pub threshold: u64,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self { threshold: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Case-insensitive user-agent substrings of automation tooling.
    pub user_agent_tokens: Vec<String>,
    /// Requests shorter than this many seconds look scripted.
    pub min_duration_secs: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_agent_tokens: ["bot", "curl", "python", "scrapy", "wget"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            min_duration_secs: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Flag a user seen from more distinct countries than this.
    pub max_countries: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self { max_countries: 2 }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Outlier model and classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Expected outlier fraction for entity and daily-volume scoring.
    pub contamination: f64,
    /// Expected outlier fraction for per-bucket attempt scoring.
    pub burst_contamination: f64,
    /// Number of isolation trees.
    pub trees: usize,
    /// Subsample size per tree.
    pub sample_size: usize,
    /// RNG seed, fixed so reruns agree.
    pub seed: u64,
    /// Pretrained classifier JSON. No supervised scoring when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_path: Option<PathBuf>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            burst_contamination: 0.05,
            trees: 100,
            sample_size: 256,
            seed: 42,
            classifier_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Length of the ranked suspicious-entity list.
    pub top_n: usize,
    /// Rows kept per evidence table.
    pub evidence_rows: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            evidence_rows: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Largest accepted request body. A day of logs runs to tens of MB.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 256 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Query backend
// ---------------------------------------------------------------------------

/// Ollama endpoint used by `ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.window.bucket_secs, 60);
        assert_eq!(cfg.columns.entity_key, "x_real_ip");
        assert_eq!(cfg.columns.timestamp, "start_time");
        assert_eq!(cfg.brute_force.threshold, 10);
        assert_eq!(cfg.brute_force.auth_keywords, vec!["login".to_string()]);
        assert_eq!(cfg.ddos.threshold, 100);
        assert_eq!(cfg.bot.user_agent_tokens.len(), 5);
        assert!((cfg.bot.min_duration_secs - 0.3).abs() < f64::EPSILON);
        assert_eq!(cfg.geo.max_countries, 2);
        assert!((cfg.scorer.contamination - 0.1).abs() < f64::EPSILON);
        assert_eq!(cfg.scorer.seed, 42);
        assert!(cfg.scorer.classifier_path.is_none());
        assert_eq!(cfg.report.top_n, 10);
        assert_eq!(cfg.query.model, "llama3");
        assert_eq!(cfg.api.max_body_bytes, 256 * 1024 * 1024);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[ddos]
threshold = 250

[bot]
user_agent_tokens = ["headless"]
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.ddos.threshold, 250);
        assert_eq!(cfg.bot.user_agent_tokens, vec!["headless".to_string()]);
        // Untouched fields keep defaults
        assert!((cfg.bot.min_duration_secs - 0.3).abs() < f64::EPSILON);
        assert_eq!(cfg.brute_force.threshold, 10);
        assert_eq!(cfg.columns.country_code, "x_country_code");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.window.bucket_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.scorer.contamination = 0.9;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.scorer.burst_contamination = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.api.max_body_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[window]\nbucket_secs = 300\n\n[columns]\nentity_key = \"client_ip\"\n"
        )
        .unwrap();

        let cfg = Config::resolve(Some(file.path())).unwrap();
        assert_eq!(cfg.window.bucket_secs, 300);
        assert_eq!(cfg.columns.entity_key, "client_ip");
        assert_eq!(cfg.columns.user_key, "dr_uid");
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nbucket_secs = 0\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_defaults_render_as_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(rendered.contains("[brute_force]"));
        assert!(!rendered.contains("classifier_path"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.geo.max_countries, 2);
    }
}
