//! Rule-based detectors and the pipeline that runs them.

pub mod bot;
pub mod engine;
pub mod flag;
pub mod geo;
pub mod volume;

pub use flag::Flag;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::aggregator::EntityKeyKind;
use crate::config::Config;
use crate::events::{Column, EventTable};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector {category} disabled: missing columns {missing:?}")]
    MissingColumns {
        category: Category,
        missing: Vec<Column>,
    },

    #[error("detector task failed: {0}")]
    TaskFailed(String),
}

/// What a flag claims about an entity. Rule detectors and scorers each
/// report under their own category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Brute Force")]
    BruteForce,
    #[serde(rename = "VPN/Geo Switch")]
    VpnGeoSwitch,
    #[serde(rename = "Bot-like")]
    BotLike,
    #[serde(rename = "DDoS")]
    Ddos,
    #[serde(rename = "Behavioral Outlier")]
    BehavioralOutlier,
    #[serde(rename = "Volume Spike")]
    VolumeSpike,
    #[serde(rename = "Burst Attempts")]
    BurstAttempts,
    #[serde(rename = "Classifier")]
    Classifier,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::BruteForce => "Brute Force",
            Category::VpnGeoSwitch => "VPN/Geo Switch",
            Category::BotLike => "Bot-like",
            Category::Ddos => "DDoS",
            Category::BehavioralOutlier => "Behavioral Outlier",
            Category::VolumeSpike => "Volume Spike",
            Category::BurstAttempts => "Burst Attempts",
            Category::Classifier => "Classifier",
        }
    }
}

impl Category {
    /// What a flag's `entity_key` names: a user for geo switches, the
    /// client entity (IP, or the date for volume spikes) otherwise.
    pub fn key_kind(&self) -> EntityKeyKind {
        match self {
            Category::VpnGeoSwitch => EntityKeyKind::User,
            _ => EntityKeyKind::Entity,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Columns a detector needs: every column in `all`, and at least one
/// column of `any` when `any` is non-empty.
#[derive(Debug, Clone, Default)]
pub struct Requirement {
    pub all: Vec<Column>,
    pub any: Vec<Column>,
}

impl Requirement {
    pub fn all(columns: &[Column]) -> Self {
        Self {
            all: columns.to_vec(),
            any: Vec::new(),
        }
    }

    pub fn or_any(mut self, columns: &[Column]) -> Self {
        self.any = columns.to_vec();
        self
    }

    /// Columns that keep the requirement from being met. Empty when satisfied.
    pub fn missing(&self, table: &EventTable) -> Vec<Column> {
        let mut missing: Vec<Column> = self.all.iter().copied().filter(|c| !table.has(*c)).collect();
        if !self.any.is_empty() && !self.any.iter().any(|c| table.has(*c)) {
            missing.extend(self.any.iter().copied());
        }
        missing
    }
}

/// A rule detector. Implementations are pure functions of the event table
/// and their thresholds; they never share mutable state.
pub trait Detector: Send + Sync {
    fn category(&self) -> Category;

    fn requirement(&self) -> Requirement;

    /// Flag entities. Only called once [`Detector::requirement`] is met.
    fn detect(&self, table: &EventTable) -> Vec<Flag>;

    /// Check the requirement against `table`.
    fn check(&self, table: &EventTable) -> Result<(), DetectError> {
        let missing = self.requirement().missing(table);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DetectError::MissingColumns {
                category: self.category(),
                missing,
            })
        }
    }
}

/// The default rule bank built from `config`.
pub fn rule_bank(config: &Config) -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(volume::BruteForceDetector::new(&config.brute_force)),
        Arc::new(geo::GeoSwitchDetector::new(&config.geo)),
        Arc::new(bot::BotDetector::new(&config.bot)),
        Arc::new(volume::DdosDetector::new(&config.ddos)),
    ]
}
