use std::collections::BTreeMap;

use crate::config::BotConfig;
use crate::detect::{Category, Detector, Flag, Requirement};
use crate::events::{Column, Event, EventTable};

/// Flags requests from automation tooling: a known user-agent token, or a
/// request that finished faster than a human-driven client plausibly can.
pub struct BotDetector {
    tokens: Vec<String>,
    min_duration: f64,
}

impl BotDetector {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            tokens: config
                .user_agent_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            min_duration: config.min_duration_secs,
        }
    }

    pub fn agent_matches(&self, event: &Event) -> bool {
        event.user_agent.as_deref().is_some_and(|ua| {
            let ua = ua.to_lowercase();
            self.tokens.iter().any(|t| ua.contains(t.as_str()))
        })
    }

    pub fn too_fast(&self, event: &Event) -> bool {
        event.duration.is_some_and(|d| d < self.min_duration)
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.agent_matches(event) || self.too_fast(event)
    }
}

impl Detector for BotDetector {
    fn category(&self) -> Category {
        Category::BotLike
    }

    fn requirement(&self) -> Requirement {
        Requirement::all(&[Column::EntityKey]).or_any(&[Column::UserAgent, Column::Duration])
    }

    fn detect(&self, table: &EventTable) -> Vec<Flag> {
        // (rows, agent hits, fast hits)
        let mut hits: BTreeMap<&str, (Vec<usize>, usize, usize)> = BTreeMap::new();
        for event in table.events() {
            if event.entity_key.is_empty() {
                continue;
            }
            let agent = self.agent_matches(event);
            let fast = self.too_fast(event);
            if !(agent || fast) {
                continue;
            }
            let entry = hits.entry(event.entity_key.as_str()).or_default();
            entry.0.push(event.row);
            entry.1 += usize::from(agent);
            entry.2 += usize::from(fast);
        }

        hits.into_iter()
            .map(|(entity, (rows, agent, fast))| {
                let mut parts = Vec::new();
                if agent > 0 {
                    parts.push(format!("{} automation user-agent", agent));
                }
                if fast > 0 {
                    parts.push(format!("{} under {}s", fast, self.min_duration));
                }
                let reason = format!("{} bot-like requests ({})", rows.len(), parts.join(", "));
                let score = rows.len() as f64;
                Flag::new(table, entity, Category::BotLike, rows, score, reason)
            })
            .collect()
    }
}
