use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::aggregator::EntityKeyKind;
use crate::detect::{Category, Flag};

/// One row of the "top suspicious" list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    pub rank: usize,
    pub entity_key: String,
    /// Whether `entity_key` is a client entity or a user.
    pub key_kind: EntityKeyKind,
    /// Category of the winning flag.
    pub category: Category,
    pub score: f64,
    pub emitted_at: Option<DateTime<Utc>>,
    pub justification: String,
    /// Every category that flagged the entity.
    pub categories: Vec<Category>,
}

/// Highest score first, then most recent, then entity key ascending.
/// Category breaks what is left so the order never depends on input order.
fn precedence(a: &Flag, b: &Flag) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.emitted_at.cmp(&a.emitted_at))
        .then_with(|| a.entity_key.cmp(&b.entity_key))
        .then_with(|| a.category.cmp(&b.category))
}

/// Deduplicate flags by entity, keep each entity's strongest flag, and
/// return the first `n` in precedence order. Users and client entities are
/// kept apart even when their keys are equal. Volume spikes describe days,
/// not entities, and are left out.
pub fn rank(flags: &[Flag], n: usize) -> Vec<RankedEntity> {
    let mut best: BTreeMap<(EntityKeyKind, &str), (&Flag, Vec<Category>)> = BTreeMap::new();
    for flag in flags.iter().filter(|f| f.category != Category::VolumeSpike) {
        let key = (flag.category.key_kind(), flag.entity_key.as_str());
        match best.get_mut(&key) {
            Some((current, categories)) => {
                if !categories.contains(&flag.category) {
                    categories.push(flag.category);
                }
                if precedence(flag, *current) == Ordering::Less {
                    *current = flag;
                }
            }
            None => {
                best.insert(key, (flag, vec![flag.category]));
            }
        }
    }

    let mut ranked: Vec<(&Flag, Vec<Category>)> = best.into_values().collect();
    ranked.sort_by(|a, b| precedence(a.0, b.0));

    ranked
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (flag, mut categories))| {
            categories.sort();
            RankedEntity {
                rank: i + 1,
                entity_key: flag.entity_key.clone(),
                key_kind: flag.category.key_kind(),
                category: flag.category,
                score: flag.score,
                emitted_at: flag.emitted_at,
                justification: flag.reason.clone(),
                categories,
            }
        })
        .collect()
}
