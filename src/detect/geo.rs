use std::collections::{BTreeMap, BTreeSet};

use crate::config::GeoConfig;
use crate::detect::{Category, Detector, Flag, Requirement};
use crate::events::{Column, EventTable};

/// Flags accounts seen from too many countries within the input window,
/// the footprint of VPN hopping or shared credentials.
pub struct GeoSwitchDetector {
    max_countries: usize,
}

impl GeoSwitchDetector {
    pub fn new(config: &GeoConfig) -> Self {
        Self {
            max_countries: config.max_countries,
        }
    }
}

impl Detector for GeoSwitchDetector {
    fn category(&self) -> Category {
        Category::VpnGeoSwitch
    }

    fn requirement(&self) -> Requirement {
        Requirement::all(&[Column::UserKey, Column::CountryCode])
    }

    fn detect(&self, table: &EventTable) -> Vec<Flag> {
        let mut users: BTreeMap<&str, (BTreeSet<&str>, Vec<usize>)> = BTreeMap::new();
        for event in table.events() {
            let (Some(user), Some(country)) = (event.user_key.as_deref(), event.country_code.as_deref())
            else {
                continue;
            };
            let entry = users.entry(user).or_default();
            entry.0.insert(country);
            entry.1.push(event.row);
        }

        users
            .into_iter()
            .filter(|(_, (countries, _))| countries.len() > self.max_countries)
            .map(|(user, (countries, rows))| {
                let list: Vec<&str> = countries.iter().copied().collect();
                let reason = format!("seen from {} countries ({})", list.len(), list.join(", "));
                Flag::new(table, user, Category::VpnGeoSwitch, rows, list.len() as f64, reason)
            })
            .collect()
    }
}
