//! Tracking-code extraction from notification bodies.
//!
//! Each carrier has a list of regexes. Every pattern is run over the body;
//! if a pattern has a capture group, group 1 is the code, otherwise the whole
//! match is. Carriers are visited in lexicographic order, so when two carriers
//! match the same code the later one wins. Collisions are logged.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::warn;

use crate::error::ConfigError;

/// Compiled carrier → pattern table.
#[derive(Debug, Clone)]
pub struct TrackingExtractor {
    patterns: BTreeMap<String, Vec<Regex>>,
}

impl TrackingExtractor {
    /// Compile a carrier → pattern table. An invalid regex is a config error.
    pub fn new(table: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut patterns = BTreeMap::new();
        for (carrier, sources) in table {
            let compiled = sources
                .iter()
                .map(|src| {
                    Regex::new(src).map_err(|e| ConfigError::InvalidValue {
                        key: format!("tracking_patterns.{carrier}"),
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            patterns.insert(carrier.clone(), compiled);
        }
        Ok(Self { patterns })
    }

    pub fn carriers(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    /// Extract code → carrier from `body`. Codes come back sorted.
    pub fn extract(&self, body: &str) -> BTreeMap<String, String> {
        let mut found: BTreeMap<String, String> = BTreeMap::new();

        for (carrier, regexes) in &self.patterns {
            for re in regexes {
                for caps in re.captures_iter(body) {
                    let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                        continue;
                    };
                    let code = m.as_str().to_string();
                    if code.is_empty() {
                        continue;
                    }
                    if let Some(previous) = found.insert(code.clone(), carrier.clone())
                        && previous != *carrier
                    {
                        warn!(
                            code = %code,
                            previous = %previous,
                            carrier = %carrier,
                            "Tracking code matched by multiple carriers; keeping the later one"
                        );
                    }
                }
            }
        }

        found
    }
}

/// One-shot extraction without keeping the compiled table.
pub fn extract(
    body: &str,
    patterns: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    Ok(TrackingExtractor::new(patterns)?.extract(body))
}
