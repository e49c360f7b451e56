//! Short-lived decision cache keyed by position and cycle

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::OrchestratorDecision;
use crate::types::Side;

pub struct DecisionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, OrchestratorDecision)>>,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(symbol: &str, side: Side, cycle: usize) -> String {
        format!("{}-{}-{}", symbol, side, cycle)
    }

    /// Fresh entry for `key`, if any
    pub fn get(&self, key: &str) -> Option<OrchestratorDecision> {
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, decision)| decision.clone())
    }

    pub fn insert(&self, key: String, decision: OrchestratorDecision) {
        if let Ok(mut entries) = self.entries.write() {
            let ttl = self.ttl;
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
            entries.insert(key, (Instant::now(), decision));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::DecisionAction;

    #[test]
    fn test_key_format() {
        assert_eq!(DecisionCache::key("BTCUSDT", Side::Long, 2), "BTCUSDT-LONG-2");
    }

    #[test]
    fn test_expired_entries_are_not_returned() {
        let cache = DecisionCache::new(Duration::from_millis(0));
        cache.insert("k".to_string(), OrchestratorDecision::hold("test"));
        assert!(cache.get("k").is_none());

        let cache = DecisionCache::new(Duration::from_secs(30));
        cache.insert("k".to_string(), OrchestratorDecision::hold("test"));
        assert_eq!(cache.get("k").map(|d| d.action), Some(DecisionAction::Hold));
    }
}
