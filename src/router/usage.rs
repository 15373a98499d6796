//! Usage Accounting
//!
//! Best-effort request/token counters per (key, model) pair for dashboards,
//! plus a rolling one-minute token window consulted by the soft admission
//! hint. Counters only ever grow; loss on crash is acceptable.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Counters for one (key, model) pair
#[derive(Debug, Clone)]
pub struct UsageCounter {
    pub request_count: u64,
    pub token_count: u64,

    /// Start of the current one-minute window
    pub window_start: DateTime<Utc>,

    /// Tokens recorded inside the current window
    pub window_tokens: u64,
}

pub struct UsageAccountant {
    counters: RwLock<HashMap<(String, String), UsageCounter>>,
    window: Duration,
}

impl Default for UsageAccountant {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl UsageAccountant {
    pub fn new(window: Duration) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            window,
        }
    }

    /// Record a completed request
    pub fn record(&self, key_id: &str, model_id: &str, tokens: u64) {
        self.record_at(Utc::now(), key_id, model_id, tokens);
    }

    pub fn record_at(&self, now: DateTime<Utc>, key_id: &str, model_id: &str, tokens: u64) {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::seconds(60));
        let mut counters = self.counters.write();
        let counter = counters
            .entry((key_id.to_string(), model_id.to_string()))
            .or_insert_with(|| UsageCounter {
                request_count: 0,
                token_count: 0,
                window_start: now,
                window_tokens: 0,
            });

        if now - counter.window_start >= window {
            counter.window_start = now;
            counter.window_tokens = 0;
        }

        counter.request_count += 1;
        counter.token_count += tokens;
        counter.window_tokens += tokens;
    }

    /// Tokens recorded in the current one-minute window, zero once the
    /// window has rolled over
    pub fn window_tokens(&self, key_id: &str, model_id: &str) -> u64 {
        self.window_tokens_at(Utc::now(), key_id, model_id)
    }

    pub fn window_tokens_at(&self, now: DateTime<Utc>, key_id: &str, model_id: &str) -> u64 {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::seconds(60));
        match self
            .counters
            .read()
            .get(&(key_id.to_string(), model_id.to_string()))
        {
            Some(c) if now - c.window_start < window => c.window_tokens,
            _ => 0,
        }
    }

    /// Counters matching the optional key/model filters
    pub fn snapshot(
        &self,
        key_id: Option<&str>,
        model_id: Option<&str>,
    ) -> Vec<((String, String), UsageCounter)> {
        self.counters
            .read()
            .iter()
            .filter(|((k, m), _)| {
                key_id.map_or(true, |id| id == k) && model_id.map_or(true, |id| id == m)
            })
            .map(|(pair, counter)| (pair.clone(), counter.clone()))
            .collect()
    }
}

impl std::fmt::Debug for UsageAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageAccountant")
            .field("pairs", &self.counters.read().len())
            .finish()
    }
}
