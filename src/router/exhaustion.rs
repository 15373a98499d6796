//! Exhaustion Tracking
//!
//! Records temporary, time-bounded unavailability per (key, model) pair.
//! Records expire lazily at read time; nothing sweeps them. State is
//! process-local and lost on restart, which is fine for an availability hint.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Rate-limit window class inferred from a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    PerMinute,
    PerDay,
    PerMonth,
    Unknown,
}

impl std::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaType::PerMinute => "per-minute",
            QuotaType::PerDay => "per-day",
            QuotaType::PerMonth => "per-month",
            QuotaType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Default backoff durations for quota types without a calendar boundary
#[derive(Debug, Clone)]
pub struct BackoffDefaults {
    pub per_minute: Duration,
    pub unknown: Duration,
}

impl Default for BackoffDefaults {
    fn default() -> Self {
        Self {
            per_minute: Duration::from_secs(60),
            unknown: Duration::from_secs(300),
        }
    }
}

/// One exhaustion entry for a (key, model) pair
#[derive(Debug, Clone)]
pub struct ExhaustionRecord {
    pub exhausted_at: DateTime<Utc>,
    pub recover_at: DateTime<Utc>,
    pub quota_type: QuotaType,
}

/// When a pair becomes usable again, given the error's quota class and an
/// optional provider wait hint
pub fn compute_recover_at(
    now: DateTime<Utc>,
    quota_type: QuotaType,
    retry_after: Option<Duration>,
    defaults: &BackoffDefaults,
) -> DateTime<Utc> {
    if let Some(wait) = retry_after {
        return now + chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::seconds(60));
    }

    match quota_type {
        QuotaType::PerMinute => {
            now + chrono::Duration::from_std(defaults.per_minute)
                .unwrap_or(chrono::Duration::seconds(60))
        }
        QuotaType::PerDay => next_utc_midnight(now),
        QuotaType::PerMonth => first_of_next_month(now),
        QuotaType::Unknown => {
            now + chrono::Duration::from_std(defaults.unknown)
                .unwrap_or(chrono::Duration::seconds(300))
        }
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Days::new(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

fn first_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // Day 1 of any month is always a valid date.
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of month")
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Tracks which (key, model) pairs are temporarily unusable
pub struct ExhaustionTracker {
    records: RwLock<HashMap<(String, String), ExhaustionRecord>>,

    /// Keys rejected for bad credentials; unusable for the process lifetime
    /// unless reset
    dead_keys: RwLock<HashSet<String>>,

    defaults: BackoffDefaults,
}

impl ExhaustionTracker {
    pub fn new(defaults: BackoffDefaults) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dead_keys: RwLock::new(HashSet::new()),
            defaults,
        }
    }

    /// Whether the pair may be handed out right now
    pub fn is_selectable(&self, key_id: &str, model_id: &str) -> bool {
        self.is_selectable_at(Utc::now(), key_id, model_id)
    }

    pub fn is_selectable_at(&self, now: DateTime<Utc>, key_id: &str, model_id: &str) -> bool {
        if self.dead_keys.read().contains(key_id) {
            return false;
        }
        match self
            .records
            .read()
            .get(&(key_id.to_string(), model_id.to_string()))
        {
            Some(record) => now >= record.recover_at,
            None => true,
        }
    }

    /// Record a quota rejection. Concurrent reports merge to the later
    /// recovery time, so a duplicate report can never shorten a backoff.
    /// Returns the effective recovery time.
    pub fn mark_exhausted(
        &self,
        key_id: &str,
        model_id: &str,
        quota_type: QuotaType,
        retry_after: Option<Duration>,
    ) -> DateTime<Utc> {
        self.mark_exhausted_at(Utc::now(), key_id, model_id, quota_type, retry_after)
    }

    pub fn mark_exhausted_at(
        &self,
        now: DateTime<Utc>,
        key_id: &str,
        model_id: &str,
        quota_type: QuotaType,
        retry_after: Option<Duration>,
    ) -> DateTime<Utc> {
        let computed = compute_recover_at(now, quota_type, retry_after, &self.defaults);

        let mut records = self.records.write();
        let record = records
            .entry((key_id.to_string(), model_id.to_string()))
            .and_modify(|existing| {
                existing.recover_at = existing.recover_at.max(computed);
                existing.exhausted_at = now;
                existing.quota_type = quota_type;
            })
            .or_insert_with(|| ExhaustionRecord {
                exhausted_at: now,
                recover_at: computed,
                quota_type,
            });

        tracing::debug!(
            key_id,
            model_id,
            %quota_type,
            recover_at = %record.recover_at,
            "candidate marked exhausted"
        );
        record.recover_at
    }

    /// Flag a whole key as unusable (authentication failure)
    pub fn mark_key_unusable(&self, key_id: &str) {
        tracing::warn!(key_id, "key flagged unusable for process lifetime");
        self.dead_keys.write().insert(key_id.to_string());
    }

    /// Current recovery deadline for a pair, if one is pending
    pub fn recover_at(&self, key_id: &str, model_id: &str) -> Option<DateTime<Utc>> {
        self.records
            .read()
            .get(&(key_id.to_string(), model_id.to_string()))
            .map(|r| r.recover_at)
    }

    /// Clear matching exhaustion records and dead-key flags immediately.
    /// `None` filters match everything; clearing nothing is a no-op, not an
    /// error.
    pub fn reset(&self, key_id: Option<&str>, model_id: Option<&str>) {
        self.records.write().retain(|(k, m), _| {
            let key_match = key_id.map_or(true, |id| id == k);
            let model_match = model_id.map_or(true, |id| id == m);
            !(key_match && model_match)
        });

        if model_id.is_none() {
            match key_id {
                Some(id) => {
                    self.dead_keys.write().remove(id);
                }
                None => self.dead_keys.write().clear(),
            }
        }
    }

    /// Reset every record belonging to any of the given keys (tenant-scoped
    /// admin reset)
    pub fn reset_keys(&self, key_ids: &[String]) {
        for id in key_ids {
            self.reset(Some(id), None);
        }
    }
}

impl std::fmt::Debug for ExhaustionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExhaustionTracker")
            .field("records", &self.records.read().len())
            .field("dead_keys", &self.dead_keys.read().len())
            .finish()
    }
}
