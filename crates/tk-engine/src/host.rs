//! Host collaborator contracts
//!
//! The browser exposes each of these as an extension API. They are all
//! fallible: any call may be refused (quota, invalid pattern, closed tab) and
//! callers log and carry on rather than crash.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tk_core::types::{Rule, RuleId};

use crate::prayer::{CalculationMethod, Location};

/// Tab (session) identifier.
pub type TabId = i32;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Failure reported by a host API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct HostError {
    pub operation: &'static str,
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Persistent key-value store. Survives restarts, last write wins per key.
pub trait KeyValueStore {
    /// Values for the requested keys; absent keys are omitted.
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, HostError>;
    fn set(&mut self, items: Map<String, Value>) -> Result<(), HostError>;
    fn remove(&mut self, keys: &[&str]) -> Result<(), HostError>;
}

// =============================================================================
// Rule table
// =============================================================================

/// One atomic rule-table update. Removals apply before additions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_rule_ids: Vec<RuleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_rules: Vec<Rule>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.remove_rule_ids.is_empty() && self.add_rules.is_empty()
    }
}

/// The host's dynamic rule table. Rules persist until removed.
pub trait RuleTable {
    fn get_rules(&self) -> Result<Vec<Rule>, HostError>;
    fn update_rules(&mut self, update: RuleUpdate) -> Result<(), HostError>;
}

// =============================================================================
// Alarms
// =============================================================================

/// When an alarm fires. Serializes to the host's alarm-info object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlarmSpec {
    /// Once, at a wall-clock time
    At { when: Timestamp },
    /// Repeatedly, first after one period
    Every {
        #[serde(rename = "periodInMinutes")]
        period_minutes: f64,
    },
}

/// Wall-clock alarms that survive process suspension. May fire late, never
/// early. Creating an alarm with an existing name replaces it.
pub trait AlarmHost {
    fn create(&mut self, name: &str, spec: AlarmSpec) -> Result<(), HostError>;
    fn clear(&mut self, name: &str) -> Result<(), HostError>;
    /// Names of the registered alarms.
    fn names(&self) -> Result<Vec<String>, HostError>;
}

// =============================================================================
// Tabs, notifications
// =============================================================================

/// Open views (tabs).
pub trait TabHost {
    /// Reload every tab whose URL matches one of the match patterns.
    /// Returns how many reloads were issued.
    fn reload_matching(&mut self, patterns: &[String]) -> Result<usize, HostError>;
    fn close(&mut self, tab: TabId) -> Result<(), HostError>;
}

/// User-visible notifications.
pub trait Notifier {
    fn notify(&mut self, id: &str, title: &str, message: &str) -> Result<(), HostError>;
}

// =============================================================================
// Prayer times
// =============================================================================

/// Upstream daily prayer-time computation (formula or remote API).
pub trait PrayerTimeSource {
    /// `{prayer name -> "HH:MM"}` in the user's local time for `date`.
    fn compute_daily_times(
        &self,
        location: &Location,
        method: CalculationMethod,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, String>, HostError>;
}

// =============================================================================
// Clock
// =============================================================================

/// Wall clock in the user's local offset.
pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_ms(&self) -> Timestamp {
        self.now().timestamp_millis()
    }
}

/// The machine's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}
