//! Expiry Scheduler
//!
//! Thin layer over the host's alarms. Alarms are keyed by name; handlers are
//! registered per name, or per kind for parameterized names of the form
//! `<kind>|<payload>` (e.g. `grant|youtube.com`).

use std::collections::HashMap;

use log::debug;

use crate::error::EngineError;
use crate::host::{AlarmHost, AlarmSpec, Timestamp};

/// What a fired alarm means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmRoute {
    FocusEnd,
    PrayerTick,
    PrayerRefresh,
    GrantExpiry,
}

/// A resolved alarm: its route and, for parameterized names, the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub route: AlarmRoute,
    pub payload: Option<String>,
}

/// Handle returned by [`ExpiryScheduler::on_fire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    key: String,
}

/// `<kind>|<payload>`
pub fn alarm_name(kind: &str, payload: &str) -> String {
    format!("{kind}|{payload}")
}

pub struct ExpiryScheduler {
    host: Box<dyn AlarmHost>,
    routes: HashMap<String, AlarmRoute>,
}

impl ExpiryScheduler {
    pub fn new(host: Box<dyn AlarmHost>) -> Self {
        Self {
            host,
            routes: HashMap::new(),
        }
    }

    /// Fire `name` once at `when`, replacing any alarm with that name.
    pub fn schedule_at(&mut self, name: &str, when: Timestamp) -> Result<(), EngineError> {
        debug!("Scheduling '{}' at {}", name, when);
        self.host
            .create(name, AlarmSpec::At { when })
            .map_err(EngineError::Scheduler)
    }

    /// Fire `name` every `period_minutes`, replacing any alarm with that name.
    pub fn schedule_every(&mut self, name: &str, period_minutes: u32) -> Result<(), EngineError> {
        debug!("Scheduling '{}' every {} minutes", name, period_minutes);
        self.host
            .create(
                name,
                AlarmSpec::Every {
                    period_minutes: period_minutes as f64,
                },
            )
            .map_err(EngineError::Scheduler)
    }

    /// Like [`schedule_every`](Self::schedule_every) but leaves an existing
    /// alarm and its phase untouched. Returns whether one was created.
    pub fn ensure_every(&mut self, name: &str, period_minutes: u32) -> Result<bool, EngineError> {
        match self.host.names() {
            Ok(names) if names.iter().any(|n| n == name) => Ok(false),
            _ => self.schedule_every(name, period_minutes).map(|()| true),
        }
    }

    pub fn cancel(&mut self, name: &str) -> Result<(), EngineError> {
        debug!("Cancelling '{}'", name);
        self.host.clear(name).map_err(EngineError::Scheduler)
    }

    /// Route alarms named `key`, or named `key|<payload>`, to `route`.
    pub fn on_fire(&mut self, key: &str, route: AlarmRoute) -> Subscription {
        self.routes.insert(key.to_string(), route);
        Subscription {
            key: key.to_string(),
        }
    }

    pub fn off(&mut self, subscription: Subscription) -> Option<AlarmRoute> {
        self.routes.remove(&subscription.key)
    }

    /// Resolve a fired alarm. Exact names win over kind prefixes.
    pub fn dispatch(&self, name: &str) -> Option<Fired> {
        if let Some(&route) = self.routes.get(name) {
            return Some(Fired {
                route,
                payload: None,
            });
        }

        let (kind, payload) = name.split_once('|')?;
        self.routes.get(kind).map(|&route| Fired {
            route,
            payload: Some(payload.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;
    use crate::memory::{ManualClock, MemoryAlarms};

    fn scheduler() -> (ExpiryScheduler, MemoryAlarms) {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
            .unwrap();
        let alarms = MemoryAlarms::new(ManualClock::new(start));
        (ExpiryScheduler::new(Box::new(alarms.clone())), alarms)
    }

    #[test]
    fn dispatches_exact_and_parameterized_names() {
        let (mut scheduler, _) = scheduler();
        scheduler.on_fire("focusEnd", AlarmRoute::FocusEnd);
        scheduler.on_fire("grant", AlarmRoute::GrantExpiry);

        assert_eq!(
            scheduler.dispatch("focusEnd"),
            Some(Fired {
                route: AlarmRoute::FocusEnd,
                payload: None
            })
        );
        assert_eq!(
            scheduler.dispatch("grant|youtube.com"),
            Some(Fired {
                route: AlarmRoute::GrantExpiry,
                payload: Some("youtube.com".to_string())
            })
        );
        assert_eq!(scheduler.dispatch("block|youtube.com"), None);
        assert_eq!(scheduler.dispatch("unknown"), None);
    }

    #[test]
    fn unsubscribed_routes_stop_dispatching() {
        let (mut scheduler, _) = scheduler();
        let sub = scheduler.on_fire("prayerTick", AlarmRoute::PrayerTick);
        assert_eq!(scheduler.off(sub), Some(AlarmRoute::PrayerTick));
        assert_eq!(scheduler.dispatch("prayerTick"), None);
    }

    #[test]
    fn rescheduling_replaces_alarm() {
        let (mut scheduler, alarms) = scheduler();
        let name = alarm_name("grant", "youtube.com");
        scheduler.schedule_at(&name, 1_000).unwrap();
        scheduler.schedule_at(&name, 2_000).unwrap();

        assert_eq!(alarms.scheduled(), vec![name.clone()]);
        assert_eq!(alarms.next_fire(&name), Some(2_000));

        scheduler.cancel(&name).unwrap();
        assert!(alarms.scheduled().is_empty());
    }

    #[test]
    fn ensure_every_keeps_existing_phase() {
        let (mut scheduler, alarms) = scheduler();
        assert!(scheduler.ensure_every("prayerTick", 1).unwrap());
        let first = alarms.next_fire("prayerTick");
        alarms.clock().advance(chrono::Duration::seconds(30));

        assert!(!scheduler.ensure_every("prayerTick", 1).unwrap());
        assert_eq!(alarms.next_fire("prayerTick"), first);
    }

    #[test]
    fn host_refusal_is_a_scheduler_error() {
        let (mut scheduler, alarms) = scheduler();
        alarms.set_failing(true);
        assert!(matches!(
            scheduler.schedule_at("focusEnd", 1),
            Err(EngineError::Scheduler(_))
        ));
    }
}
