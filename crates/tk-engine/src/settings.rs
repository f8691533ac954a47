//! Typed view over the persisted key-value store.
//!
//! Reads never fail: an unreadable or mistyped value is logged and treated
//! as absent, so the caller falls back to the default. Writes report
//! [`EngineError::Storage`].

use chrono::NaiveDate;
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::host::{KeyValueStore, Timestamp};
use crate::prayer::{
    clamp_window, CalculationMethod, Location, PrayerTimeTable, DEFAULT_WINDOW_MINUTES,
};

/// Storage keys. Shared with the extension pages, which read them directly.
pub mod keys {
    pub const BLOCKED_SITES: &str = "blockedSites";
    pub const PRAYER_BLOCKING: &str = "prayerBlocking";
    pub const PRAYER_DURATION: &str = "prayerDuration";
    pub const FOCUS_MODE: &str = "focusMode";
    pub const FOCUS_END_TIME: &str = "focusEndTime";
    pub const CACHED_PRAYER_TIMES: &str = "cachedPrayerTimes";
    pub const LAST_FETCH: &str = "lastFetch";
    pub const CITY: &str = "city";
    pub const COUNTRY: &str = "country";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const USE_GPS: &str = "useGps";
    pub const CALCULATION_METHOD: &str = "calculationMethod";
    pub const LAST_PRAYER_NOTIFICATION: &str = "lastPrayerNotification";
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Persisted focus-session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusState {
    pub active: bool,
    pub end_time: Option<Timestamp>,
}

pub struct Settings {
    store: Box<dyn KeyValueStore>,
}

impl Settings {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn read_all(&self, wanted: &[&str]) -> Map<String, Value> {
        match self.store.get(wanted) {
            Ok(values) => values,
            Err(e) => {
                warn!("{}", EngineError::Storage(e));
                Map::new()
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read_all(&[key]).remove(key)?;
        decode(key, value)
    }

    fn write(&mut self, items: Vec<(&str, Value)>) -> Result<(), EngineError> {
        let items = items
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.store.set(items).map_err(EngineError::Storage)
    }

    // =========================================================================
    // Block list
    // =========================================================================

    /// The user's block list, or `None` before first install.
    pub fn blocked_sites(&self) -> Option<Vec<String>> {
        self.read(keys::BLOCKED_SITES)
    }

    pub fn set_blocked_sites(&mut self, sites: &[String]) -> Result<(), EngineError> {
        self.write(vec![(keys::BLOCKED_SITES, json!(sites))])
    }

    // =========================================================================
    // Prayer
    // =========================================================================

    pub fn prayer_blocking(&self) -> bool {
        self.read(keys::PRAYER_BLOCKING).unwrap_or(true)
    }

    pub fn set_prayer_blocking(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.write(vec![(keys::PRAYER_BLOCKING, json!(enabled))])
    }

    pub fn prayer_window_minutes(&self) -> u32 {
        self.read::<i64>(keys::PRAYER_DURATION)
            .map(clamp_window)
            .unwrap_or(DEFAULT_WINDOW_MINUTES)
    }

    /// Persist the window length, clamped. Returns the stored value.
    pub fn set_prayer_window_minutes(&mut self, minutes: i64) -> Result<u32, EngineError> {
        let minutes = clamp_window(minutes);
        self.write(vec![(keys::PRAYER_DURATION, json!(minutes))])?;
        Ok(minutes)
    }

    /// GPS coordinates when enabled and known, otherwise city and country.
    pub fn location(&self) -> Option<Location> {
        let mut values = self.read_all(&[
            keys::USE_GPS,
            keys::LATITUDE,
            keys::LONGITUDE,
            keys::CITY,
            keys::COUNTRY,
        ]);

        let use_gps = values
            .remove(keys::USE_GPS)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let coordinates = match (
            values.remove(keys::LATITUDE).and_then(number),
            values.remove(keys::LONGITUDE).and_then(number),
        ) {
            (Some(latitude), Some(longitude)) => Some(Location::Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };
        let city = match (
            values.remove(keys::CITY).and_then(text),
            values.remove(keys::COUNTRY).and_then(text),
        ) {
            (Some(city), Some(country)) => Some(Location::City { city, country }),
            _ => None,
        };

        if use_gps {
            coordinates.or(city)
        } else {
            city.or(coordinates)
        }
    }

    pub fn set_location(&mut self, location: &Location) -> Result<(), EngineError> {
        match location {
            Location::Coordinates {
                latitude,
                longitude,
            } => self.write(vec![
                (keys::LATITUDE, json!(latitude)),
                (keys::LONGITUDE, json!(longitude)),
                (keys::USE_GPS, json!(true)),
            ]),
            Location::City { city, country } => self.write(vec![
                (keys::CITY, json!(city)),
                (keys::COUNTRY, json!(country)),
                (keys::USE_GPS, json!(false)),
            ]),
        }
    }

    pub fn calculation_method(&self) -> CalculationMethod {
        self.read(keys::CALCULATION_METHOD).unwrap_or_default()
    }

    /// The cached table and the day it was computed for.
    pub fn cached_prayer_table(&self) -> Option<PrayerTimeTable> {
        let mut values = self.read_all(&[keys::CACHED_PRAYER_TIMES, keys::LAST_FETCH]);
        let date = values
            .remove(keys::LAST_FETCH)
            .and_then(text)
            .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok())?;
        let raw = decode(keys::CACHED_PRAYER_TIMES, values.remove(keys::CACHED_PRAYER_TIMES)?)?;
        PrayerTimeTable::from_raw(date, &raw)
            .map_err(|e| warn!("Ignoring cached prayer times: {}", e))
            .ok()
    }

    pub fn set_cached_prayer_table(&mut self, table: &PrayerTimeTable) -> Result<(), EngineError> {
        self.write(vec![
            (keys::CACHED_PRAYER_TIMES, json!(table.to_raw())),
            (
                keys::LAST_FETCH,
                json!(table.date().format(DATE_FORMAT).to_string()),
            ),
        ])
    }

    pub fn last_notification(&self) -> Option<String> {
        self.read(keys::LAST_PRAYER_NOTIFICATION)
    }

    pub fn set_last_notification(&mut self, key: &str) -> Result<(), EngineError> {
        self.write(vec![(keys::LAST_PRAYER_NOTIFICATION, json!(key))])
    }

    // =========================================================================
    // Focus
    // =========================================================================

    pub fn focus_state(&self) -> FocusState {
        let mut values = self.read_all(&[keys::FOCUS_MODE, keys::FOCUS_END_TIME]);
        FocusState {
            active: values
                .remove(keys::FOCUS_MODE)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            end_time: values
                .remove(keys::FOCUS_END_TIME)
                .and_then(number)
                .map(|ms| ms as Timestamp),
        }
    }

    pub fn set_focus_state(&mut self, state: FocusState) -> Result<(), EngineError> {
        self.write(vec![
            (keys::FOCUS_MODE, json!(state.active)),
            (keys::FOCUS_END_TIME, json!(state.end_time)),
        ])
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring stored '{}': {}", key, e);
            None
        }
    }
}

/// Numbers may have been stored as strings by the options page.
fn number(value: Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
