//! Host adapters over a JS object
//!
//! The background script passes one object whose methods wrap the browser
//! APIs. Browser calls are asynchronous; the adapters fire them and keep a
//! local mirror (storage, installed rules, alarm names) so the engine can
//! read back its own writes synchronously. A promise the script later sees
//! rejected is reported back through `rules_rejected`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use js_sys::{Array, Function, Reflect, JSON};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::{JsCast, JsValue};

use tk_core::types::{Rule, RuleId};
use tk_engine::host::{
    AlarmHost, AlarmSpec, Clock, HostError, KeyValueStore, Notifier, PrayerTimeSource, RuleTable,
    RuleUpdate, TabHost, TabId,
};
use tk_engine::{CalculationMethod, Host, Location};

// =============================================================================
// Conversion helpers
// =============================================================================

fn describe(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

pub(crate) fn to_js<T: Serialize>(value: &T) -> Result<JsValue, String> {
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    JSON::parse(&text).map_err(|e| describe(&e))
}

pub(crate) fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, String> {
    if value.is_undefined() || value.is_null() {
        return serde_json::from_value(Value::Null).map_err(|e| e.to_string());
    }
    let text: String = JSON::stringify(value).map_err(|e| describe(&e))?.into();
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

/// Call `host[method](...args)`.
fn call(host: &JsValue, method: &'static str, args: &[JsValue]) -> Result<JsValue, HostError> {
    let func = Reflect::get(host, &JsValue::from_str(method))
        .map_err(|e| HostError::new(method, describe(&e)))?
        .dyn_into::<Function>()
        .map_err(|_| HostError::new(method, "host method missing"))?;

    let args: Array = args.iter().collect();
    func.apply(host, &args)
        .map_err(|e| HostError::new(method, describe(&e)))
}

fn encode<T: Serialize>(method: &'static str, value: &T) -> Result<JsValue, HostError> {
    to_js(value).map_err(|e| HostError::new(method, e))
}

// =============================================================================
// Storage
// =============================================================================

pub struct JsStore {
    host: JsValue,
    mirror: Map<String, Value>,
}

impl KeyValueStore for JsStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, HostError> {
        Ok(keys
            .iter()
            .filter_map(|k| self.mirror.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, items: Map<String, Value>) -> Result<(), HostError> {
        let arg = encode("storageSet", &items)?;
        call(&self.host, "storageSet", &[arg])?;
        self.mirror.extend(items);
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<(), HostError> {
        let arg = encode("storageRemove", &keys)?;
        call(&self.host, "storageRemove", &[arg])?;
        for key in keys {
            self.mirror.remove(*key);
        }
        Ok(())
    }
}

// =============================================================================
// Rule table
// =============================================================================

pub struct JsRuleTable {
    host: JsValue,
    mirror: BTreeMap<RuleId, Rule>,
}

impl RuleTable for JsRuleTable {
    fn get_rules(&self) -> Result<Vec<Rule>, HostError> {
        Ok(self.mirror.values().cloned().collect())
    }

    fn update_rules(&mut self, update: RuleUpdate) -> Result<(), HostError> {
        for rule in &update.add_rules {
            rule.validate()
                .map_err(|e| HostError::new("updateRules", e.to_string()))?;
        }

        let arg = encode("updateRules", &update)?;
        call(&self.host, "updateRules", &[arg])?;

        for id in &update.remove_rule_ids {
            self.mirror.remove(id);
        }
        for rule in update.add_rules {
            self.mirror.insert(rule.id, rule);
        }
        Ok(())
    }
}

// =============================================================================
// Alarms, tabs, notifications
// =============================================================================

pub struct JsAlarms {
    host: JsValue,
    names: BTreeSet<String>,
}

impl AlarmHost for JsAlarms {
    fn create(&mut self, name: &str, spec: AlarmSpec) -> Result<(), HostError> {
        let spec = encode("createAlarm", &spec)?;
        call(&self.host, "createAlarm", &[JsValue::from_str(name), spec])?;
        self.names.insert(name.to_string());
        Ok(())
    }

    fn clear(&mut self, name: &str) -> Result<(), HostError> {
        call(&self.host, "clearAlarm", &[JsValue::from_str(name)])?;
        self.names.remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, HostError> {
        Ok(self.names.iter().cloned().collect())
    }
}

pub struct JsTabs {
    host: JsValue,
}

impl TabHost for JsTabs {
    fn reload_matching(&mut self, patterns: &[String]) -> Result<usize, HostError> {
        let arg = encode("reloadMatching", &patterns)?;
        let reloaded = call(&self.host, "reloadMatching", &[arg])?;
        // The count is only known when the script answers synchronously.
        Ok(reloaded.as_f64().map_or(0, |n| n as usize))
    }

    fn close(&mut self, tab: TabId) -> Result<(), HostError> {
        call(&self.host, "closeTab", &[JsValue::from(tab)])?;
        Ok(())
    }
}

pub struct JsNotifier {
    host: JsValue,
}

impl Notifier for JsNotifier {
    fn notify(&mut self, id: &str, title: &str, message: &str) -> Result<(), HostError> {
        call(
            &self.host,
            "notify",
            &[
                JsValue::from_str(id),
                JsValue::from_str(title),
                JsValue::from_str(message),
            ],
        )?;
        Ok(())
    }
}

// =============================================================================
// Prayer times and clock
// =============================================================================

/// Daily times from the script's formula library. Must answer synchronously.
pub struct JsTimeSource {
    host: JsValue,
}

impl PrayerTimeSource for JsTimeSource {
    fn compute_daily_times(
        &self,
        location: &Location,
        method: CalculationMethod,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, String>, HostError> {
        const METHOD: &str = "computeDailyTimes";
        let location = encode(METHOD, location)?;
        let date = JsValue::from_str(&date.format("%Y-%m-%d").to_string());
        let times = call(&self.host, METHOD, &[location, JsValue::from(method.0), date])?;

        if times.is_undefined() || times.is_null() {
            return Err(HostError::new(METHOD, "no times returned"));
        }
        from_js(&times).map_err(|e| HostError::new(METHOD, e))
    }
}

/// `Date.now()` in the browser's current UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsClock;

impl Clock for JsClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let date = js_sys::Date::new_0();
        // getTimezoneOffset is minutes behind UTC
        let offset = FixedOffset::west_opt(date.get_timezone_offset() as i32 * 60)
            .unwrap_or_else(|| Utc.fix());
        DateTime::from_timestamp_millis(date.get_time() as i64)
            .unwrap_or_default()
            .with_timezone(&offset)
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// What the script read from the browser before starting the engine.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub storage: Map<String, Value>,
    pub rules: Vec<Rule>,
    pub alarms: Vec<String>,
}

pub fn build_host(host: JsValue, snapshot: Snapshot) -> Host {
    Host {
        store: Box::new(JsStore {
            host: host.clone(),
            mirror: snapshot.storage,
        }),
        rule_table: Box::new(JsRuleTable {
            host: host.clone(),
            mirror: snapshot.rules.into_iter().map(|r| (r.id, r)).collect(),
        }),
        alarms: Box::new(JsAlarms {
            host: host.clone(),
            names: snapshot.alarms.into_iter().collect(),
        }),
        tabs: Box::new(JsTabs { host: host.clone() }),
        notifier: Box::new(JsNotifier { host: host.clone() }),
        time_source: Box::new(JsTimeSource { host }),
        clock: Box::new(JsClock),
    }
}
