//! Timekeeper Engine
//!
//! The rule/state coordination engine behind the extension's background
//! process. It owns the dynamic rule table, schedules expiries through the
//! host's wall-clock alarms, and runs the focus, prayer-window and
//! access-grant policies.
//!
//! Every host facility (storage, rule table, alarms, tabs, notifications,
//! the prayer-time source and the clock) is reached through the traits in
//! [`host`], so the engine runs unchanged in the browser (see `tk-wasm`),
//! in the CLI simulator and in tests (see [`memory`]).
//!
//! # Modules
//!
//! - `engine`: composition root and host event entry points
//! - `command`: tagged message commands and their dispatch replies
//! - `rule_store`: single writer to the host rule table
//! - `scheduler`: name-keyed alarms with route dispatch
//! - `focus`, `prayer`, `grant`: the three blocking policies
//! - `intent`: per-tab navigation intent
//! - `context`: process-lifetime state shared by the policies
//! - `settings`: typed view over persisted storage
//! - `config`: engine configuration
//! - `memory`: in-memory host used by tests and the simulator

pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod focus;
pub mod grant;
pub mod host;
pub mod intent;
pub mod memory;
pub mod prayer;
pub mod rule_store;
pub mod scheduler;
pub mod settings;

pub use command::{Command, Reply, Response, StatusReport};
pub use config::EngineConfig;
pub use engine::{Engine, Host};
pub use error::EngineError;
pub use host::{
    AlarmHost, AlarmSpec, Clock, HostError, KeyValueStore, Notifier, PrayerTimeSource, RuleTable,
    RuleUpdate, SystemClock, TabHost, TabId, Timestamp,
};
pub use prayer::{CalculationMethod, Location, Prayer, PrayerTimeTable};
