//! WebAssembly bindings for Timekeeper
//!
//! The background script creates one engine with [`init`] and forwards each
//! browser event to the matching export. Popup and interstitial messages go
//! through [`handle_message`] as JSON and come back as a JSON response.

mod host;

use std::cell::RefCell;

use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::prelude::*;

use tk_compiler::{dedupe_by_id, parse_block_list, RuleCompiler, DEFAULT_INTERSTITIAL_PATH};
use tk_core::types::RuleId;
use tk_engine::{Engine, EngineConfig, Response};

use crate::host::{build_host, from_js, to_js, Snapshot};

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Result<R, JsValue> {
    ENGINE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(engine) => Ok(f(engine)),
        None => Err(JsValue::from_str("Engine not initialized. Call init() first.")),
    })
}

// =============================================================================
// Logging
// =============================================================================

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

fn init_logging(debug: bool) {
    // A second init keeps the logger already installed.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Create the engine.
///
/// `host` is the object of browser-facing callbacks, `config` a partial
/// [`EngineConfig`] that must at least carry `toolOrigin`, and `snapshot`
/// `{storage, rules, alarms}` as read from the browser just before the call.
#[wasm_bindgen]
pub fn init(host: JsValue, config: JsValue, snapshot: JsValue, debug: bool) -> Result<(), JsValue> {
    init_logging(debug);

    if is_initialized() {
        return Err(JsValue::from_str(
            "Already initialized. Reload the extension to reinitialize.",
        ));
    }

    let config: Option<EngineConfig> = from_js(&config)
        .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
    let config = config.unwrap_or_default();
    config
        .require_tool_origin()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let snapshot: Option<Snapshot> = from_js(&snapshot)
        .map_err(|e| JsValue::from_str(&format!("Invalid snapshot: {}", e)))?;

    let engine = Engine::new(
        config,
        build_host(host, snapshot.unwrap_or_default()),
    );
    ENGINE.with(|cell| *cell.borrow_mut() = Some(engine));
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.with(|cell| cell.borrow().is_some())
}

#[wasm_bindgen]
pub fn on_installed() -> Result<(), JsValue> {
    with_engine(Engine::on_installed)
}

#[wasm_bindgen]
pub fn on_startup() -> Result<(), JsValue> {
    with_engine(Engine::on_startup)
}

#[wasm_bindgen]
pub fn on_alarm(name: &str) -> Result<(), JsValue> {
    with_engine(|engine| engine.on_alarm(name))
}

#[wasm_bindgen]
pub fn on_before_navigate(tab_id: i32, frame_id: i32, url: &str) -> Result<(), JsValue> {
    with_engine(|engine| engine.on_before_navigate(tab_id, frame_id, url))
}

#[wasm_bindgen]
pub fn on_tab_removed(tab_id: i32) -> Result<(), JsValue> {
    with_engine(|engine| engine.on_session_closed(tab_id))
}

/// An `updateRules` promise rejected after the call returned.
#[wasm_bindgen]
pub fn rules_rejected(rule_ids: Vec<i32>) -> Result<(), JsValue> {
    let ids: &[RuleId] = &rule_ids;
    with_engine(|engine| engine.on_rule_write_rejected(ids))
}

/// Handle one runtime message; returns the JSON response.
#[wasm_bindgen]
pub fn handle_message(message: &str) -> String {
    match with_engine(|engine| engine.handle_message(message)) {
        Ok(response) => response.to_json(),
        Err(_) => Response {
            ok: false,
            data: None,
            error: Some("Engine not initialized".to_string()),
        }
        .to_json(),
    }
}

// =============================================================================
// Stateless helpers
// =============================================================================

/// Compile a newline-separated block list into rule objects.
#[wasm_bindgen]
pub fn compile_block_list(list_text: &str, interstitial_path: Option<String>) -> Result<JsValue, JsValue> {
    let compiler = RuleCompiler::new(
        interstitial_path
            .as_deref()
            .unwrap_or(DEFAULT_INTERSTITIAL_PATH),
    );
    let domains = parse_block_list(list_text);
    let mut rules = compiler.compile_block_list(&domains);
    let stats = dedupe_by_id(&mut rules);

    let result = js_sys::Object::new();
    let rules = to_js(&rules).map_err(|e| JsValue::from_str(&e))?;
    let _ = js_sys::Reflect::set(&result, &"rules".into(), &rules);
    let _ = js_sys::Reflect::set(&result, &"domains".into(), &JsValue::from(domains.len() as u32));
    let _ = js_sys::Reflect::set(&result, &"duplicates".into(), &JsValue::from(stats.duplicates as u32));
    let _ = js_sys::Reflect::set(&result, &"collisions".into(), &JsValue::from(stats.collisions.len() as u32));
    Ok(result.into())
}

/// Rule id a domain hashes to.
#[wasm_bindgen]
pub fn rule_id(domain: &str) -> i32 {
    tk_core::rule_id(domain)
}
