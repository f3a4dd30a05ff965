// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chaos-injection facade.
//!
//! The injection itself happens inside the proxies; the daemon owns the
//! shared rule set and counters that proxies consult per request.

use agnt_core::WireError;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

/// A named bundle of chaos settings.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub config: Value,
}

/// Built-in presets, discoverable via `CHAOS LIST-PRESETS`.
pub fn presets() -> Vec<ChaosPreset> {
    vec![
        ChaosPreset {
            name: "flaky-network",
            description: "drop 10% of requests, 500ms jitter",
            config: json!({"drop_rate": 0.1, "latency_ms": 500}),
        },
        ChaosPreset {
            name: "slow-3g",
            description: "2s latency, 400kbps throttle",
            config: json!({"latency_ms": 2000, "throttle_kbps": 400}),
        },
        ChaosPreset {
            name: "server-errors",
            description: "5% of responses become HTTP 500",
            config: json!({"error_rate": 0.05, "error_status": 500}),
        },
    ]
}

#[derive(Debug, Default)]
struct ChaosInner {
    enabled: bool,
    config: Value,
    rules: Vec<Value>,
    next_rule_id: u64,
    injected: u64,
}

/// Chaos rule set and counters, shared with proxies.
#[derive(Default)]
pub struct ChaosState {
    inner: Mutex<ChaosInner>,
}

/// Chaos control surface used by the dispatcher.
pub trait ChaosController: Send + Sync {
    fn enable(&self);
    fn disable(&self);
    fn status(&self) -> Value;
    fn apply_preset(&self, name: &str) -> Result<Value, WireError>;
    fn set_config(&self, config: Value);
    fn add_rule(&self, rule: Value) -> u64;
    fn remove_rule(&self, id: u64) -> Result<(), WireError>;
    fn list_rules(&self) -> Vec<Value>;
    fn stats(&self) -> Value;
    fn clear(&self);
}

impl ChaosState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by proxies when they inject a fault.
    pub fn record_injection(&self) {
        self.inner.lock().injected += 1;
    }
}

impl ChaosController for ChaosState {
    fn enable(&self) {
        self.inner.lock().enabled = true;
        info!("chaos enabled");
    }

    fn disable(&self) {
        self.inner.lock().enabled = false;
        info!("chaos disabled");
    }

    fn status(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "enabled": inner.enabled,
            "config": inner.config,
            "rule_count": inner.rules.len(),
        })
    }

    fn apply_preset(&self, name: &str) -> Result<Value, WireError> {
        let preset = presets()
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| WireError::not_found(format!("unknown preset: {name}")))?;
        let mut inner = self.inner.lock();
        inner.config = preset.config.clone();
        inner.enabled = true;
        info!(preset = preset.name, "chaos preset applied");
        Ok(preset.config)
    }

    fn set_config(&self, config: Value) {
        self.inner.lock().config = config;
    }

    fn add_rule(&self, rule: Value) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_rule_id += 1;
        let id = inner.next_rule_id;
        inner.rules.push(json!({"id": id, "rule": rule}));
        id
    }

    fn remove_rule(&self, id: u64) -> Result<(), WireError> {
        let mut inner = self.inner.lock();
        let before = inner.rules.len();
        inner
            .rules
            .retain(|r| r.get("id").and_then(|v| v.as_u64()) != Some(id));
        if inner.rules.len() == before {
            return Err(WireError::not_found(format!("no chaos rule with id {id}")));
        }
        Ok(())
    }

    fn list_rules(&self) -> Vec<Value> {
        self.inner.lock().rules.clone()
    }

    fn stats(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "enabled": inner.enabled,
            "rules": inner.rules.len(),
            "injected": inner.injected,
        })
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.enabled = false;
        inner.config = Value::Null;
        inner.rules.clear();
    }
}

#[cfg(test)]
#[path = "chaos_tests.rs"]
mod tests;
