// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AI-automation facade.
//!
//! Task processors are an external subsystem; the daemon only routes
//! `AUTOMATE` requests through this seam.

use agnt_core::WireError;
use serde_json::Value;

/// Automation control surface used by the dispatcher.
#[async_trait::async_trait]
pub trait Automation: Send + Sync {
    async fn process(&self, task: Value) -> Result<Value, WireError>;
    async fn batch(&self, tasks: Vec<Value>) -> Result<Vec<Value>, WireError>;
}

/// Default implementation with no processor attached.
#[derive(Default)]
pub struct NoopAutomation;

impl NoopAutomation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Automation for NoopAutomation {
    async fn process(&self, _task: Value) -> Result<Value, WireError> {
        Err(WireError::invalid_state(
            "no automation processor configured",
        ))
    }

    async fn batch(&self, _tasks: Vec<Value>) -> Result<Vec<Value>, WireError> {
        Err(WireError::invalid_state(
            "no automation processor configured",
        ))
    }
}
