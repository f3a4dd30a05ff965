// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project detection helper for the `DETECT` verb.

use std::path::Path;

use serde_json::{json, Value};

/// Detects project type and runnable scripts for a directory.
pub trait ProjectDetector: Send + Sync {
    fn detect(&self, dir: &Path) -> Value;
}

/// Filesystem-based detector: looks at well-known manifest files.
#[derive(Default)]
pub struct FsDetector;

impl FsDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ProjectDetector for FsDetector {
    fn detect(&self, dir: &Path) -> Value {
        if let Some(found) = detect_node(dir) {
            return found;
        }
        if dir.join("Cargo.toml").exists() {
            return json!({
                "project_type": "rust",
                "scripts": {"build": "cargo build", "test": "cargo test", "run": "cargo run"},
            });
        }
        if dir.join("go.mod").exists() {
            return json!({
                "project_type": "go",
                "scripts": {"build": "go build ./...", "test": "go test ./...", "run": "go run ."},
            });
        }
        if dir.join("pyproject.toml").exists() || dir.join("requirements.txt").exists() {
            return json!({"project_type": "python", "scripts": {}});
        }
        json!({"project_type": "unknown", "scripts": {}})
    }
}

fn detect_node(dir: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let pkg: Value = serde_json::from_str(&raw).ok()?;

    let scripts = pkg.get("scripts").cloned().unwrap_or_else(|| json!({}));
    let deps = |name: &str| {
        pkg.get("dependencies")
            .and_then(|d| d.get(name))
            .or_else(|| pkg.get("devDependencies").and_then(|d| d.get(name)))
            .is_some()
    };

    let framework = if deps("next") {
        "next"
    } else if deps("vite") {
        "vite"
    } else if deps("react-scripts") {
        "create-react-app"
    } else if deps("react") {
        "react"
    } else {
        "node"
    };

    Some(json!({
        "project_type": "node",
        "framework": framework,
        "name": pkg.get("name").cloned().unwrap_or(Value::Null),
        "scripts": scripts,
    }))
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
