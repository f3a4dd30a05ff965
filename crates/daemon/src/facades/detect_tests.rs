// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

#[test]
fn detects_node_project_with_framework() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("package.json"),
        serde_json::to_vec(&json!({
            "name": "web-app",
            "scripts": {"dev": "vite", "build": "vite build"},
            "devDependencies": {"vite": "^5.0.0"},
        }))
        .unwrap(),
    )
    .unwrap();

    let detected = FsDetector::new().detect(dir.path());
    assert_eq!(detected["project_type"], "node");
    assert_eq!(detected["framework"], "vite");
    assert_eq!(detected["name"], "web-app");
    assert_eq!(detected["scripts"]["dev"], "vite");
}

#[test]
fn detects_rust_project() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();

    let detected = FsDetector::new().detect(dir.path());
    assert_eq!(detected["project_type"], "rust");
    assert_eq!(detected["scripts"]["test"], "cargo test");
}

#[test]
fn unknown_directory() {
    let dir = TempDir::new().unwrap();
    let detected = FsDetector::new().detect(dir.path());
    assert_eq!(detected["project_type"], "unknown");
}

#[test]
fn malformed_package_json_falls_through() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("package.json"), "{broken").unwrap();
    std::fs::write(dir.path().join("go.mod"), "module x\n").unwrap();

    let detected = FsDetector::new().detect(dir.path());
    assert_eq!(detected["project_type"], "go");
}
