// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use tempfile::TempDir;

fn store(dir: &TempDir) -> StateStore {
    StateStore::open(dir.path().join("state.json"))
}

#[test]
fn fresh_store_is_empty() {
    let dir = TempDir::new().unwrap();
    let state = store(&dir);
    assert_eq!(state.overlay_endpoint(), None);
    assert!(state.proxies().is_empty());
    assert!(state.projects().is_empty());
}

#[test]
fn overlay_endpoint_survives_reload() {
    let dir = TempDir::new().unwrap();
    {
        let state = store(&dir);
        state.set_overlay_endpoint(Some("/tmp/ovl.sock".into()));
    }
    let state = store(&dir);
    assert_eq!(state.overlay_endpoint(), Some("/tmp/ovl.sock".into()));

    state.set_overlay_endpoint(None);
    let state = store(&dir);
    assert_eq!(state.overlay_endpoint(), None);
}

#[test]
fn proxies_roundtrip() {
    let dir = TempDir::new().unwrap();
    let state = store(&dir);
    state.put_proxy("px1", json!({"target": "http://localhost:3000"}));
    state.put_proxy("px2", json!({"target": "http://localhost:4000"}));
    state.remove_proxy("px1");

    let state = store(&dir);
    let proxies = state.proxies();
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies["px2"]["target"], "http://localhost:4000");
}

#[test]
fn store_is_scoped_by_project() {
    let dir = TempDir::new().unwrap();
    let state = store(&dir);

    state.store_set("/p1", "theme", json!("dark"));
    state.store_set("/p2", "theme", json!("light"));

    assert_eq!(state.store_get("/p1", "theme"), Some(json!("dark")));
    assert_eq!(state.store_get("/p2", "theme"), Some(json!("light")));
    assert_eq!(state.store_get("/p3", "theme"), None);

    assert!(state.store_delete("/p1", "theme"));
    assert!(!state.store_delete("/p1", "theme"));
    assert_eq!(state.store_get("/p1", "theme"), None);
}

#[test]
fn store_keys_clear_and_all() {
    let dir = TempDir::new().unwrap();
    let state = store(&dir);
    state.store_set("/p1", "a", json!(1));
    state.store_set("/p1", "b", json!(2));

    assert_eq!(state.store_keys("/p1"), vec!["a", "b"]);
    assert_eq!(state.store_all("/p1").len(), 2);

    assert_eq!(state.store_clear("/p1"), 2);
    assert_eq!(state.store_clear("/p1"), 0);
    assert!(state.store_keys("/p1").is_empty());
}

#[test]
fn project_registration_dedupes() {
    let dir = TempDir::new().unwrap();
    let state = store(&dir);

    assert!(state.register_project("/p1"));
    assert!(!state.register_project("/p1"));
    assert!(state.register_project("/p2"));
    assert!(!state.register_project(""));

    let state = store(&dir);
    assert_eq!(state.projects(), vec!["/p1", "/p2"]);
}

#[test]
fn corrupt_file_is_quarantined() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, b"{not json at all").unwrap();

    let state = StateStore::open(&path);
    assert!(state.projects().is_empty());
    assert!(dir.path().join("state.json.bak").exists());
}

#[test]
fn saved_file_is_either_old_or_new() {
    // Atomic write discipline: after a save the file parses completely.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let state = StateStore::open(&path);
    for i in 0..50 {
        state.store_set("/p", &format!("k{i}"), json!(i));
        let content = fs::read_to_string(&path).unwrap();
        let parsed: DaemonStateFile = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.version, 1);
        assert!(parsed.saved_at.is_some());
    }
    assert_eq!(state.write_failures(), 0);
}
