// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output helpers for CLI commands.

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

/// Render a daemon uptime as a short duration: `"5s"`, `"2m"`, `"1h30m"`, `"2d4h"`.
fn format_uptime(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h{}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        let d = secs / 86400;
        let h = (secs % 86400) / 3600;
        if h > 0 {
            format!("{}d{}h", d, h)
        } else {
            format!("{}d", d)
        }
    }
}

/// Render the `INFO` payload as a short human summary.
pub fn print_info(info: &serde_json::Value) {
    let version = info["version"].as_str().unwrap_or("?");
    let uptime = info["uptime_secs"].as_u64().unwrap_or(0);
    println!("agntd {version}, up {}", format_uptime(uptime));
    println!(
        "  sessions: {} active ({} registered, {} unregistered)",
        info["sessions"]["active_count"],
        info["sessions"]["total_registered"],
        info["sessions"]["total_unregistered"],
    );
    println!(
        "  processes: {} live ({} started)",
        info["processes"]["live_count"], info["processes"]["total_started"],
    );
    println!(
        "  scheduler: {} pending, {} delivered, {} failed",
        info["scheduler"]["pending"],
        info["scheduler"]["delivered"],
        info["scheduler"]["failed"],
    );
    println!(
        "  connections: {}/{}",
        info["connections"]["current"], info["connections"]["max_clients"],
    );
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
