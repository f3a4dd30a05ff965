// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seams for external collaborators.
//!
//! Proxies, tunnels, chaos injection, page tracking, and AI automation are
//! separate subsystems with their own internals; the daemon core only
//! routes commands to them and scopes their entries by project. Each seam
//! is a trait with an in-daemon registry (or noop) implementation, so the
//! dispatcher, session cleanup, and fuzzy lookup are fully exercisable
//! without the external machinery attached.

pub mod automation;
pub mod chaos;
pub mod detect;
pub mod proxy;
pub mod tunnel;

pub use automation::{Automation, NoopAutomation};
pub use chaos::{ChaosController, ChaosState};
pub use detect::{FsDetector, ProjectDetector};
pub use proxy::{LocalProxyManager, PageSessionStore, ProxyInfo, ProxyLogStore, ProxyManager};
pub use tunnel::{LocalTunnelManager, TunnelInfo, TunnelManager};

use agnt_core::{ProjectPath, WireError};

/// Resolve a possibly-partial identifier against a set of entries.
///
/// Exact matches always win and bypass the project filter. Prefix matches
/// are restricted to entries whose project matches `bias` (when attached),
/// which keeps CLIs in sibling directories from seeing each other's
/// resources. Ambiguous prefixes are an error rather than a guess.
pub fn resolve_fuzzy(
    entries: &[(String, ProjectPath)],
    partial: &str,
    bias: Option<&ProjectPath>,
) -> Result<String, WireError> {
    if let Some((id, _)) = entries.iter().find(|(id, _)| id == partial) {
        return Ok(id.clone());
    }

    let candidates: Vec<&String> = entries
        .iter()
        .filter(|(id, project)| {
            id.starts_with(partial)
                && bias
                    .map(|b| project.matches(b))
                    .unwrap_or(true)
        })
        .map(|(id, _)| id)
        .collect();

    match candidates.as_slice() {
        [] => Err(WireError::not_found(format!("no match for id: {partial}"))),
        [one] => Ok((*one).clone()),
        many => Err(WireError::invalid_args(format!(
            "ambiguous id {partial}: matches {}",
            many.iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
