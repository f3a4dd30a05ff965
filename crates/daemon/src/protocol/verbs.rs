// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The command surface: every verb and its sub-verbs.
//!
//! The codec consults this table to decide whether the second token of a
//! command line is a sub-verb or the first argument; the dispatcher uses it
//! to build structured unknown-verb/unknown-action errors.

/// A verb and its valid sub-verbs (empty = verb takes no sub-verb).
pub struct VerbSpec {
    pub name: &'static str,
    pub actions: &'static [&'static str],
}

/// Full command table.
pub const VERBS: &[VerbSpec] = &[
    VerbSpec {
        name: "PING",
        actions: &[],
    },
    VerbSpec {
        name: "INFO",
        actions: &[],
    },
    VerbSpec {
        name: "SHUTDOWN",
        actions: &[],
    },
    VerbSpec {
        name: "DETECT",
        actions: &[],
    },
    VerbSpec {
        name: "RUN",
        actions: &[],
    },
    VerbSpec {
        name: "RUN-JSON",
        actions: &[],
    },
    VerbSpec {
        name: "PROC",
        actions: &["STATUS", "OUTPUT", "STOP", "LIST", "CLEANUP-PORT"],
    },
    VerbSpec {
        name: "PROXY",
        actions: &["START", "STOP", "STATUS", "LIST", "EXEC", "TOAST"],
    },
    VerbSpec {
        name: "PROXYLOG",
        actions: &["QUERY", "CLEAR", "STATS"],
    },
    VerbSpec {
        name: "CURRENTPAGE",
        actions: &["LIST", "GET", "CLEAR"],
    },
    VerbSpec {
        name: "OVERLAY",
        actions: &["SET", "GET", "CLEAR", "ACTIVITY"],
    },
    VerbSpec {
        name: "TUNNEL",
        actions: &["START", "STOP", "STATUS", "LIST"],
    },
    VerbSpec {
        name: "CHAOS",
        actions: &[
            "ENABLE",
            "DISABLE",
            "STATUS",
            "PRESET",
            "SET",
            "ADD-RULE",
            "REMOVE-RULE",
            "LIST-RULES",
            "STATS",
            "CLEAR",
            "LIST-PRESETS",
        ],
    },
    VerbSpec {
        name: "SESSION",
        actions: &[
            "REGISTER",
            "UNREGISTER",
            "HEARTBEAT",
            "LIST",
            "GET",
            "SEND",
            "SCHEDULE",
            "CANCEL",
            "TASKS",
            "FIND",
            "ATTACH",
            "URL",
        ],
    },
    VerbSpec {
        name: "STORE",
        actions: &["GET", "SET", "DELETE", "LIST", "CLEAR", "GET-ALL"],
    },
    VerbSpec {
        name: "AUTOMATE",
        actions: &["PROCESS", "BATCH"],
    },
];

/// Look up a verb by canonical (uppercase) name.
pub fn verb_spec(name: &str) -> Option<&'static VerbSpec> {
    VERBS.iter().find(|v| v.name == name)
}

/// Whether a verb takes a sub-verb.
pub fn takes_action(verb: &str) -> bool {
    verb_spec(verb).is_some_and(|v| !v.actions.is_empty())
}

/// Valid sub-verbs for a verb (empty for unknown verbs).
pub fn actions_for(verb: &str) -> &'static [&'static str] {
    verb_spec(verb).map(|v| v.actions).unwrap_or(&[])
}

/// All known verb names, for unknown-verb errors.
pub fn verb_names() -> Vec<&'static str> {
    VERBS.iter().map(|v| v.name).collect()
}

#[cfg(test)]
#[path = "verbs_tests.rs"]
mod tests;
