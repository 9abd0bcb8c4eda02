//! Tool catalogue: alias resolution and gating classes.
//!
//! The dispatch layer hands us whatever name the caller used. It is resolved
//! once, through a static table, before any policy decision.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const SESSION_START: &str = "session_start";
pub const SESSION_REFRESH: &str = "session_refresh";
pub const SESSION_CLOSE: &str = "session_close";
pub const RECALL: &str = "recall";
pub const CONFIRM_SCARS: &str = "confirm_scars";

/// Every canonical tool name.
pub const CANONICAL_TOOLS: &[&str] = &[
    SESSION_START,
    SESSION_REFRESH,
    SESSION_CLOSE,
    RECALL,
    CONFIRM_SCARS,
    "create_learning",
    "create_decision",
    "record_scar_usage",
    "record_scar_usage_batch",
    "create_thread",
    "resolve_thread",
    "list_threads",
    "search",
    "log",
    "analyze",
    "prepare_context",
    "help",
    "cache_status",
    "cache_health",
    "cache_flush",
];

/// Bootstrap and inspection tools: never warned about.
const EXEMPT: &[&str] = &[
    SESSION_START,
    SESSION_REFRESH,
    "help",
    "cache_status",
    "cache_health",
    "cache_flush",
];

/// Read-only lookups usable before a session exists.
const SESSIONLESS_READS: &[&str] = &["search", "log", "analyze", "list_threads"];

/// Tools that persist new memory or close the session.
const CONSEQUENTIAL: &[&str] = &[
    "create_learning",
    "create_decision",
    "record_scar_usage",
    "record_scar_usage_batch",
    "create_thread",
    SESSION_CLOSE,
];

/// Short spellings (and canonical names) → canonical name.
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let short: &[(&str, &str)] = &[
        ("ss", SESSION_START),
        ("start", SESSION_START),
        ("sr", SESSION_REFRESH),
        ("refresh", SESSION_REFRESH),
        ("sc", SESSION_CLOSE),
        ("close", SESSION_CLOSE),
        ("r", RECALL),
        ("cs", CONFIRM_SCARS),
        ("confirm", CONFIRM_SCARS),
        ("cl", "create_learning"),
        ("learn", "create_learning"),
        ("cd", "create_decision"),
        ("decide", "create_decision"),
        ("rsu", "record_scar_usage"),
        ("rsub", "record_scar_usage_batch"),
        ("ct", "create_thread"),
        ("rt", "resolve_thread"),
        ("lt", "list_threads"),
        ("threads", "list_threads"),
        ("s", "search"),
        ("pc", "prepare_context"),
        ("h", "help"),
    ];

    let mut table = HashMap::new();
    for &(alias, canonical) in short {
        table.insert(alias, canonical);
    }
    // Canonical names resolve to themselves.
    for &canonical in CANONICAL_TOOLS {
        table.insert(canonical, canonical);
    }
    table
});

/// Namespaced forms as exposed by MCP hosts, e.g. "scarlog-recall" or "scarlog-r".
const NAMESPACE_PREFIXES: &[&str] = &["scarlog-", "scarlog_", "mcp__scarlog__"];

/// Resolves `name` to its canonical tool name. Unknown names resolve to themselves.
pub fn canonical_tool_name(name: &str) -> &str {
    let trimmed = name.trim();
    let bare = NAMESPACE_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);
    ALIASES.get(bare).copied().unwrap_or(bare)
}

pub fn is_exempt(canonical: &str) -> bool {
    EXEMPT.contains(&canonical)
}

pub fn requires_session(canonical: &str) -> bool {
    CANONICAL_TOOLS.contains(&canonical)
        && !is_exempt(canonical)
        && !SESSIONLESS_READS.contains(&canonical)
}

pub fn is_consequential(canonical: &str) -> bool {
    CONSEQUENTIAL.contains(&canonical)
}
