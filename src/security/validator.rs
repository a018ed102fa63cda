//! Shell-command classification ahead of sandbox execution.
//!
//! Decision pipeline:
//!
//! ```text
//! empty / too long          → Denied
//! deny-substring hit        → warning noted
//! dangerous-regex hit       → warning noted
//! > 10 pipes                → Denied
//! strict: comprehensive     → Denied on any violation
//! strict: allow-list lookup → Denied when unknown
//! otherwise                 → AllowedWithWarning when a warning was
//!                             noted, else Allowed
//! ```
//!
//! Denials always win over warnings: a deny-listed construction that also
//! fails the allow-list comes back `Denied`, never merely warned.
//!
//! Verdicts are deterministic: same input, same verdict, no filesystem
//! dependence.  Audit mode (explicit, opt-in, logged) bypasses the two
//! strict-mode steps only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;

use super::allowlist::CommandAllowList;

/// Maximum accepted command length in characters.
const MAX_COMMAND_LEN: usize = 4096;

/// Maximum pipe operators before the command is rejected outright.
const MAX_PIPES: usize = 10;

/// Decision returned by [`CommandValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// The command may proceed immediately.
    Allowed,
    /// The command may proceed, but matched a danger pattern; the reason is
    /// surfaced to the caller (and, configurably, to the approval flow).
    AllowedWithWarning(String),
    /// The command is rejected; the reason explains why.
    Denied(String),
}

impl CommandVerdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, CommandVerdict::Denied(_))
    }
}

/// Substrings that always trigger a warning.  Matched case-insensitively
/// against the whole command.
const DENY_SUBSTRINGS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf ~/*",
    "chmod -r 777",
    "chmod 777 /",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "mkfs",
    ":(){ :|:& };:",
    "curl | sh",
    "wget | sh",
    "curl | bash",
    "wget | bash",
];

/// Regex patterns for dangerous constructions.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"chmod\s+-R\s+777",
    r"dd\s+if=/dev/(zero|random|urandom)",
    r">\s*/dev/sd[a-z]",
    r"mkfs\.",
    r":\(\)\{.*\|.*&\s*\}",
    r"eval.*\$\(",
    r"\$\(.*curl",
    r"\$\(.*wget",
    r"(curl|wget).*\|\s*(sh|bash)",
    r"\bsudo\s+",
    r"\bsu\s+",
];

/// Prefixes whose commands may legitimately contain `$` expansion or
/// parentheses in strict mode (test selectors, format strings).
const EXPANSION_ALLOW_PREFIXES: &[&str] = &["git ", "python ", "python3 ", "pytest ", "cargo "];

/// Classifies shell commands.  Shared across threads via `Arc`; the only
/// mutable state is the audit flag and the session allow-list grants.
pub struct CommandValidator {
    strict_mode: bool,
    audit_mode: AtomicBool,
    allow_list: Arc<CommandAllowList>,
    dangerous: Vec<Regex>,
}

impl CommandValidator {
    pub fn new(strict_mode: bool, allow_list: Arc<CommandAllowList>) -> Self {
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!("invalid danger pattern '{p}': {e}");
                    None
                }
            })
            .collect();
        Self {
            strict_mode,
            audit_mode: AtomicBool::new(false),
            allow_list,
            dangerous,
        }
    }

    /// Toggle audit mode.  Enabling it bypasses the strict-mode checks for
    /// the rest of the session and is logged loudly.
    pub fn set_audit_mode(&self, enabled: bool) {
        self.audit_mode.store(enabled, Ordering::SeqCst);
        if enabled {
            tracing::warn!("audit mode enabled: strict-mode checks bypassed");
        }
    }

    pub fn audit_mode(&self) -> bool {
        self.audit_mode.load(Ordering::SeqCst)
    }

    pub fn allow_list(&self) -> &Arc<CommandAllowList> {
        &self.allow_list
    }

    /// Classify a raw command string.
    pub fn validate(&self, command: &str) -> CommandVerdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return CommandVerdict::Denied("empty command".into());
        }
        if command.len() > MAX_COMMAND_LEN {
            return CommandVerdict::Denied(format!(
                "command too long: {} chars (max {MAX_COMMAND_LEN})",
                command.len()
            ));
        }

        let lower = command.to_lowercase();
        let mut warning = None;
        for blocked in DENY_SUBSTRINGS {
            if lower.contains(blocked) {
                tracing::warn!("deny-listed construction detected: {blocked}");
                warning = Some(format!("deny-listed construction detected: '{blocked}'"));
                break;
            }
        }
        if warning.is_none() {
            for pattern in &self.dangerous {
                if pattern.is_match(command) {
                    tracing::warn!("dangerous pattern matched: {}", pattern.as_str());
                    warning = Some(format!("dangerous pattern matched: {}", pattern.as_str()));
                    break;
                }
            }
        }

        let pipe_count = command.matches('|').count();
        if pipe_count > MAX_PIPES {
            return CommandVerdict::Denied(format!(
                "excessive piping: {pipe_count} pipes (max {MAX_PIPES})"
            ));
        }

        if self.strict_mode && !self.audit_mode() {
            if let Some(violation) = comprehensive_check(command) {
                return CommandVerdict::Denied(violation);
            }

            let Some(parts) = shlex::split(trimmed) else {
                return CommandVerdict::Denied("unparseable quoting".into());
            };
            let Some(base) = parts.first() else {
                return CommandVerdict::Denied("empty command".into());
            };
            let first_arg = parts.get(1).map(String::as_str);
            if !self.allow_list.contains(base, first_arg) {
                return CommandVerdict::Denied(format!("command '{base}' is not whitelisted"));
            }
        } else if self.strict_mode {
            tracing::warn!("audit mode active: skipping strict checks for '{trimmed}'");
        }

        match warning {
            Some(reason) => CommandVerdict::AllowedWithWarning(reason),
            None => CommandVerdict::Allowed,
        }
    }
}

/// Strict-mode comprehensive check.  Returns the first violation found.
fn comprehensive_check(command: &str) -> Option<String> {
    const META: &[char] = &[
        '|', '&', ';', '`', '(', ')', '<', '>', '[', ']', '{', '}', '\\', '\n', '\r',
    ];

    let expansion_allowed = EXPANSION_ALLOW_PREFIXES
        .iter()
        .any(|p| command.starts_with(p));

    for meta in META {
        if command.contains(*meta) {
            // Parentheses appear in legitimate test selectors.
            if matches!(meta, '(' | ')') && expansion_allowed {
                continue;
            }
            return Some(format!("shell metacharacter '{meta}' not allowed"));
        }
    }

    if command.contains("&&") || command.contains("||") {
        return Some("command chaining not allowed".into());
    }

    if command.contains('$') && !expansion_allowed {
        return Some("environment expansion not allowed".into());
    }

    for glob in ["**", "/*", "~"] {
        if command.contains(glob) {
            return Some(format!("dangerous glob pattern '{glob}' not allowed"));
        }
    }

    let lower = command.to_lowercase();
    if lower.contains("\\x") || lower.contains("\\u") {
        return Some("encoded characters not allowed".into());
    }

    None
}

// ─── Tests ────────────────────────────────────────────────────────────────────
