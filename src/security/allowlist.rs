//! Allow-list of shell commands for strict-mode validation.
//!
//! The static table is data, not code: extending it (including via the
//! `ALLOWED_CMD_*` environment variables or an in-session `allow_always`
//! grant) never touches the validator logic.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Coarse grouping of allow-listed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    ReadOnly,
    GitRead,
    GitWrite,
    PackageManager,
    Destructive,
    Network,
}

/// One entry in the command allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedCommand {
    /// Base executable, optionally with one subcommand (e.g. `"git status"`).
    pub base_name: &'static str,
    pub category: CommandCategory,
    /// Per-command wall-clock ceiling in seconds.
    pub max_timeout: u64,
    pub description: &'static str,
}

const fn cmd(
    base_name: &'static str,
    category: CommandCategory,
    max_timeout: u64,
    description: &'static str,
) -> AllowedCommand {
    AllowedCommand {
        base_name,
        category,
        max_timeout,
        description,
    }
}

/// Built-in allow-list.  Subcommand entries (e.g. `git status`) take
/// precedence over their bare base command.
pub const BUILTIN_ALLOWED: &[AllowedCommand] = &[
    // Read-only inspection.
    cmd("ls", CommandCategory::ReadOnly, 10, "list directory contents"),
    cmd("cat", CommandCategory::ReadOnly, 10, "print file contents"),
    cmd("head", CommandCategory::ReadOnly, 10, "print leading lines"),
    cmd("tail", CommandCategory::ReadOnly, 10, "print trailing lines"),
    cmd("wc", CommandCategory::ReadOnly, 10, "count lines/words/bytes"),
    cmd("pwd", CommandCategory::ReadOnly, 5, "print working directory"),
    cmd("echo", CommandCategory::ReadOnly, 5, "print arguments"),
    cmd("which", CommandCategory::ReadOnly, 5, "locate an executable"),
    cmd("file", CommandCategory::ReadOnly, 10, "identify file type"),
    cmd("stat", CommandCategory::ReadOnly, 10, "file status"),
    cmd("grep", CommandCategory::ReadOnly, 30, "search file contents"),
    cmd("find", CommandCategory::ReadOnly, 30, "walk a directory tree"),
    cmd("diff", CommandCategory::ReadOnly, 30, "compare files"),
    cmd("sort", CommandCategory::ReadOnly, 30, "sort lines"),
    cmd("uniq", CommandCategory::ReadOnly, 30, "filter repeated lines"),
    cmd("date", CommandCategory::ReadOnly, 5, "print the date"),
    cmd("uptime", CommandCategory::ReadOnly, 5, "system uptime"),
    cmd("env", CommandCategory::ReadOnly, 5, "print environment"),
    cmd("sleep", CommandCategory::ReadOnly, 60, "pause for a duration"),
    cmd("yes", CommandCategory::ReadOnly, 10, "repeat a string"),
    // Git, read side.
    cmd("git status", CommandCategory::GitRead, 30, "working tree status"),
    cmd("git diff", CommandCategory::GitRead, 30, "show changes"),
    cmd("git log", CommandCategory::GitRead, 30, "commit history"),
    cmd("git show", CommandCategory::GitRead, 30, "show objects"),
    cmd("git branch", CommandCategory::GitRead, 10, "list branches"),
    // Git, write side.
    cmd("git add", CommandCategory::GitWrite, 30, "stage changes"),
    cmd("git commit", CommandCategory::GitWrite, 30, "record changes"),
    cmd("git checkout", CommandCategory::GitWrite, 30, "switch branches"),
    // Package managers and build tools.
    cmd("cargo", CommandCategory::PackageManager, 600, "rust build tool"),
    cmd("npm", CommandCategory::PackageManager, 600, "node package manager"),
    cmd("pip", CommandCategory::PackageManager, 600, "python package manager"),
    cmd("pip3", CommandCategory::PackageManager, 600, "python package manager"),
    cmd("make", CommandCategory::PackageManager, 600, "build runner"),
    cmd("pytest", CommandCategory::PackageManager, 600, "python test runner"),
    cmd("python", CommandCategory::PackageManager, 120, "python interpreter"),
    cmd("python3", CommandCategory::PackageManager, 120, "python interpreter"),
    cmd("node", CommandCategory::PackageManager, 120, "node interpreter"),
    // Filesystem mutation.
    cmd("mkdir", CommandCategory::Destructive, 10, "create directories"),
    cmd("touch", CommandCategory::Destructive, 10, "create empty files"),
    cmd("cp", CommandCategory::Destructive, 30, "copy files"),
    cmd("mv", CommandCategory::Destructive, 30, "move files"),
    // Network.
    cmd("curl", CommandCategory::Network, 60, "http client"),
    cmd("ping", CommandCategory::Network, 30, "icmp echo"),
];

/// Mutable view over the allow-list: built-ins, configured extras, and
/// in-session grants from `allow_always` approvals.
pub struct CommandAllowList {
    extra: HashSet<String>,
    session_grants: Mutex<HashSet<String>>,
}

impl CommandAllowList {
    pub fn new(extra_allowed: &[String]) -> Self {
        Self {
            extra: extra_allowed.iter().map(|s| s.trim().to_owned()).collect(),
            session_grants: Mutex::new(HashSet::new()),
        }
    }

    /// Find the entry matching `base` (and optionally `base first_arg`).
    /// Subcommand entries win over bare entries.
    pub fn lookup(&self, base: &str, first_arg: Option<&str>) -> Option<AllowedCommand> {
        if let Some(arg) = first_arg {
            let compound = format!("{base} {arg}");
            if let Some(found) = BUILTIN_ALLOWED.iter().find(|c| c.base_name == compound) {
                return Some(found.clone());
            }
        }
        BUILTIN_ALLOWED.iter().find(|c| c.base_name == base).cloned()
    }

    /// Whether `base` is permitted by any source (builtin, config, session).
    pub fn contains(&self, base: &str, first_arg: Option<&str>) -> bool {
        if self.lookup(base, first_arg).is_some() {
            return true;
        }
        if self.extra.contains(base) {
            return true;
        }
        self.session_grants
            .lock()
            .map(|g| g.contains(base))
            .unwrap_or(false)
    }

    /// Record an in-session `allow_always` grant for a base command.
    pub fn grant_session(&self, base: &str) {
        if let Ok(mut grants) = self.session_grants.lock() {
            grants.insert(base.to_owned());
        }
    }

    /// Snapshot of all permitted base names, for `/permissions`.
    pub fn permitted(&self) -> Vec<String> {
        let mut out: Vec<String> = BUILTIN_ALLOWED
            .iter()
            .map(|c| c.base_name.to_owned())
            .chain(self.extra.iter().cloned())
            .collect();
        if let Ok(grants) = self.session_grants.lock() {
            out.extend(grants.iter().cloned());
        }
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_subcommand_entry() {
        let list = CommandAllowList::new(&[]);
        let entry = list.lookup("git", Some("status")).unwrap();
        assert_eq!(entry.base_name, "git status");
        assert_eq!(entry.category, CommandCategory::GitRead);
    }

    #[test]
    fn lookup_falls_back_to_base() {
        let list = CommandAllowList::new(&[]);
        let entry = list.lookup("cargo", Some("build")).unwrap();
        assert_eq!(entry.base_name, "cargo");
    }

    #[test]
    fn extra_allowed_extends_list() {
        let list = CommandAllowList::new(&["rustup".to_owned()]);
        assert!(list.contains("rustup", None));
        assert!(!list.contains("terraform", None));
    }

    #[test]
    fn session_grant_is_visible() {
        let list = CommandAllowList::new(&[]);
        assert!(!list.contains("jq", None));
        list.grant_session("jq");
        assert!(list.contains("jq", None));
        assert!(list.permitted().contains(&"jq".to_owned()));
    }
}
