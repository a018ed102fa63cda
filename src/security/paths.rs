//! Path sanitization for tool arguments.
//!
//! Sanitization never blocks: escapes from the workspace are resolved and
//! logged so the audit trail records them, while blocking decisions stay
//! with the command validator and the approval policy.

use std::path::{Path, PathBuf};

/// Resolve `~`, follow symlinks where the path exists, and log (not block)
/// escapes from `workspace_root`.
pub fn sanitize_path(raw: &str, workspace_root: Option<&Path>) -> PathBuf {
    let expanded = expand_tilde(raw);

    // Canonicalize when possible so symlinks cannot hide the real target.
    let resolved = expanded.canonicalize().unwrap_or(expanded);

    if let Some(root) = workspace_root {
        if !resolved.starts_with(root) {
            tracing::info!(
                "path outside workspace: {} (root {})",
                resolved.display(),
                root.display()
            );
        }
    }

    resolved
}

fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~"), home);
            assert_eq!(expand_tilde("~/x"), home.join("x"));
        }
    }

    #[test]
    fn plain_paths_pass_through() {
        let p = sanitize_path("/tmp/__quarry_does_not_exist__", None);
        assert_eq!(p, PathBuf::from("/tmp/__quarry_does_not_exist__"));
    }

    #[test]
    fn symlinks_resolve_to_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real.txt");
        fs::write(&target, "x").unwrap();
        let link = dir.path().join("link.txt");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &link).unwrap();
            let resolved = sanitize_path(&link.display().to_string(), None);
            assert_eq!(resolved, target.canonicalize().unwrap());
        }
    }

    #[test]
    fn escape_is_logged_not_blocked() {
        let workspace = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("f.txt");
        fs::write(&target, "x").unwrap();
        // Still returns the resolved path.
        let resolved = sanitize_path(&target.display().to_string(), Some(workspace.path()));
        assert!(resolved.ends_with("f.txt"));
    }
}
