//! Configuration loading: TOML file + environment overrides.

pub mod schema;

use std::path::{Path, PathBuf};

pub use schema::{
    AppConfig, ApprovalConfig, CircuitBreakerConfig, GovernanceConfig, LlmConfig, RouterConfig,
    SandboxConfig, SecurityConfig, ToolsConfig,
};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Default location: `~/.quarry/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".quarry").join("config.toml"))
}

/// Load configuration from `path`, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load from the default path when present; otherwise return defaults.
/// Environment overrides apply in both cases.
pub fn load_default_config() -> AppConfig {
    let mut cfg = match default_config_path() {
        Some(path) if path.exists() => match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("ignoring unreadable config: {e}");
                AppConfig::default()
            }
        },
        _ => AppConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Recognized environment variables:
/// - `LLM_API_KEY` — switches the key source to this variable.
/// - `LLM_MODEL` — overrides `llm.model_name`.
/// - `ALLOWED_CMD_<NAME>` — each one appends a base command to the
///   security allow-list (the value is the command name; the suffix is
///   only a disambiguator).
fn apply_env_overrides(cfg: &mut AppConfig) {
    if std::env::var("LLM_API_KEY").is_ok() {
        cfg.llm.api_key_env = "LLM_API_KEY".to_owned();
    }
    if let Ok(model) = std::env::var("LLM_MODEL") {
        if !model.trim().is_empty() {
            cfg.llm.model_name = model;
        }
    }
    for (key, value) in std::env::vars() {
        if key.starts_with("ALLOWED_CMD_") && !value.trim().is_empty() {
            let cmd = value.trim().to_owned();
            if !cfg.security.extra_allowed.contains(&cmd) {
                cfg.security.extra_allowed.push(cmd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_config_parses_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[llm]\nmodel_name = \"test-model\"\n").unwrap();

        let cfg = load_config(&path).unwrap();
        // LLM_MODEL may be set in the environment; only check when absent.
        if std::env::var("LLM_MODEL").is_err() {
            assert_eq!(cfg.llm.model_name, "test-model");
        }
        assert_eq!(cfg.tools.max_parallel, 4);
    }

    #[test]
    fn load_config_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(load_config(&path), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_config_bad_toml_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "not [valid").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }
}
