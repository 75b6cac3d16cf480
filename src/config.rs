//! Runtime configuration.
//!
//! [`CoreConfig`] is the explicit record threaded through parsing,
//! checking, and writing. Defaults can be overridden by a TOML file at:
//! 1. `$MBOXCK_CONFIG` (environment variable)
//! 2. `~/.config/mboxck/config.toml`
//! and the command line overrides both.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the library needs to know about one run.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub quiet: bool,
    pub strict: bool,
    pub verbose: bool,
    pub dry_run: bool,
    pub backup: bool,
    pub show_context: bool,
    pub interactive: bool,
    pub auto_write: bool,
    pub use_mmap: bool,
    pub lock_timeout: Duration,
    /// Listing width; 0 means unbounded.
    pub page_width: usize,
    /// Listing page height; 0 means unbounded.
    pub page_height: usize,
    pub pager: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            strict: false,
            verbose: false,
            dry_run: false,
            backup: false,
            show_context: false,
            interactive: false,
            auto_write: false,
            use_mmap: true,
            lock_timeout: Duration::from_secs(5),
            page_width: 80,
            page_height: 24,
            pager: default_pager(),
        }
    }
}

impl CoreConfig {
    /// Defaults layered with the config file.
    pub fn from_file_config(file: &FileConfig) -> Self {
        let mut config = Self::default();
        config.strict = file.check.strict;
        config.backup = file.write.backup;
        config.lock_timeout = Duration::from_secs(file.lock.timeout_secs);
        if let Some(pager) = &file.display.pager {
            config.pager = pager.clone();
        }
        if let Some(width) = file.display.page_width {
            config.page_width = width;
        }
        config
    }
}

/// `$PAGER`, falling back to `more`.
pub fn default_pager() -> String {
    std::env::var("PAGER").unwrap_or_else(|_| "more".to_string())
}

// ── Config file ─────────────────────────────────────────────────

/// On-disk configuration (all sections optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub general: GeneralConfig,
    pub check: CheckConfig,
    pub write: WriteConfig,
    pub lock: LockConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Enable the strict rule battery by default.
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Keep `<mailbox>~` backups by default.
    pub backup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds to wait for a contended mailbox lock.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Pager command; `$PAGER` (then `more`) when unset.
    pub pager: Option<String>,
    /// Listing width override.
    pub page_width: Option<usize>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load the config file, falling back to defaults on any problem.
pub fn load_file_config() -> FileConfig {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<FileConfig>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    FileConfig::default()
}

/// Config file location: env var override, then the standard directory.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXCK_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mboxck").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoreConfig::default();
        assert!(!cfg.strict);
        assert!(cfg.use_mmap);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_config_uses_defaults() {
        let partial = r#"
[check]
strict = true

[lock]
timeout_secs = 9
"#;
        let file: FileConfig = toml::from_str(partial).unwrap();
        assert!(file.check.strict);
        assert_eq!(file.lock.timeout_secs, 9);
        assert!(!file.write.backup);
        assert_eq!(file.general.log_level, "warn");

        let core = CoreConfig::from_file_config(&file);
        assert!(core.strict);
        assert_eq!(core.lock_timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_file_config_round_trip() {
        let file = FileConfig::default();
        let text = toml::to_string_pretty(&file).unwrap();
        let parsed: FileConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.lock.timeout_secs, file.lock.timeout_secs);
    }
}
