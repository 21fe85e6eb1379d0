//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MINIMAIL_CONFIG` (environment variable)
//! 2. `~/.config/minimail/config.toml` (Linux/macOS)
//!    `%APPDATA%\minimail\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! `$MINIMAIL_PASSWORD`, when set, replaces `imap.password`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MailError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mailbox connection settings.
    pub imap: ImapConfig,
    /// USPS digest image extraction.
    pub usps: UspsConfig,
    /// State retention and snapshot output.
    pub state: StateConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// IMAP connection settings. Immutable for the lifetime of a poller.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (IMAPS). Plain TCP when false.
    pub ssl: bool,
    pub username: String,
    pub password: String,
    pub folder: String,
    /// Raw IMAP SEARCH criteria, e.g. `UNSEEN` or `SINCE 01-Sep-2025`.
    pub search: String,
    /// Maximum number of (newest) matching messages fetched per cycle.
    pub fetch_limit: usize,
    /// Seconds between two poll cycles.
    pub update_interval: u64,
    /// Case-insensitive substrings of the From header. Empty = every sender.
    pub sender_filters: Vec<String>,
}

/// USPS digest image extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UspsConfig {
    /// Directory mailpiece scans are written to. Disabled when unset.
    pub image_dir: Option<PathBuf>,
    /// Public URL prefix under which `image_dir` is served.
    pub image_url_prefix: String,
}

/// State retention and snapshot output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Maximum entries kept in accumulating fields.
    pub history_limit: usize,
    /// JSON snapshot rewritten after every successful cycle.
    pub snapshot_file: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            ssl: true,
            username: String::new(),
            password: String::new(),
            folder: "INBOX".to_string(),
            search: "ALL".to_string(),
            fetch_limit: 25,
            update_interval: 90,
            sender_filters: Vec::new(),
        }
    }
}

impl Default for UspsConfig {
    fn default() -> Self {
        Self {
            image_dir: None,
            image_url_prefix: "/local/minimail/usps".to_string(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            snapshot_file: None,
        }
    }
}

// The password never reaches the logs.
impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .field("search", &self.search)
            .field("fetch_limit", &self.fetch_limit)
            .field("update_interval", &self.update_interval)
            .field("sender_filters", &self.sender_filters)
            .finish()
    }
}

impl ImapConfig {
    /// Check that everything needed to log in is present.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(MailError::Config("imap.host is empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(MailError::Config("imap.username is empty".into()));
        }
        if self.password.is_empty() {
            return Err(MailError::Config(
                "imap.password is empty (set it in the config or MINIMAIL_PASSWORD)".into(),
            ));
        }
        if self.fetch_limit == 0 {
            return Err(MailError::Config("imap.fetch_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Poll interval as a [`Duration`]; never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(1))
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Configuration plus the reason the file on disk was not used, if any.
///
/// Loading runs before logging is set up, so the caller reports the
/// problem once a subscriber exists.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub problem: Option<MailError>,
}

/// Load configuration, searching standard locations.
///
/// Falls back to the defaults if no file is found or it cannot be parsed.
pub fn load_config() -> Loaded {
    match config_file_path() {
        Some(path) => load_config_from(&path),
        None => Loaded {
            config: with_env_overrides(Config::default()),
            problem: None,
        },
    }
}

/// Load configuration from an explicit file, falling back to defaults.
pub fn load_config_from(path: &Path) -> Loaded {
    let (config, problem) = match read_config_file(path) {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(e) => (Config::default(), Some(e)),
    };
    Loaded {
        config: with_env_overrides(config),
        problem,
    }
}

fn with_env_overrides(mut config: Config) -> Config {
    if let Ok(password) = std::env::var("MINIMAIL_PASSWORD") {
        config.imap.password = password;
    }
    config
}

/// Parse a config file. `Ok(None)` when it does not exist.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| MailError::io(path, e))?;
    toml::from_str::<Config>(&contents)
        .map(Some)
        .map_err(|e| MailError::Config(format!("{}: {e}", path.display())))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MINIMAIL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("minimail").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("minimail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.imap.port, 993);
        assert!(cfg.imap.ssl);
        assert_eq!(cfg.imap.folder, "INBOX");
        assert_eq!(cfg.imap.search, "ALL");
        assert_eq!(cfg.imap.fetch_limit, 25);
        assert_eq!(cfg.imap.update_interval, 90);
        assert!(cfg.imap.sender_filters.is_empty());
        assert_eq!(cfg.state.history_limit, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[imap]
host = "imap.example.com"
username = "me@example.com"
sender_filters = ["amazon", "usps"]

[usps]
image_dir = "/tmp/scans"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.imap.host, "imap.example.com");
        assert_eq!(cfg.imap.sender_filters, vec!["amazon", "usps"]);
        assert_eq!(cfg.usps.image_dir, Some(PathBuf::from("/tmp/scans")));
        // Other fields use defaults
        assert_eq!(cfg.imap.port, 993);
        assert_eq!(cfg.imap.folder, "INBOX");
        assert_eq!(cfg.usps.image_url_prefix, "/local/minimail/usps");
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_broken_file_falls_back_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[imap\nhost = ").unwrap();

        let loaded = load_config_from(&path);
        assert_eq!(loaded.config.imap.port, 993);
        assert!(matches!(loaded.problem, Some(MailError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_not_a_problem() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&tmp.path().join("absent.toml"));
        assert!(loaded.problem.is_none());
        assert_eq!(loaded.config.imap.folder, "INBOX");
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let mut imap = ImapConfig::default();
        assert!(matches!(imap.validate(), Err(MailError::Config(_))));

        imap.host = "imap.example.com".into();
        imap.username = "me".into();
        assert!(imap.validate().is_err());

        imap.password = "secret".into();
        assert!(imap.validate().is_ok());

        imap.fetch_limit = 0;
        assert!(imap.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let imap = ImapConfig {
            password: "hunter2".into(),
            ..ImapConfig::default()
        };
        let shown = format!("{imap:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_interval_never_zero() {
        let imap = ImapConfig {
            update_interval: 0,
            ..ImapConfig::default()
        };
        assert_eq!(imap.interval(), Duration::from_secs(1));
    }
}
