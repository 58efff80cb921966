use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DEFAULT_GRACE_PERIOD_SECS, DEFAULT_SCAN_INTERVAL_SECS};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub database: DatabaseSettings,
    pub scanner: ScannerSettings,
    pub monitors: MonitorDefaults,
    pub alerts: AlertSettings,
    pub pings: PingSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailSettings>,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub pool_size: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: "deadman.db".into(), pool_size: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Seconds between missed-check sweeps
    pub interval_seconds: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self { interval_seconds: DEFAULT_SCAN_INTERVAL_SECS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorDefaults {
    pub grace_period_seconds: u64,
}

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self { grace_period_seconds: DEFAULT_GRACE_PERIOD_SECS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Repeat outage notifications at this cadence until recovery; unset means once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renotify_cooldown_seconds: Option<u64>,
    pub notify_on_expiry: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            renotify_cooldown_seconds: None,
            notify_on_expiry: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingSettings {
    /// Keep updating `last_ping_at` on expired monitors, for audit
    pub record_after_expiry: bool,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self { record_after_expiry: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub api_base: String,
    pub domain: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub timeout_seconds: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self { timeout_seconds: 5 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/deadman/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("deadman/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let or_none = |value: Option<u64>| value.map_or_else(|| "disabled".to_string(), |v| format!("{v}s"));

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Scanner")?;
        write_1(f, "Interval (s)", &self.scanner.interval_seconds)?;
        write_1(f, "Default Grace Period (s)", &self.monitors.grace_period_seconds)?;

        write_title_1(f, "Alerts")?;
        write_1(f, "Workers", &self.alerts.workers)?;
        write_1(f, "Max Attempts", &self.alerts.max_attempts)?;
        write_1(f, "Initial Backoff (ms)", &self.alerts.initial_backoff_ms)?;
        write_1(f, "Max Backoff (ms)", &self.alerts.max_backoff_ms)?;
        write_1(f, "Re-notify Cooldown", &or_none(self.alerts.renotify_cooldown_seconds))?;
        write_1(f, "Notify On Expiry", &self.alerts.notify_on_expiry)?;
        write_1(f, "Record Pings After Expiry", &self.pings.record_after_expiry)?;

        write_title_1(f, "Delivery")?;
        match &self.email {
            Some(email) => write_1(f, "Email", &format!("{} ({})", email.domain, email.api_base))?,
            None => write_1(f, "Email", &"not configured")?,
        }
        write_1(f, "Webhook Timeout (s)", &self.webhook.timeout_seconds)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/deadman/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = deadman::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), deadman::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.scanner.interval_seconds == 0 {
            return Err(Error::Invalid("scanner.interval_seconds must be greater than zero".into()));
        }
        if self.alerts.workers == 0 {
            return Err(Error::Invalid("alerts.workers must be greater than zero".into()));
        }
        if self.alerts.max_attempts == 0 {
            return Err(Error::Invalid("alerts.max_attempts must be greater than zero".into()));
        }
        if self.alerts.renotify_cooldown_seconds == Some(0) {
            return Err(Error::Invalid("alerts.renotify_cooldown_seconds must be greater than zero".into()));
        }
        if self.database.pool_size == 0 {
            return Err(Error::Invalid("database.pool_size must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deadman");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.scanner.interval_seconds, DEFAULT_SCAN_INTERVAL_SECS);
        assert!(dir.path().join("nested/deadman.toml").exists());

        // Second load reads the file back.
        let again = Config::from_config(Some(&path)).unwrap();
        assert_eq!(again.server.port, config.server.port);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[alerts]\nrenotify_cooldown_seconds = 3600\n\n[email]\napi_base = \"https://api.mailgun.net\"\n\
             domain = \"mg.example.com\"\napi_key = \"key\"\n",
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.alerts.renotify_cooldown_seconds, Some(3600));
        assert_eq!(config.alerts.max_attempts, 3);
        assert!(config.pings.record_after_expiry);
        assert_eq!(config.email.unwrap().domain, "mg.example.com");
    }

    #[test]
    fn test_rejects_zero_scan_interval() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scanner]\ninterval_seconds = 0\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scanner\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_display_lists_sections() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Scanner"));
        assert!(rendered.contains("Re-notify Cooldown: disabled"));
        assert!(rendered.contains("Email: not configured"));
    }
}
