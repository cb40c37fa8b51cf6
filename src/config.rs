//! Configuration module for watchpost.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown mode {0}")]
    UnknownMode(String),
    #[error("duplicate mode {0}")]
    DuplicateMode(Mode),
    #[error("initdb cannot be combined with other modes")]
    InitDbCombined,
    #[error("no run mode given")]
    NoMode,
}

/// One part of the process to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    /// Evaluate readings and send alerts.
    Daemon,
    /// Serve the HTTP API.
    Web,
    /// Create or update the schema, then exit.
    InitDb,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Daemon => "daemon",
            Mode::Web => "web",
            Mode::InitDb => "initdb",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daemon" => Ok(Mode::Daemon),
            "web" => Ok(Mode::Web),
            "initdb" => Ok(Mode::InitDb),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Parse a comma-separated mode list such as `daemon,web`.
pub fn parse_modes(list: &str) -> Result<BTreeSet<Mode>, ConfigError> {
    let mut modes = BTreeSet::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mode: Mode = part.parse()?;
        if !modes.insert(mode) {
            return Err(ConfigError::DuplicateMode(mode));
        }
    }
    if modes.is_empty() {
        return Err(ConfigError::NoMode);
    }
    if modes.contains(&Mode::InitDb) && modes.len() > 1 {
        return Err(ConfigError::InitDbCombined);
    }
    Ok(modes)
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "watchpost.db")
    pub db_path: String,
    /// Seconds between alert evaluations (default: 30)
    pub eval_interval_secs: u64,
    /// Parts of the process to run (default: daemon and web)
    pub modes: BTreeSet<Mode>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "watchpost.db".to_string(),
            eval_interval_secs: 30,
            modes: BTreeSet::from([Mode::Daemon, Mode::Web]),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WATCHPOST_HTTP_PORT`: HTTP port (default: 8080)
    /// - `WATCHPOST_DB_PATH`: Database file path (default: "watchpost.db")
    /// - `WATCHPOST_EVAL_INTERVAL_SECS`: Evaluation period (default: 30)
    /// - `WATCHPOST_MODE`: Comma-separated modes (default: "daemon,web")
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(port_str) = lookup("WATCHPOST_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Some(db_path) = lookup("WATCHPOST_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = lookup("WATCHPOST_EVAL_INTERVAL_SECS") {
            match secs.parse() {
                Ok(secs) if secs > 0 => cfg.eval_interval_secs = secs,
                _ => {}
            }
        }

        if let Some(modes) = lookup("WATCHPOST_MODE") {
            cfg.modes = parse_modes(&modes)?;
        }

        Ok(cfg)
    }

    pub fn eval_interval(&self) -> Duration {
        Duration::from_secs(self.eval_interval_secs)
    }

    pub fn runs(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "watchpost.db");
        assert_eq!(cfg.eval_interval(), Duration::from_secs(30));
        assert!(cfg.runs(Mode::Daemon) && cfg.runs(Mode::Web));
        assert!(!cfg.runs(Mode::InitDb));
    }

    #[test]
    fn test_overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("WATCHPOST_HTTP_PORT", "9090"),
            ("WATCHPOST_DB_PATH", "/var/lib/watchpost.db"),
            ("WATCHPOST_EVAL_INTERVAL_SECS", "5"),
            ("WATCHPOST_MODE", "web"),
        ]))
        .unwrap();
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.db_path, "/var/lib/watchpost.db");
        assert_eq!(cfg.eval_interval_secs, 5);
        assert_eq!(cfg.modes, BTreeSet::from([Mode::Web]));
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("WATCHPOST_HTTP_PORT", "eighty"),
            ("WATCHPOST_EVAL_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.eval_interval_secs, 30);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(
            parse_modes("daemon, web").unwrap(),
            BTreeSet::from([Mode::Daemon, Mode::Web])
        );
        assert_eq!(
            parse_modes("web,cron"),
            Err(ConfigError::UnknownMode("cron".to_string()))
        );
        assert_eq!(
            parse_modes("web,web"),
            Err(ConfigError::DuplicateMode(Mode::Web))
        );
        assert_eq!(parse_modes("initdb,web"), Err(ConfigError::InitDbCombined));
        assert_eq!(parse_modes("initdb").unwrap(), BTreeSet::from([Mode::InitDb]));
        assert_eq!(parse_modes(""), Err(ConfigError::NoMode));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ConfigError::UnknownMode("cron".into()).to_string(), "unknown mode cron");
        assert_eq!(ConfigError::DuplicateMode(Mode::Daemon).to_string(), "duplicate mode daemon");
    }
}
