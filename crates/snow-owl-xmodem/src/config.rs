use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::error::{Result, XmodemError};

pub const DEFAULT_PORT: u16 = 53800;
pub const DEFAULT_LISTEN_BACKLOG: i32 = 5;
pub const DEFAULT_MAX_CLIENTS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmodemConfig {
    /// Directory uploaded files are written into
    pub root_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub listen_backlog: i32,
    /// Upper bound on concurrently connected clients
    pub max_clients: usize,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/snow-owl/xmodem"),
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_PORT),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_clients: DEFAULT_MAX_CLIENTS,
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Emit structured audit events alongside regular logs
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            audit_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

/// Upload storage policy
///
/// NIST 800-53 Controls:
/// - AC-3: Access Enforcement (restrict which names may be written)
/// - CM-5: Access Restrictions for Change (control file modifications)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Replace files that already exist; when false such uploads are refused
    pub allow_overwrite: bool,

    /// Glob patterns a filename must match, e.g. ["*.txt", "fw-*.bin"]
    /// Empty list accepts any valid filename
    pub allowed_patterns: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            allow_overwrite: true,
            allowed_patterns: Vec::new(),
        }
    }
}

pub fn load_config(path: &std::path::Path) -> Result<XmodemConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: XmodemConfig = toml::from_str(&contents).map_err(|e| {
        XmodemError::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(config)
}

pub fn write_config(path: &std::path::Path, config: &XmodemConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| XmodemError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Validate configuration for security and correctness
///
/// NIST 800-53 Controls:
/// - CM-6: Configuration Settings (validate all configuration parameters)
/// - AC-3: Access Enforcement (validate directory permissions)
/// - SC-5: Denial of Service Protection (validate resource limits)
///
/// STIG V-222566: Applications must validate configuration parameters
pub fn validate_config(config: &XmodemConfig, validate_bind: bool) -> Result<()> {
    if !config.root_dir.is_absolute() {
        return Err(XmodemError::Config(
            "root_dir must be an absolute path".to_string(),
        ));
    }

    match std::fs::metadata(&config.root_dir) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(XmodemError::Config(
                    "root_dir must be a directory".to_string(),
                ));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(XmodemError::Config(
                "root_dir does not exist; create it or adjust config".to_string(),
            ));
        }
        Err(e) => return Err(XmodemError::Io(e)),
    }

    if let Err(e) = std::fs::read_dir(&config.root_dir) {
        return Err(XmodemError::Config(format!(
            "root_dir is not readable: {}",
            e
        )));
    }

    if config.bind_addr.port() == 0 {
        return Err(XmodemError::Config(
            "bind_addr port must be non-zero".to_string(),
        ));
    }

    if validate_bind && let Err(e) = std::net::TcpListener::bind(config.bind_addr) {
        return Err(XmodemError::Config(format!(
            "bind_addr is not available: {}",
            e
        )));
    }

    if config.listen_backlog <= 0 {
        return Err(XmodemError::Config(
            "listen_backlog must be positive".to_string(),
        ));
    }

    // NIST SC-5: every client descriptor has to fit in a select(2) set
    if config.max_clients == 0 || config.max_clients >= nix::sys::select::FD_SETSIZE {
        return Err(XmodemError::Config(format!(
            "max_clients must be in range 1-{}",
            nix::sys::select::FD_SETSIZE - 1
        )));
    }

    if let Some(ref log_file) = config.logging.file {
        let parent = log_file.parent().ok_or_else(|| {
            XmodemError::Config("logging.file must include a parent directory".to_string())
        })?;
        match std::fs::metadata(parent) {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(XmodemError::Config(
                        "logging.file parent must be a directory".to_string(),
                    ));
                }
            }
            Err(e) => {
                return Err(XmodemError::Config(format!(
                    "logging.file parent error: {}",
                    e
                )));
            }
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| XmodemError::Config(format!("logging.file not writable: {}", e)))?;
    }

    validate_storage_config(&config.storage)?;
    Ok(())
}

pub fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    for pattern in &config.allowed_patterns {
        if pattern.trim().is_empty() {
            return Err(XmodemError::Config(
                "storage allowed_patterns cannot contain empty patterns".to_string(),
            ));
        }
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(XmodemError::Config(format!(
                "storage pattern '{}' is invalid: {}",
                pattern, e
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::io::Result<PathBuf> {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "snow_owl_xmodem_test_{}_{}",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn parses_minimal_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root_dir = temp_dir("parse")?;
        let log_dir = temp_dir("parse_log")?;
        let toml = format!(
            r#"
root_dir = "{}"
bind_addr = "127.0.0.1:53800"

[logging]
file = "{}/xmodem.log"

[storage]
allowed_patterns = ["*.txt"]
"#,
            root_dir.display(),
            log_dir.display()
        );
        let config: XmodemConfig = toml::from_str(&toml)?;
        assert_eq!(config.listen_backlog, DEFAULT_LISTEN_BACKLOG);
        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
        assert!(config.storage.allow_overwrite);
        validate_config(&config, false)?;
        Ok(())
    }

    #[test]
    fn defaults_use_reference_port() {
        let config = XmodemConfig::default();
        assert_eq!(config.bind_addr.port(), 53800);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn rejects_non_absolute_root_dir() {
        let config = XmodemConfig {
            root_dir: PathBuf::from("relative/path"),
            ..Default::default()
        };
        match validate_config(&config, false) {
            Ok(()) => panic!("expected error for relative root_dir"),
            Err(err) => assert!(format!("{err}").contains("root_dir must be an absolute path")),
        }
    }

    #[test]
    fn rejects_missing_root_dir() {
        let config = XmodemConfig {
            root_dir: PathBuf::from("/nonexistent/snow-owl-xmodem"),
            ..Default::default()
        };
        match validate_config(&config, false) {
            Ok(()) => panic!("expected error for missing root_dir"),
            Err(err) => assert!(format!("{err}").contains("root_dir does not exist")),
        }
    }

    #[test]
    fn rejects_zero_bind_port() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut config = XmodemConfig::default();
        config.root_dir = temp_dir("bind")?;
        config.bind_addr = "127.0.0.1:0".parse()?;
        match validate_config(&config, false) {
            Ok(()) => return Err("expected error for zero bind port".into()),
            Err(err) => assert!(format!("{err}").contains("bind_addr port must be non-zero")),
        }
        Ok(())
    }

    #[test]
    fn rejects_max_clients_out_of_range() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut config = XmodemConfig::default();
        config.root_dir = temp_dir("max-clients")?;

        config.max_clients = 0;
        assert!(validate_config(&config, false).is_err());

        config.max_clients = nix::sys::select::FD_SETSIZE;
        match validate_config(&config, false) {
            Ok(()) => return Err("expected error for max_clients".into()),
            Err(err) => assert!(format!("{err}").contains("max_clients must be in range")),
        }
        Ok(())
    }

    #[test]
    fn rejects_non_positive_backlog() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut config = XmodemConfig::default();
        config.root_dir = temp_dir("backlog")?;
        config.listen_backlog = 0;
        assert!(validate_config(&config, false).is_err());
        Ok(())
    }

    #[test]
    fn rejects_bad_storage_patterns() {
        let empty = StorageConfig {
            allowed_patterns: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(validate_storage_config(&empty).is_err());

        let malformed = StorageConfig {
            allowed_patterns: vec!["[abc".to_string()],
            ..Default::default()
        };
        assert!(validate_storage_config(&malformed).is_err());
    }

    #[test]
    fn config_round_trips_through_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("write")?;
        let path = dir.join("xmodem.toml");
        let mut config = XmodemConfig::default();
        config.max_clients = 42;
        config.storage.allowed_patterns = vec!["*.bin".to_string()];

        write_config(&path, &config)?;
        let loaded = load_config(&path)?;
        assert_eq!(loaded.max_clients, 42);
        assert_eq!(loaded.storage.allowed_patterns, vec!["*.bin".to_string()]);
        Ok(())
    }

    #[test]
    fn log_file_must_be_openable() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("log")?;
        let mut config = XmodemConfig::default();
        config.root_dir = dir.clone();

        config.logging.file = Some(dir.join("xmodem.log"));
        validate_config(&config, false)?;
        assert!(dir.join("xmodem.log").is_file());

        config.logging.file = Some(dir.clone());
        match validate_config(&config, false) {
            Ok(()) => Err("expected error for a directory as log file".into()),
            Err(err) => {
                assert!(format!("{err}").contains("logging.file not writable"));
                Ok(())
            }
        }
    }
}
