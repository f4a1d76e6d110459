//! Configuration module for parley.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::auth::validation::validate_login;
use crate::{ParleyError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds for authenticated sessions (0 = disabled).
    #[serde(default)]
    pub idle_timeout_secs: u64,
    /// Seconds an unauthenticated connection may wait before AUTH (0 = disabled).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Capacity of each session's outbound message queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum accepted length of one inbound line in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8189
}

fn default_max_connections() -> usize {
    100
}

fn default_read_timeout() -> u64 {
    120
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_line_length() -> usize {
    8192
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            idle_timeout_secs: 0,
            read_timeout_secs: default_read_timeout(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file (empty = console only).
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Password hashing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_argon2_memory")]
    pub argon2_memory_kib: u32,
    /// Argon2 time cost (iterations).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
    /// Argon2 parallelism.
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

fn default_argon2_memory() -> u32 {
    19456
}

fn default_argon2_iterations() -> u32 {
    2
}

fn default_argon2_parallelism() -> u32 {
    1
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: default_argon2_memory(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

/// User directory configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    /// Create an account on AUTH with an unknown login.
    #[serde(default)]
    pub auto_register: bool,
}

/// A pre-seeded account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Login (permanent identity).
    pub login: String,
    /// Plain-text password, hashed at startup.
    pub password: String,
    /// Initial nickname (defaults to the login).
    #[serde(default)]
    pub nickname: Option<String>,
}

impl AccountConfig {
    /// Create an account entry.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            nickname: None,
        }
    }

    /// Set the initial nickname.
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

/// Accounts seeded when the configuration names none.
pub fn demo_accounts() -> Vec<AccountConfig> {
    (1..=3)
        .map(|i| {
            AccountConfig::new(format!("login{i}"), format!("pass{i}"))
                .with_nickname(format!("nick{i}"))
        })
        .collect()
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Password hashing configuration.
    #[serde(default)]
    pub security: SecurityConfig,
    /// User directory configuration.
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Seeded accounts.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParleyError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ParleyError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `PARLEY_HOST`: bind address
    /// - `PARLEY_PORT`: listen port (ignored if not a number)
    /// - `PARLEY_LOG_LEVEL`: log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PARLEY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("PARLEY_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Accounts to seed: the configured ones, or the demo set if none.
    pub fn seed_accounts(&self) -> Vec<AccountConfig> {
        if self.accounts.is_empty() {
            demo_accounts()
        } else {
            self.accounts.clone()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_queue_capacity == 0 {
            return Err(ParleyError::Config(
                "server.outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(ParleyError::Config(
                "server.max_connections must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            validate_login(&account.login).map_err(|e| {
                ParleyError::Config(format!("account '{}': {e}", account.login))
            })?;
            if !seen.insert(account.login.as_str()) {
                return Err(ParleyError::Config(format!(
                    "duplicate account login '{}'",
                    account.login
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8189);
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(config.server.idle_timeout_secs, 0);
        assert_eq!(config.server.read_timeout_secs, 120);
        assert_eq!(config.server.outbound_queue_capacity, 256);
        assert_eq!(config.server.max_line_length, 8192);

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_empty());

        assert_eq!(config.security.argon2_memory_kib, 19456);
        assert_eq!(config.security.argon2_iterations, 2);
        assert_eq!(config.security.argon2_parallelism, 1);

        assert!(!config.directory.auto_register);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
max_connections = 5
idle_timeout_secs = 600
read_timeout_secs = 10
outbound_queue_capacity = 32
max_line_length = 1024

[logging]
level = "debug"
file = "logs/parley.log"

[security]
argon2_memory_kib = 8
argon2_iterations = 1
argon2_parallelism = 1

[directory]
auto_register = true

[[accounts]]
login = "alice"
password = "wonderland"

[[accounts]]
login = "bob"
password = "builder"
nickname = "Bobby"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_connections, 5);
        assert_eq!(config.server.idle_timeout_secs, 600);
        assert_eq!(config.server.read_timeout_secs, 10);
        assert_eq!(config.server.outbound_queue_capacity, 32);
        assert_eq!(config.server.max_line_length, 1024);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "logs/parley.log");

        assert_eq!(config.security.argon2_memory_kib, 8);
        assert!(config.directory.auto_register);

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].login, "alice");
        assert!(config.accounts[0].nickname.is_none());
        assert_eq!(config.accounts[1].nickname.as_deref(), Some("Bobby"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8189);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        if let Err(ParleyError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(ParleyError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7777").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 7777);
    }

    #[test]
    fn test_seed_accounts_falls_back_to_demo() {
        let config = Config::default();
        let seeded = config.seed_accounts();
        assert_eq!(seeded.len(), 3);
        assert_eq!(seeded[0].login, "login1");
        assert_eq!(seeded[0].password, "pass1");
        assert_eq!(seeded[0].nickname.as_deref(), Some("nick1"));
    }

    #[test]
    fn test_seed_accounts_uses_configured() {
        let mut config = Config::default();
        config.accounts.push(AccountConfig::new("carol", "secret"));
        let seeded = config.seed_accounts();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].login, "carol");
    }

    #[test]
    fn test_validate_duplicate_login() {
        let mut config = Config::default();
        config.accounts.push(AccountConfig::new("carol", "one"));
        config.accounts.push(AccountConfig::new("carol", "two"));
        let result = config.validate();
        assert!(matches!(result, Err(ParleyError::Config(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_validate_invalid_login() {
        let mut config = Config::default();
        config.accounts.push(AccountConfig::new("has,comma", "pw"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_queue_capacity() {
        let mut config = Config::default();
        config.server.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        let original = std::env::var("PARLEY_LOG_LEVEL").ok();
        std::env::set_var("PARLEY_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "trace");

        if let Some(val) = original {
            std::env::set_var("PARLEY_LOG_LEVEL", val);
        } else {
            std::env::remove_var("PARLEY_LOG_LEVEL");
        }
    }
}
