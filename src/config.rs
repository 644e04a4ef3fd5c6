//! Configuration types for the bot.
//!
//! The configuration is loaded once at startup from TOML and never mutated
//! afterwards. Every section uses `#[serde(default)]` so a config file only
//! needs the fields it wants to change.

use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Where and as whom to connect.
    pub connection: ConnectionConfig,
    /// Timing of the periodic presence behaviors.
    pub behavior: BehaviorConfig,
    /// Reconnect policy after a session ends.
    pub reconnect: ReconnectConfig,
    /// Which session backend to use.
    pub session: SessionConfig,
    /// Log level and optional log file.
    pub logging: LoggingConfig,
}

/// Connection parameters handed to the session connector.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Player name to join as.
    pub username: String,
    /// Account password for online auth modes.
    pub password: Option<String>,
    /// Authentication mode.
    pub auth: AuthMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 25565,
            username: "AFK_Bot".to_owned(),
            password: None,
            auth: AuthMode::Offline,
        }
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth", &self.auth)
            .finish()
    }
}

/// Account authentication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// No account verification (offline-mode servers).
    #[default]
    Offline,
    /// Legacy Mojang account.
    #[serde(alias = "provider-a")]
    Mojang,
    /// Microsoft account.
    #[serde(alias = "provider-b")]
    Microsoft,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offline => "offline",
            Self::Mojang => "mojang",
            Self::Microsoft => "microsoft",
        };
        f.write_str(name)
    }
}

/// Behavior tuning. All times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// How often to turn the head slightly away from the baseline.
    pub head_rotate_interval_ms: u64,
    /// Yaw offset from the baseline, in degrees.
    pub head_rotate_amount_deg: f32,
    /// How often to take a tiny step forward.
    pub micro_move_interval_ms: u64,
    /// How long the forward control is held per step.
    pub micro_move_duration_ms: u64,
    /// How often to use the held item and swing the arm.
    pub arm_swing_interval_ms: u64,
    /// Send a short chat message every `chat_ping_interval_ms`.
    ///
    /// Off by default; only useful on servers that check chat activity.
    pub chat_ping_enabled: bool,
    /// Interval between chat pings.
    pub chat_ping_interval_ms: u64,
    /// Chat ping contents. A single dot is the least intrusive option.
    pub chat_ping_message: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            head_rotate_interval_ms: 30_000,
            head_rotate_amount_deg: 8.0,
            micro_move_interval_ms: 5 * 60_000,
            micro_move_duration_ms: 1_200,
            arm_swing_interval_ms: 60_000,
            chat_ping_enabled: false,
            chat_ping_interval_ms: 15 * 60_000,
            chat_ping_message: ".".to_owned(),
        }
    }
}

impl BehaviorConfig {
    pub fn head_rotate_interval(&self) -> Duration {
        Duration::from_millis(self.head_rotate_interval_ms)
    }

    /// Yaw offset in radians.
    pub fn head_rotate_amount_rad(&self) -> f32 {
        self.head_rotate_amount_deg.to_radians()
    }

    pub fn micro_move_interval(&self) -> Duration {
        Duration::from_millis(self.micro_move_interval_ms)
    }

    pub fn micro_move_duration(&self) -> Duration {
        Duration::from_millis(self.micro_move_duration_ms)
    }

    pub fn arm_swing_interval(&self) -> Duration {
        Duration::from_millis(self.arm_swing_interval_ms)
    }

    pub fn chat_ping_interval(&self) -> Duration {
        Duration::from_millis(self.chat_ping_interval_ms)
    }
}

/// Reconnect policy. The delay is constant and retries never stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Wait before reconnecting after a session ends or fails.
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { delay_ms: 10_000 }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Session backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    /// In-memory session that only records actions (dry run).
    Simulated,
    /// Plain TCP presence session against `host:port`.
    #[default]
    Tcp,
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => f.write_str("simulated"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

/// Session backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    /// Give up on a connection attempt after this long.
    pub connect_timeout_ms: u64,
    /// End simulated sessions after this long (exercises the reconnect loop).
    pub simulated_lifetime_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Tcp,
            connect_timeout_ms: 30_000,
            simulated_lifetime_ms: None,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `afkbot=debug`.
    pub level: String,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Returns the default config file path: `<config dir>/afkbot/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/afkbot-config"))
            .join("afkbot")
            .join("config.toml")
    }

    /// Check the values a running bot depends on.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        if connection.host.trim().is_empty() {
            return Err(invalid("connection.host", "must not be empty"));
        }
        if connection.port == 0 {
            return Err(invalid("connection.port", "must be between 1 and 65535"));
        }
        if connection.username.trim().is_empty() {
            return Err(invalid("connection.username", "must not be empty"));
        }

        let behavior = &self.behavior;
        let intervals = [
            ("behavior.head_rotate_interval_ms", behavior.head_rotate_interval_ms),
            ("behavior.micro_move_interval_ms", behavior.micro_move_interval_ms),
            ("behavior.micro_move_duration_ms", behavior.micro_move_duration_ms),
            ("behavior.arm_swing_interval_ms", behavior.arm_swing_interval_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if !behavior.head_rotate_amount_deg.is_finite() {
            return Err(invalid("behavior.head_rotate_amount_deg", "must be finite"));
        }
        if behavior.chat_ping_enabled {
            if behavior.chat_ping_interval_ms == 0 {
                return Err(invalid(
                    "behavior.chat_ping_interval_ms",
                    "must be greater than zero when chat pings are enabled",
                ));
            }
            if behavior.chat_ping_message.trim().is_empty() {
                return Err(invalid(
                    "behavior.chat_ping_message",
                    "must not be empty when chat pings are enabled",
                ));
            }
        }

        if self.reconnect.delay_ms == 0 {
            return Err(invalid("reconnect.delay_ms", "must be greater than zero"));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(invalid("session.connect_timeout_ms", "must be greater than zero"));
        }
        if self.session.simulated_lifetime_ms == Some(0) {
            return Err(invalid("session.simulated_lifetime_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> BotError {
    BotError::Config(format!("{field} {reason}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.connection.auth, AuthMode::Offline);
        assert!(!config.behavior.chat_ping_enabled);
        assert_eq!(config.reconnect.delay(), Duration::from_secs(10));
        assert_eq!(config.session.backend, SessionBackend::Tcp);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BotConfig::default();
        config.connection.host = "play.example.net".to_owned();
        config.connection.port = 6135;
        config.behavior.chat_ping_enabled = true;
        config.session.backend = SessionBackend::Simulated;
        config.save_to_file(&path).unwrap();

        let loaded = BotConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
            [connection]
            host = "mc.local"

            [behavior]
            head_rotate_amount_deg = 12.5
        "#;
        let config = BotConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.connection.host, "mc.local");
        assert_eq!(config.connection.port, 25565);
        assert!((config.behavior.head_rotate_amount_deg - 12.5).abs() < f32::EPSILON);
        assert_eq!(config.behavior.micro_move_duration_ms, 1_200);
    }

    #[test]
    fn auth_mode_accepts_provider_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            auth: AuthMode,
        }
        let a: Wrapper = toml::from_str(r#"auth = "provider-a""#).unwrap();
        let b: Wrapper = toml::from_str(r#"auth = "microsoft""#).unwrap();
        assert_eq!(a.auth, AuthMode::Mojang);
        assert_eq!(b.auth, AuthMode::Microsoft);
    }

    #[test]
    fn out_of_range_port_is_a_parse_error() {
        let err = BotConfig::from_toml_str("[connection]\nport = 70000\n").unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }

    #[test]
    fn validation_rejects_zero_port_and_empty_username() {
        let mut config = BotConfig::default();
        config.connection.port = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("connection.port"), "{err}");

        let mut config = BotConfig::default();
        config.connection.username = "  ".to_owned();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("connection.username"), "{err}");
    }

    #[test]
    fn validation_rejects_zero_intervals() {
        let mut config = BotConfig::default();
        config.behavior.arm_swing_interval_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("arm_swing_interval_ms"), "{err}");
    }

    #[test]
    fn validation_rejects_zero_reconnect_delay() {
        let mut config = BotConfig::default();
        config.reconnect.delay_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("reconnect.delay_ms"), "{err}");
    }

    #[test]
    fn chat_ping_interval_only_checked_when_enabled() {
        let mut config = BotConfig::default();
        config.behavior.chat_ping_interval_ms = 0;
        config.validate().unwrap();

        config.behavior.chat_ping_enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn head_rotate_amount_converts_to_radians() {
        let behavior = BehaviorConfig {
            head_rotate_amount_deg: 180.0,
            ..Default::default()
        };
        assert!((behavior.head_rotate_amount_rad() - std::f32::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn debug_output_redacts_password() {
        let connection = ConnectionConfig {
            password: Some("hunter2".to_owned()),
            ..Default::default()
        };
        let rendered = format!("{connection:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
