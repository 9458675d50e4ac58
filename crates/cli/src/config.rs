//! Runtime configuration file.
//!
//! Loaded from a TOML file; every section has working defaults so a missing
//! file still yields a runnable local setup.

use std::{path::Path, time::Duration};

use {anyhow::Context, serde::Deserialize};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub ai: AiConfig,
    /// Accounts whose sessions are created at startup.
    #[serde(default)]
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18790
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SidecarConfig {
    #[serde(default = "default_sidecar_port")]
    pub port: u16,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_sidecar_port() -> u16 {
    zapflow_transport::sidecar::DEFAULT_SIDECAR_PORT
}

fn default_connect_retries() -> u32 {
    10
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: default_sidecar_port(),
            connect_retries: default_connect_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "zapflow.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_reconnect_backoff() -> u64 {
    15
}

fn default_send_timeout() -> u64 {
    45
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: default_reconnect_backoff(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn to_manager_config(&self) -> zapflow_sessions::SessionManagerConfig {
        zapflow_sessions::SessionManagerConfig {
            reconnect_backoff: Duration::from_secs(self.reconnect_backoff_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    #[default]
    FailJob,
    SkipTick,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,
}

fn default_tick_interval() -> u64 {
    5
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            on_store_error: StoreErrorPolicy::default(),
        }
    }
}

impl BroadcastConfig {
    pub fn to_dispatcher_config(&self) -> zapflow_broadcast::DispatcherConfig {
        zapflow_broadcast::DispatcherConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            on_store_error: match self.on_store_error {
                StoreErrorPolicy::FailJob => zapflow_broadcast::StoreErrorPolicy::FailJob,
                StoreErrorPolicy::SkipTick => zapflow_broadcast::StoreErrorPolicy::SkipTick,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_key_env() -> String {
    "ZAPFLOW_AI_KEY".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key_env: default_ai_key_env(),
        }
    }
}

/// Load config from `path`; a missing file yields defaults.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(Path::new("/nonexistent/zapflow.toml")).unwrap();
        assert_eq!(cfg.server.port, 18790);
        assert_eq!(cfg.broadcast.tick_interval_secs, 5);
        assert!(cfg.accounts.is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "accounts = [\"loja\"]\n\n[broadcast]\ntick_interval_secs = 2\non_store_error = \"skip_tick\"\n"
        )
        .unwrap();
        let cfg = load(file.path()).unwrap();
        assert_eq!(cfg.accounts, vec!["loja".to_string()]);
        assert_eq!(cfg.broadcast.tick_interval_secs, 2);
        assert!(matches!(
            cfg.broadcast.on_store_error,
            StoreErrorPolicy::SkipTick
        ));
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nprot = 1").unwrap();
        assert!(load(file.path()).is_err());
    }
}
