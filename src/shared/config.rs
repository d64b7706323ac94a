use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

const DEFAULT_MORPH_URL: &str = "https://api.morphllm.com/v1";
const DEFAULT_MORPH_MODEL: &str = "morph-v3-large";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SpaceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub packages: PackageConfig,
    #[serde(default)]
    pub morph: MorphConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

/// Settings for the local sandbox provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_root")]
    pub root_dir: PathBuf,
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default = "default_dev_server_command")]
    pub dev_server_command: String,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Timings for the install/restart protocol, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_stop_command")]
    pub dev_server_stop_command: String,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
    #[serde(default = "default_event_send_timeout_ms")]
    pub event_send_timeout_ms: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MorphConfig {
    #[serde(default = "default_morph_url")]
    pub api_url: String,
    #[serde(default = "default_morph_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_morph_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl SpaceConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: SpaceConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;

        config.server.host = config.server.host.trim().to_string();
        if config.server.host.is_empty() {
            config.server.host = default_host();
        }

        config.morph.api_url = config.morph.api_url.trim().trim_end_matches('/').to_string();
        if config.morph.api_url.is_empty() {
            config.morph.api_url = default_morph_url();
        }
        config.morph.api_key = config
            .morph
            .api_key
            .take()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit`, else `SPACE_CONFIG_PATH`, else the default
    /// location. A missing file yields the built-in defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<(Self, PathBuf)> {
        let path = explicit.unwrap_or_else(resolve_config_path);
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, path))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SPACE_HOST").filter(|v| !v.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = lookup("SPACE_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(root) = lookup("SPACE_SANDBOX_ROOT").filter(|v| !v.trim().is_empty()) {
            self.sandbox.root_dir = expand_path(root.trim().to_string());
        }
        if let Some(key) = lookup("MORPH_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.morph.api_key = Some(key.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.morph.api_url)
            .map_err(|e| anyhow!("Invalid morph.api_url '{}': {}", self.morph.api_url, e))?;
        if self.packages.event_buffer == 0 {
            return Err(anyhow!("packages.event_buffer must be at least 1"));
        }
        if self.sandbox.install_command.trim().is_empty() {
            return Err(anyhow!("sandbox.install_command must not be empty"));
        }
        Ok(())
    }
}

impl PackageConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn event_send_timeout(&self) -> Duration {
        Duration::from_millis(self.event_send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            pid_file: default_pid_file(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_dir: default_sandbox_root(),
            install_command: default_install_command(),
            dev_server_command: default_dev_server_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            dev_server_stop_command: default_stop_command(),
            stop_grace_ms: default_stop_grace_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            event_send_timeout_ms: default_event_send_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for MorphConfig {
    fn default() -> Self {
        Self {
            api_url: default_morph_url(),
            model: default_morph_model(),
            api_key: None,
            timeout_secs: default_morph_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            service_name: default_service_name(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9300
}

fn default_pid_file() -> String {
    "/tmp/spaceapply.pid".to_string()
}

fn default_sandbox_root() -> PathBuf {
    std::env::temp_dir().join("spaceapply").join("sandboxes")
}

fn default_install_command() -> String {
    "npm install --legacy-peer-deps".to_string()
}

fn default_dev_server_command() -> String {
    "npm run dev -- --host 0.0.0.0".to_string()
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_stop_command() -> String {
    "pkill -f vite".to_string()
}

fn default_stop_grace_ms() -> u64 {
    1_000
}

fn default_restart_settle_ms() -> u64 {
    3_000
}

fn default_event_send_timeout_ms() -> u64 {
    5_000
}

fn default_event_buffer() -> usize {
    64
}

fn default_morph_url() -> String {
    DEFAULT_MORPH_URL.to_string()
}

fn default_morph_model() -> String {
    DEFAULT_MORPH_MODEL.to_string()
}

fn default_morph_timeout_secs() -> u64 {
    120
}

fn default_log_dir() -> String {
    "/tmp/spaceapply/logs".to_string()
}

fn default_service_name() -> String {
    "spaceapply_api".to_string()
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SPACE_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".spaceapply")
        .join("config.json")
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_object_yields_defaults() {
        let file = write_config("{}");
        let config = SpaceConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.port, 9300);
        assert_eq!(config.packages.dev_server_stop_command, "pkill -f vite");
        assert_eq!(config.packages.restart_settle(), Duration::from_secs(3));
        assert_eq!(config.morph.api_url, DEFAULT_MORPH_URL);
        assert!(config.morph.api_key.is_none());
    }

    #[test]
    fn test_partial_sections_and_trimming() {
        let file = write_config(
            r#"{
                "server": { "host": "  127.0.0.1 ", "port": 8080 },
                "packages": { "restart_settle_ms": 0 },
                "morph": { "api_url": "https://morph.internal/v1/", "api_key": "  " }
            }"#,
        );
        let config = SpaceConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.packages.restart_settle_ms, 0);
        assert_eq!(config.packages.stop_grace_ms, 1_000);
        assert_eq!(config.morph.api_url, "https://morph.internal/v1");
        assert!(config.morph.api_key.is_none());
    }

    #[test]
    fn test_invalid_morph_url_rejected() {
        let file = write_config(r#"{ "morph": { "api_url": "not a url" } }"#);
        let err = SpaceConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("morph.api_url"));
    }

    #[test]
    fn test_malformed_json_reports_path() {
        let file = write_config("{ nope");
        let err = SpaceConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SPACE_HOST", "10.0.0.5"),
            ("SPACE_PORT", "7000"),
            ("SPACE_SANDBOX_ROOT", "/srv/sandboxes"),
            ("MORPH_API_KEY", " sk-morph "),
        ]
        .into_iter()
        .collect();

        let mut config = SpaceConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.sandbox.root_dir, PathBuf::from("/srv/sandboxes"));
        assert_eq!(config.morph.api_key.as_deref(), Some("sk-morph"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = SpaceConfig::load(Some(dir.path().join("absent.json"))).unwrap();
        assert_eq!(path, dir.path().join("absent.json"));
        assert_eq!(config.packages.event_buffer, 64);
    }

    #[test]
    fn test_unparseable_port_ignored() {
        let mut config = SpaceConfig::default();
        config.apply_env_overrides(|key| (key == "SPACE_PORT").then(|| "http".to_string()));
        assert_eq!(config.server.port, 9300);
    }
}
