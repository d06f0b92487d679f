use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// Environment variable overriding the store directory.
pub const STORE_ENV: &str = "STUDYDECK_STORE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Written into `meta.deviceName`. Defaults to the host name.
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_voice")]
    pub voice: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: default_chat_endpoint(),
            model: default_chat_model(),
            voice: default_chat_voice(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub user: UserConfig,
    pub resolved_output: String,
    pub store_dir: PathBuf,
    pub device_name: String,
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };
    load_config_from(&config_dir.join("studydeck/config.toml"))
}

/// Load a config file, treating a missing file as all defaults.
pub fn load_config_from(path: &Path) -> Result<UserConfig> {
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(cli_json: bool, cli_store: Option<&Path>) -> Result<EffectiveConfig> {
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.clone(), env_format);

    let env_store = env::var_os(STORE_ENV).map(PathBuf::from);
    let store_dir = resolve_store_dir(cli_store, env_store, user.store.path.clone())
        .context("Could not determine a data directory; pass --store")?;

    let device_name = user
        .export
        .device_name
        .clone()
        .unwrap_or_else(default_device_name);

    Ok(EffectiveConfig {
        user,
        resolved_output,
        store_dir,
        device_name,
    })
}

/// CLI flag, then environment, then config file, then the platform data dir.
#[must_use]
pub fn resolve_store_dir(
    cli: Option<&Path>,
    env_store: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Option<PathBuf> {
    cli.map(Path::to_path_buf)
        .or(env_store.filter(|p| !p.as_os_str().is_empty()))
        .or(configured)
        .or_else(|| dirs::data_dir().map(|dir| dir.join("studydeck")))
}

#[must_use]
pub fn resolve_output(
    cli_json: bool,
    user_output: Option<String>,
    env_format: Option<String>,
) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn default_device_name() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_default()
}

fn default_chat_endpoint() -> String {
    "https://api.studydeck.app/v1".to_string()
}

fn default_chat_model() -> String {
    "tutor-small".to_string()
}

fn default_chat_voice() -> String {
    "default".to_string()
}

fn default_api_key_env() -> String {
    "STUDYDECK_API_KEY".to_string()
}
