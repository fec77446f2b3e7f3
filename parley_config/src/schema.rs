use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use parley_session::SessionConfig;

pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "ServiceConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            api_key: String::new(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    const fn default_timeout_secs() -> u64 {
        60
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'parley init' to create config.",
                config_path.display()
            );
        }

        let content = std::fs::read_to_string(&config_path)?;
        debug!("Loaded config from {}", config_path.display());
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        if config.service.endpoint.trim().is_empty() {
            anyhow::bail!("service.endpoint must not be empty");
        }
        Ok(config)
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("parley"))
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    /// Build the explicit session configuration, dropping a blank token.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            identity_token: self
                .identity
                .token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            service_endpoint: self.service.endpoint.clone(),
        }
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        let config_template = r#"{
  "service": {
    "endpoint": "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
    "api_key": "your-api-key-here",
    "timeout_secs": 60
  },
  "identity": {
    "token": null
  }
}"#;

        std::fs::write(&config_path, config_template)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your API key");
        println!("   2. Run 'parley chat' to start a conversation");
        println!();
        println!("🔧 Configuration options:");
        println!("   - service.endpoint: generateContent URL of the model to talk to");
        println!("   - service.timeout_secs: how long to wait for a reply");
        println!("   - identity.token: opaque sign-in token shown as your identity");
        println!();
        Ok(())
    }
}
