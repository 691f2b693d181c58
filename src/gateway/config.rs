use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ActionKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Balance granted to newly provisioned accounts.
    #[serde(default = "default_starting_balance")]
    pub starting_balance: u64,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,
    /// Reservations older than this are candidates for the sweep.
    #[serde(default = "default_staleness_threshold_seconds")]
    pub staleness_threshold_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub refund_retry: RefundRetryConfig,
    /// Full pricing registry. Empty means the default platform table; a
    /// non-empty table registers exactly the listed kinds.
    #[serde(default)]
    pub pricing: BTreeMap<ActionKind, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            ledger_path: default_ledger_path(),
            provider_timeout_seconds: default_provider_timeout_seconds(),
            staleness_threshold_seconds: default_staleness_threshold_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            refund_retry: RefundRetryConfig::default(),
            pricing: BTreeMap::new(),
            provider: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RefundRetryConfig {
    #[serde(default = "default_refund_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_refund_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RefundRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_refund_max_attempts(),
            base_delay_ms: default_refund_base_delay_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: String::new(),
            text_model: default_text_model(),
            image_model: default_image_model(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("toml error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

fn default_starting_balance() -> u64 {
    10
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("creditgate.sqlite")
}

fn default_provider_timeout_seconds() -> u64 {
    300
}

fn default_staleness_threshold_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_refund_max_attempts() -> u32 {
    5
}

fn default_refund_base_delay_ms() -> u64 {
    100
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_text_model() -> String {
    "gpt-4o".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}
