// ChatPay — Chat-driven USDC transfers in Rust
// License: Apache-2.0

use crate::conversation::engine::ConversationSettings;
use crate::conversation::validate::{AmountBounds, MinorUnits};
use crate::workflow::FieldContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub transfers: TransfersConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            channels: ChannelsConfig::default(),
            conversation: ConversationConfig::default(),
            transfers: TransfersConfig::default(),
            gateway: GatewayConfig::default(),
            workspace: default_workspace(),
        }
    }
}

fn default_workspace() -> String {
    "~/.chatpay/workspace".to_string()
}

// ---------------------------------------------------------------------------
// Remote API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Platform key; only the OTP endpoints use it.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://income-api.copperx.io/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_cancel_keyword")]
    pub cancel_keyword: String,
    #[serde(default = "default_confirm_keyword")]
    pub confirm_keyword: String,
    #[serde(default = "default_skip_keyword")]
    pub skip_keyword: String,
    /// Idle limit per prompt. Unset means prompts wait until revoked.
    #[serde(default)]
    pub prompt_timeout_secs: Option<u64>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            cancel_keyword: default_cancel_keyword(),
            confirm_keyword: default_confirm_keyword(),
            skip_keyword: default_skip_keyword(),
            prompt_timeout_secs: None,
        }
    }
}

fn default_cancel_keyword() -> String {
    "cancel".to_string()
}
fn default_confirm_keyword() -> String {
    "yes".to_string()
}
fn default_skip_keyword() -> String {
    "skip".to_string()
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransfersConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Inclusive bounds in major units.
    #[serde(default = "default_min_amount")]
    pub min_amount: u64,
    #[serde(default = "default_max_amount")]
    pub max_amount: u64,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
    #[serde(default)]
    pub offramp: OfframpConfig,
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            history_page_size: default_history_page_size(),
            offramp: OfframpConfig::default(),
        }
    }
}

impl TransfersConfig {
    pub fn amount_bounds(&self) -> AmountBounds {
        AmountBounds {
            min: MinorUnits::from_major(self.min_amount),
            max: MinorUnits::from_major(self.max_amount),
        }
    }
}

fn default_currency() -> String {
    "USDC".to_string()
}
fn default_min_amount() -> u64 {
    100
}
fn default_max_amount() -> u64 {
    5_000_000
}
fn default_history_page_size() -> u32 {
    10
}

/// Fixed corridor used for bank withdrawal quotes and submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfframpConfig {
    #[serde(default = "default_country")]
    pub source_country: String,
    #[serde(default = "default_country")]
    pub destination_country: String,
    #[serde(default = "default_destination_currency")]
    pub destination_currency: String,
    #[serde(default = "default_source_of_funds")]
    pub source_of_funds: String,
    #[serde(default = "default_recipient_relationship")]
    pub recipient_relationship: String,
}

impl Default for OfframpConfig {
    fn default() -> Self {
        Self {
            source_country: default_country(),
            destination_country: default_country(),
            destination_currency: default_destination_currency(),
            source_of_funds: default_source_of_funds(),
            recipient_relationship: default_recipient_relationship(),
        }
    }
}

fn default_country() -> String {
    "usa".to_string()
}
fn default_destination_currency() -> String {
    "USD".to_string()
}
fn default_source_of_funds() -> String {
    "salary".to_string()
}
fn default_recipient_relationship() -> String {
    "self".to_string()
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Commands allowed per sender within the window; 0 disables limiting.
    #[serde(default)]
    pub rate_limit_requests: usize,
    #[serde(default = "default_rate_limit_seconds")]
    pub rate_limit_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 0,
            rate_limit_seconds: default_rate_limit_seconds(),
        }
    }
}

fn default_rate_limit_seconds() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (prefix: CHATPAY_)
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHATPAY_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("CHATPAY_API_KEY") {
            self.api.api_key = v;
        }
        if let Ok(v) = std::env::var("CHATPAY_CHANNELS_TELEGRAM_TOKEN") {
            self.channels.telegram.token = v;
        }
        if let Ok(v) = std::env::var("CHATPAY_CHANNELS_TELEGRAM_ENABLED") {
            self.channels.telegram.enabled = v.parse().unwrap_or(false);
        }
        if let Ok(v) = std::env::var("CHATPAY_CONVERSATION_PROMPT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.conversation.prompt_timeout_secs = Some(n);
            }
        }
        if let Ok(v) = std::env::var("CHATPAY_WORKSPACE") {
            self.workspace = v;
        }
    }

    /// Resolve the workspace path, expanding `~` to home directory.
    pub fn workspace_path(&self) -> Result<PathBuf, ConfigError> {
        let ws = &self.workspace;
        if let Some(stripped) = ws.strip_prefix('~') {
            let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
            Ok(home.join(ws.strip_prefix("~/").unwrap_or(stripped)))
        } else {
            Ok(PathBuf::from(ws))
        }
    }

    /// Get the default config file path: ~/.chatpay/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".chatpay").join("config.json"))
    }

    /// Prompt keywords, timeout and amount bounds for the form engine.
    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            cancel_keyword: self.conversation.cancel_keyword.clone(),
            confirm_keyword: self.conversation.confirm_keyword.clone(),
            prompt_timeout: self.conversation.prompt_timeout_secs.map(Duration::from_secs),
            fields: FieldContext {
                bounds: self.transfers.amount_bounds(),
                skip_keyword: self.conversation.skip_keyword.clone(),
            },
        }
    }

    /// Validate configuration for basic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
        }

        if self.transfers.min_amount > self.transfers.max_amount {
            return Err(ConfigError::Invalid(format!(
                "transfers.min_amount ({}) exceeds transfers.max_amount ({})",
                self.transfers.min_amount, self.transfers.max_amount
            )));
        }

        if MinorUnits::checked_from_major(self.transfers.max_amount).is_none() {
            return Err(ConfigError::Invalid(format!(
                "transfers.max_amount ({}) is too large",
                self.transfers.max_amount
            )));
        }

        let keywords = [
            ("cancel_keyword", &self.conversation.cancel_keyword),
            ("confirm_keyword", &self.conversation.confirm_keyword),
            ("skip_keyword", &self.conversation.skip_keyword),
        ];
        for (name, value) in keywords {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "conversation.{} must not be empty",
                    name
                )));
            }
        }
        for (i, (name, value)) in keywords.iter().enumerate() {
            if let Some((other, _)) = keywords[i + 1..]
                .iter()
                .find(|(_, v)| v.trim().eq_ignore_ascii_case(value.trim()))
            {
                return Err(ConfigError::Invalid(format!(
                    "conversation.{} and conversation.{} must differ",
                    name, other
                )));
            }
        }

        if self.channels.telegram.enabled && self.channels.telegram.token.is_empty() {
            tracing::warn!("Telegram channel is enabled but token is missing");
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
