// ChatPay — Remote financial API abstraction

pub mod http;

use crate::conversation::validate::MinorUnits;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Paths relative to the configured API base URL.
pub mod endpoints {
    pub const SEND: &str = "/transfers/send";
    pub const WALLET_WITHDRAW: &str = "/transfers/wallet-withdraw";
    pub const OFFRAMP: &str = "/transfers/offramp";
    pub const SEND_BATCH: &str = "/transfers/send-batch";
    pub const OFFRAMP_QUOTE: &str = "/transfers/api/quotes/offramp";
    pub const TRANSFERS: &str = "/transfers";
    pub const OTP_REQUEST: &str = "/auth/email-otp/request";
    pub const OTP_AUTHENTICATE: &str = "/auth/email-otp/authenticate";
    pub const PROFILE: &str = "/auth/me";
    pub const KYCS: &str = "/kycs";
    pub const WALLETS: &str = "/wallets";
    pub const WALLET_BALANCES: &str = "/wallets/balances";
    pub const WALLET_DEFAULT: &str = "/wallets/default";
    pub const PAYEES: &str = "/payees";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Status {
        status: u16,
        /// The server's `error`/`message` field, verbatim.
        message: Option<String>,
    },
    /// A 2xx response that carried the server's own error text.
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Message to show the user: the server's own words when it sent any,
    /// otherwise `fallback`. Transport and parse details stay in the logs.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status {
                message: Some(m), ..
            } => m.clone(),
            ApiError::Rejected(m) => m.clone(),
            _ => fallback.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Bearer access token. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// Transfer requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTransferRequest {
    pub currency: String,
    pub payee_id: String,
    pub email: String,
    pub amount: MinorUnits,
    pub purpose_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransferRequest {
    pub currency: String,
    pub wallet_address: String,
    pub amount: MinorUnits,
    pub purpose_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerData {
    pub name: String,
    pub business_name: String,
    pub email: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfframpRequest {
    pub invoice_number: String,
    pub purpose_code: String,
    pub source_of_funds: String,
    pub recipient_relationship: String,
    pub quote_payload: String,
    pub quote_signature: String,
    pub customer_data: CustomerData,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub payee_id: String,
    pub amount: MinorUnits,
    pub purpose_code: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub request_id: String,
    pub request: BatchItem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchTransferRequest {
    pub requests: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeRequest {
    pub email: String,
    pub nick_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultWalletRequest {
    pub wallet_id: String,
}

/// Request body of one confirmed submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Submission {
    Email(EmailTransferRequest),
    Wallet(WalletTransferRequest),
    Offramp(OfframpRequest),
    Batch(BatchTransferRequest),
    Payee(PayeeRequest),
    DefaultWallet(DefaultWalletRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub source_country: String,
    pub destination_country: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub destination_currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub arrival_time_message: String,
    #[serde(default)]
    pub quote_payload: String,
    #[serde(default)]
    pub quote_signature: String,
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferRecord {
    /// Number or string depending on the API version.
    #[serde(default)]
    pub amount: serde_json::Value,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

impl TransferRecord {
    pub fn amount_text(&self) -> String {
        match &self.amount {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "?".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferPage {
    #[serde(default)]
    pub data: Vec<TransferRecord>,
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// Display name of a chain id as the API reports it.
pub fn network_name(network: &str) -> &'static str {
    match network {
        "137" => "Polygon",
        "42161" => "Arbitrum",
        "8453" => "Base",
        "23434" => "Starknet",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Wallet {
    pub fn describe(&self) -> String {
        format!(
            "{} {}",
            network_name(&self.network),
            self.wallet_address.as_deref().unwrap_or("(no address)")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    #[serde(default)]
    pub symbol: String,
    /// Integer string in the token's smallest unit.
    #[serde(default)]
    pub balance: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    6
}

impl TokenBalance {
    /// Balance in whole tokens without trailing zeros. Unparseable values
    /// are shown as sent.
    pub fn display_amount(&self) -> String {
        self.balance
            .trim()
            .parse::<i128>()
            .ok()
            .and_then(|raw| {
                rust_decimal::Decimal::try_from_i128_with_scale(raw, self.decimals).ok()
            })
            .map(|d| d.normalize().to_string())
            .unwrap_or_else(|| self.balance.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    #[serde(default)]
    pub wallet_id: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub balances: Vec<TokenBalance>,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub relayer_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KycRecord {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub country: String,
}

impl KycRecord {
    pub fn is_approved(&self) -> bool {
        self.status.eq_ignore_ascii_case("approved")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KycPage {
    #[serde(default)]
    pub data: Vec<KycRecord>,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OtpChallenge {
    #[serde(default)]
    pub email: String,
    pub sid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    pub access_token: Credential,
    pub expire_at: DateTime<Utc>,
    pub user: AuthUser,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// The remote financial API, as far as chat workflows use it.
#[async_trait]
pub trait TransferApi: Send + Sync {
    /// Submit one confirmed draft. Called at most once per draft; any 2xx
    /// response counts as accepted.
    async fn submit(
        &self,
        credential: &Credential,
        endpoint: &str,
        submission: &Submission,
    ) -> Result<TransferReceipt, ApiError>;

    async fn offramp_quote(
        &self,
        credential: &Credential,
        request: &QuoteRequest,
    ) -> Result<Quote, ApiError>;

    async fn list_transfers(
        &self,
        credential: &Credential,
        page: u32,
        limit: u32,
    ) -> Result<TransferPage, ApiError>;

    async fn wallets(&self, credential: &Credential) -> Result<Vec<Wallet>, ApiError>;

    async fn wallet_balances(&self, credential: &Credential)
        -> Result<Vec<WalletBalance>, ApiError>;

    async fn profile(&self, credential: &Credential) -> Result<Profile, ApiError>;

    async fn kyc_records(&self, credential: &Credential) -> Result<KycPage, ApiError>;

    async fn request_email_otp(&self, email: &str) -> Result<OtpChallenge, ApiError>;

    async fn authenticate_email_otp(
        &self,
        email: &str,
        otp: &str,
        sid: &str,
    ) -> Result<AuthGrant, ApiError>;
}
