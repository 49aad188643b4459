// ChatPay — HTTP client for the remote financial API

use super::*;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// JSON-over-HTTP implementation of [`TransferApi`].
///
/// Every call carries a bearer credential; failures never retry, so a
/// submission reaches the server at most once per call.
pub struct HttpTransferApi {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HttpTransferApi {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub fn from_config(cfg: &crate::config::ApiConfig) -> Result<Self, ApiError> {
        Self::new(
            &cfg.base_url,
            &cfg.api_key,
            Duration::from_secs(cfg.timeout_secs),
            Duration::from_secs(cfg.connect_timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "Sending API request");
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Content-Type", "application/json")
    }

    async fn post<B, R>(&self, path: &str, bearer: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, path, bearer)
            .json(body)
            .send()
            .await?;
        decode(path, response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, bearer: &str) -> Result<R, ApiError> {
        let response = self.request(Method::GET, path, bearer).send().await?;
        decode(path, response).await
    }

    /// POST where any 2xx means the server accepted the request, whatever
    /// the body looks like.
    async fn post_accepted<B, R>(&self, path: &str, bearer: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let response = self
            .request(Method::POST, path, bearer)
            .json(body)
            .send()
            .await?;
        match decode(path, response).await {
            Err(ApiError::Decode(detail)) => {
                tracing::warn!(path = %path, "Accepted with an unreadable body: {}", detail);
                Ok(R::default())
            }
            other => other,
        }
    }
}

async fn decode<R: DeserializeOwned>(path: &str, response: Response) -> Result<R, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    tracing::debug!(path = %path, status = %status, body_len = body.len(), "API response received");

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    // Some endpoints answer 2xx with an empty body.
    let body = if body.trim().is_empty() { "{}" } else { &body };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(format!("{}: {}", path, e)))
}

/// Extract the server's `error` or `message` field from an error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"].iter().find_map(|key| match value.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|i| i.as_str()).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        serde_json::Value::Object(inner) => inner
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from),
        _ => None,
    })
}

#[async_trait]
impl TransferApi for HttpTransferApi {
    async fn submit(
        &self,
        credential: &Credential,
        endpoint: &str,
        submission: &Submission,
    ) -> Result<TransferReceipt, ApiError> {
        self.post_accepted(endpoint, credential.expose(), submission)
            .await
    }

    async fn offramp_quote(
        &self,
        credential: &Credential,
        request: &QuoteRequest,
    ) -> Result<Quote, ApiError> {
        let quote: Quote = self
            .post(endpoints::OFFRAMP_QUOTE, credential.expose(), request)
            .await?;
        if let Some(error) = quote.error.as_ref().filter(|e| !e.is_empty()) {
            return Err(ApiError::Rejected(error.clone()));
        }
        if quote.quote_payload.is_empty() || quote.quote_signature.is_empty() {
            return Err(ApiError::Decode("quote is missing its payload or signature".into()));
        }
        Ok(quote)
    }

    async fn list_transfers(
        &self,
        credential: &Credential,
        page: u32,
        limit: u32,
    ) -> Result<TransferPage, ApiError> {
        let path = format!("{}?page={}&limit={}", endpoints::TRANSFERS, page, limit);
        self.get(&path, credential.expose()).await
    }

    async fn wallets(&self, credential: &Credential) -> Result<Vec<Wallet>, ApiError> {
        self.get(endpoints::WALLETS, credential.expose()).await
    }

    async fn wallet_balances(
        &self,
        credential: &Credential,
    ) -> Result<Vec<WalletBalance>, ApiError> {
        self.get(endpoints::WALLET_BALANCES, credential.expose())
            .await
    }

    async fn profile(&self, credential: &Credential) -> Result<Profile, ApiError> {
        self.get(endpoints::PROFILE, credential.expose()).await
    }

    async fn kyc_records(&self, credential: &Credential) -> Result<KycPage, ApiError> {
        self.get(endpoints::KYCS, credential.expose()).await
    }

    async fn request_email_otp(&self, email: &str) -> Result<OtpChallenge, ApiError> {
        self.post(endpoints::OTP_REQUEST, &self.api_key, &json!({ "email": email }))
            .await
    }

    async fn authenticate_email_otp(
        &self,
        email: &str,
        otp: &str,
        sid: &str,
    ) -> Result<AuthGrant, ApiError> {
        self.post(
            endpoints::OTP_AUTHENTICATE,
            &self.api_key,
            &json!({ "email": email, "otp": otp, "sid": sid }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_error_field() {
        assert_eq!(
            error_message(r#"{"error": "Insufficient balance", "message": "other"}"#),
            Some("Insufficient balance".into())
        );
        assert_eq!(
            error_message(r#"{"message": "Invalid purpose code"}"#),
            Some("Invalid purpose code".into())
        );
    }

    #[test]
    fn test_error_message_joins_arrays() {
        assert_eq!(
            error_message(r#"{"message": ["amount too low", "email invalid"]}"#),
            Some("amount too low; email invalid".into())
        );
    }

    #[test]
    fn test_error_message_missing() {
        assert_eq!(error_message("<html>bad gateway</html>"), None);
        assert_eq!(error_message(r#"{"statusCode": 500}"#), None);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpTransferApi::new(
            "http://localhost:9/api/",
            "",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(api.base_url, "http://localhost:9/api");
    }
}
