//! Paystack API client and webhook signature verification.
//!
//! Endpoints used:
//! - `POST /transaction/initialize` – start a checkout, returns the hosted payment URL
//! - `GET  /transaction/verify/{reference}` – authoritative payment status
//! - `POST /refund` – refund a successful charge
//!
//! Amounts are in pesewas, the currency is always GHS.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha512;

use crate::error::AppError;

type HmacSha512 = Hmac<Sha512>;

pub const CURRENCY: &str = "GHS";

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, thiserror::Error)]
pub enum PaystackError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),

    /// Paystack answered with `status: false` or a non-2xx code.
    #[error("paystack rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
}

impl From<PaystackError> for AppError {
    fn from(err: PaystackError) -> Self {
        AppError::Upstream(format!("paystack: {err}"))
    }
}

/// Envelope of every Paystack response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub reference: String,
}

/// Charge status as reported by `transaction/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    Reversed,
    Pending,
    Ongoing,
    Processing,
    Queued,
    #[serde(other)]
    Unknown,
}

impl ChargeStatus {
    /// The charge will not succeed anymore.
    pub fn is_final_failure(&self) -> bool {
        matches!(
            self,
            ChargeStatus::Failed | ChargeStatus::Reversed
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedPayment {
    pub status: ChargeStatus,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    transaction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

/// Webhook event body, e.g. `{"event": "charge.success", "data": {...}}`.
///
/// Only the reference is trusted; amounts come from `verify`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub reference: Option<String>,
}

/// Thin async client over the Paystack REST API.
#[derive(Debug, Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    base_url: url::Url,
    secret_key: String,
    callback_url: Option<String>,
}

impl PaystackClient {
    pub fn new(
        base_url: &str,
        secret_key: &str,
        callback_url: Option<String>,
    ) -> Result<Self, PaystackError> {
        // Trailing slash so that `join` appends instead of replacing the last segment
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: url::Url::parse(&base)?,
            secret_key: secret_key.to_string(),
            callback_url,
        })
    }

    /// Start a hosted checkout for `amount` pesewas.
    pub async fn initialize(
        &self,
        email: &str,
        amount: i64,
        reference: &str,
        metadata: serde_json::Value,
    ) -> Result<InitializedPayment, PaystackError> {
        let body = InitializeBody {
            email,
            amount,
            reference,
            currency: CURRENCY,
            callback_url: self.callback_url.as_deref(),
            metadata,
        };

        let response = self
            .http
            .post(self.base_url.join("transaction/initialize")?)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        let payment: InitializedPayment = Self::unwrap_envelope(response).await?;
        Self::check_reference(reference, &payment.reference)?;
        Ok(payment)
    }

    /// Ask Paystack for the authoritative status of `reference`.
    pub async fn verify(&self, reference: &str) -> Result<VerifiedPayment, PaystackError> {
        let path = format!("transaction/verify/{}", urlencode(reference));
        let response = self
            .http
            .get(self.base_url.join(&path)?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let payment: VerifiedPayment = Self::unwrap_envelope(response).await?;
        Self::check_reference(reference, &payment.reference)?;
        Ok(payment)
    }

    /// Refund a charge in full (or `amount` pesewas of it).
    pub async fn refund(&self, reference: &str, amount: Option<i64>) -> Result<(), PaystackError> {
        let response = self
            .http
            .post(self.base_url.join("refund")?)
            .bearer_auth(&self.secret_key)
            .json(&RefundBody {
                transaction: reference,
                amount,
            })
            .send()
            .await?;

        Self::unwrap_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Check `x-paystack-signature`: hex HMAC-SHA512 of the raw body keyed with the secret key.
    pub fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_signature(&self.secret_key, body, signature)
    }

    fn check_reference(expected: &str, returned: &str) -> Result<(), PaystackError> {
        if expected == returned {
            return Ok(());
        }
        Err(PaystackError::Api {
            status: 200,
            message: format!("answered for reference {returned} instead of {expected}"),
        })
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PaystackError> {
        let status = response.status();
        let text = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Err(PaystackError::Api {
                    status: status.as_u16(),
                    message: format!("unreadable response: {e}"),
                });
            }
        };

        match (status.is_success() && envelope.status, envelope.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(PaystackError::Api {
                status: status.as_u16(),
                message: envelope.message,
            }),
        }
    }
}

/// Compute the signature Paystack sends for `body`.
#[cfg(test)]
pub(crate) fn sign(secret_key: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a hex signature against the expected HMAC.
pub fn verify_signature(secret_key: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha512::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Percent-encode a path segment. References are generated locally, so this only
/// guards against hand-typed values reaching the verify endpoint.
fn urlencode(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}
