//! Bundle delivery providers.
//!
//! A provider accepts a data-bundle order for one recipient and delivers it,
//! synchronously or later. The transaction reference doubles as the provider's
//! idempotency key, so a resubmission of the same reference never delivers twice
//! on the provider side.
//!
//! # Signed requests
//!
//! Every request carries:
//! - `X-Api-Key: <key>`
//! - `X-Timestamp: <unix seconds>`
//! - `X-Signature: hex(HMAC-SHA256(secret, "{timestamp}.{METHOD}.{path}.{body}"))`

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::bundle::Network;

type HmacSha256 = Hmac<Sha256>;

/// What the dispatcher hands to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOrder {
    pub reference: String,
    pub network: Network,
    pub recipient: String,
    pub capacity_mb: i32,
}

/// Classified result of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The bundle has been credited.
    Delivered { provider_reference: Option<String> },
    /// Accepted for asynchronous delivery; poll `status` later.
    Accepted { provider_reference: Option<String> },
    /// Permanently refused (bad number, unknown bundle, ...). Do not retry.
    Rejected { http_status: Option<u16>, reason: String },
    /// The provider certainly did not take the order (connect failure, 429, 503).
    Transient { http_status: Option<u16>, reason: String },
    /// The order may or may not have been taken (timeout, other 5xx).
    Ambiguous { http_status: Option<u16>, reason: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Accepted { .. } => "accepted",
            DispatchOutcome::Rejected { .. } => "rejected",
            DispatchOutcome::Transient { .. } => "transient",
            DispatchOutcome::Ambiguous { .. } => "ambiguous",
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            DispatchOutcome::Rejected { http_status, .. }
            | DispatchOutcome::Transient { http_status, .. }
            | DispatchOutcome::Ambiguous { http_status, .. } => *http_status,
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Rejected { reason, .. }
            | DispatchOutcome::Transient { reason, .. }
            | DispatchOutcome::Ambiguous { reason, .. } => Some(reason),
            DispatchOutcome::Delivered { provider_reference }
            | DispatchOutcome::Accepted { provider_reference } => provider_reference.as_deref(),
        }
    }
}

/// Provider-side state of an order, used by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Processing,
    Delivered,
    Failed(String),
    /// The provider has no order with this reference.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected response ({status}): {body}")]
    Unexpected { status: u16, body: String },

    #[error("no provider configured for {0}")]
    Unsupported(Network),
}

#[async_trait]
pub trait BundleProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit an order. Never returns an error: failures are classified instead.
    async fn submit(&self, order: &DispatchOrder) -> DispatchOutcome;

    /// Look up an order by our reference.
    async fn status(&self, reference: &str) -> Result<ProviderStatus, ProviderError>;
}

/// Provider per network.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Network, Arc<dyn BundleProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, network: Network, provider: Arc<dyn BundleProvider>) {
        self.providers.insert(network, provider);
    }

    /// Route every network to the same provider.
    pub fn single(provider: Arc<dyn BundleProvider>) -> Self {
        let mut registry = Self::new();
        for network in Network::ALL {
            registry.register(*network, provider.clone());
        }
        registry
    }

    pub fn get(&self, network: Network) -> Result<Arc<dyn BundleProvider>, ProviderError> {
        self.providers
            .get(&network)
            .cloned()
            .ok_or(ProviderError::Unsupported(network))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (network, provider) in &self.providers {
            map.entry(network, &provider.name());
        }
        map.finish()
    }
}

#[derive(Debug, Deserialize)]
struct ProviderReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    provider_reference: Option<String>,
}

/// REST provider speaking the signed JSON protocol described in the module docs.
#[derive(Debug, Clone)]
pub struct HttpBundleProvider {
    name: String,
    http: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    api_secret: String,
}

impl HttpBundleProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: &str,
        api_secret: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            http,
            base_url: url::Url::parse(&base)?,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    fn signed(
        &self,
        method: reqwest::Method,
        url: url::Url,
        body: &str,
    ) -> reqwest::RequestBuilder {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_request(&self.api_secret, &timestamp, method.as_str(), url.path(), body);

        self.http
            .request(method, url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Timestamp", timestamp)
            .header("X-Signature", signature)
    }
}

#[async_trait]
impl BundleProvider for HttpBundleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, order: &DispatchOrder) -> DispatchOutcome {
        let url = match self.base_url.join("orders") {
            Ok(url) => url,
            Err(e) => {
                return DispatchOutcome::Transient {
                    http_status: None,
                    reason: format!("invalid provider url: {e}"),
                };
            }
        };
        let body = match serde_json::to_string(order) {
            Ok(body) => body,
            Err(e) => {
                return DispatchOutcome::Rejected {
                    http_status: None,
                    reason: format!("unserializable order: {e}"),
                };
            }
        };

        let result = self
            .signed(reqwest::Method::POST, url, &body)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return classify_send_error(&e),
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return DispatchOutcome::Ambiguous {
                    http_status: Some(status),
                    reason: format!("failed to read response: {e}"),
                };
            }
        };

        classify_reply(status, &text)
    }

    async fn status(&self, reference: &str) -> Result<ProviderStatus, ProviderError> {
        let url = self.base_url.join(&format!("orders/{reference}"))?;
        let response = self.signed(reqwest::Method::GET, url, "").send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if status == 404 {
            return Ok(ProviderStatus::NotFound);
        }

        let reply: ProviderReply = match serde_json::from_str(&text) {
            Ok(reply) if (200..300).contains(&status) => reply,
            _ => return Err(ProviderError::Unexpected { status, body: text }),
        };

        Ok(match reply.status.as_str() {
            "delivered" | "success" | "completed" => ProviderStatus::Delivered,
            "failed" | "rejected" | "cancelled" => ProviderStatus::Failed(
                reply.message.unwrap_or_else(|| "provider reported failure".to_string()),
            ),
            _ => ProviderStatus::Processing,
        })
    }
}

/// `hex(HMAC-SHA256(secret, "{timestamp}.{METHOD}.{path}.{body}"))`
pub fn sign_request(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{timestamp}.{method}.{path}.{body}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Failures before a response arrives.
///
/// A connect error means the request never reached the provider; anything
/// else (timeouts in particular) may have been processed.
fn classify_send_error(err: &reqwest::Error) -> DispatchOutcome {
    if err.is_connect() {
        DispatchOutcome::Transient {
            http_status: None,
            reason: format!("connection failed: {err}"),
        }
    } else {
        DispatchOutcome::Ambiguous {
            http_status: None,
            reason: format!("request failed: {err}"),
        }
    }
}

/// Map an HTTP reply to an outcome.
pub fn classify_reply(status: u16, body: &str) -> DispatchOutcome {
    let reply = serde_json::from_str::<ProviderReply>(body).ok();
    let message = reply
        .as_ref()
        .and_then(|r| r.message.clone())
        .unwrap_or_else(|| truncate(body, 200));

    match status {
        200..=299 => match reply {
            Some(reply) => match reply.status.as_str() {
                "delivered" | "success" | "completed" => DispatchOutcome::Delivered {
                    provider_reference: reply.provider_reference,
                },
                "accepted" | "processing" | "pending" | "queued" => DispatchOutcome::Accepted {
                    provider_reference: reply.provider_reference,
                },
                "failed" | "rejected" => DispatchOutcome::Rejected {
                    http_status: Some(status),
                    reason: message,
                },
                other => DispatchOutcome::Ambiguous {
                    http_status: Some(status),
                    reason: format!("unknown provider status '{other}'"),
                },
            },
            None => DispatchOutcome::Ambiguous {
                http_status: Some(status),
                reason: format!("unreadable provider reply: {message}"),
            },
        },
        // Duplicate reference: the provider already has this order
        409 => DispatchOutcome::Accepted {
            provider_reference: reply.and_then(|r| r.provider_reference),
        },
        429 | 503 => DispatchOutcome::Transient {
            http_status: Some(status),
            reason: message,
        },
        400..=499 => DispatchOutcome::Rejected {
            http_status: Some(status),
            reason: message,
        },
        _ => DispatchOutcome::Ambiguous {
            http_status: Some(status),
            reason: message,
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
