//! Contact resolution: best-effort email lookup for recipients that
//! arrived without one.
//!
//! The resolver is an external collaborator; the engine owns only this
//! narrow contract. Lookups are advisory: any failure resolves to `None`
//! and fails at most the single qualification re-check that wanted it.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::Recipient;

/// Best-effort email lookup for a recipient.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Resolve an email address for the recipient, or `None`.
    async fn resolve(&self, recipient: &Recipient) -> Option<String>;
}

/// Response shape of the directory lookup endpoint.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    email: Option<String>,
}

/// HTTP client for a contact directory service.
///
/// Retries rate-limit and server errors with bounded exponential backoff:
/// a fixed attempt budget, never recursion.
pub struct HttpContactResolver {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpContactResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    /// Build from `OUTREACH_CONTACT_DIRECTORY_URL`. `None` disables lookup.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("OUTREACH_CONTACT_DIRECTORY_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self::new(base_url.trim().to_string()))
    }

    async fn lookup(&self, recipient: &Recipient) -> Option<String> {
        let url = format!("{}/lookup", self.base_url.trim_end_matches('/'));

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let exp = self.backoff_base * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tokio::time::sleep(exp + jitter).await;
            }

            let response = self
                .client
                .get(&url)
                .query(&[
                    ("organization", recipient.organization.as_str()),
                    ("name", recipient.name.as_str()),
                ])
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return match resp.json::<LookupResponse>().await {
                        Ok(body) => {
                            let email = body.email.filter(|e| !e.trim().is_empty());
                            if let Some(ref email) = email {
                                debug!(
                                    organization = %recipient.organization,
                                    email = %email,
                                    "Resolved contact email via directory"
                                );
                            }
                            email
                        }
                        Err(e) => {
                            warn!("Contact directory returned unparseable body: {e}");
                            None
                        }
                    };
                }
                Ok(resp)
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error() =>
                {
                    debug!(
                        status = %resp.status(),
                        attempt = attempt + 1,
                        "Contact directory busy, backing off"
                    );
                }
                Ok(resp) => {
                    // Not found or client error: no point retrying.
                    debug!(status = %resp.status(), "Contact directory lookup missed");
                    return None;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "Contact directory request failed: {e}");
                }
            }
        }

        warn!(
            organization = %recipient.organization,
            attempts = self.max_attempts,
            "Contact lookup gave up after retry budget"
        );
        None
    }
}

#[async_trait]
impl ContactResolver for HttpContactResolver {
    async fn resolve(&self, recipient: &Recipient) -> Option<String> {
        if recipient.organization.trim().is_empty() && recipient.name.trim().is_empty() {
            return None;
        }
        self.lookup(recipient).await
    }
}
