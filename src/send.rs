//! Outbound sending: SMTP transport behind a trait, admission-gated.
//!
//! The Sender performs exactly one transmission attempt per call: gate
//! first (a deferral is a skip, not a failure), then transmit, then
//! classify. Retry policy belongs to the next scheduled run, never here.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as LettreTransport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::admission::{Admission, AdmissionGate, Deferral};
use crate::config::OutreachConfig;
use crate::error::{ConfigError, Error, SendError};
use crate::store::Store;

/// One outbound transmission: primary recipient, ordered CC list, subject,
/// plain-text body, optional additive HTML body.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

/// Performs one transmission. Implemented by the SMTP mailer and by test
/// doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn transmit(&self, email: &OutboundEmail) -> Result<(), SendError>;
}

/// Outcome of a send attempt. Skips and failures are results, not errors;
/// the run continues past both.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent {
        to: String,
        cc: Vec<String>,
        sent_today: u32,
    },
    Skipped(Deferral),
    Failed {
        error: String,
        bounced: bool,
    },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Admission-gated sender over a transport.
pub struct Sender {
    config: OutreachConfig,
    gate: AdmissionGate,
    transport: Arc<dyn Transport>,
}

impl Sender {
    pub fn new(config: OutreachConfig, store: Arc<Store>, transport: Arc<dyn Transport>) -> Self {
        let gate = AdmissionGate::new(config.clone(), store);
        Self {
            config,
            gate,
            transport,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// One gated transmission attempt.
    pub async fn send(&self, mut email: OutboundEmail) -> Result<SendOutcome, Error> {
        if !self.config.smtp_configured() {
            return Err(ConfigError::MissingRequired {
                key: "OUTREACH_SMTP_USER / OUTREACH_SMTP_PASSWORD".to_string(),
                hint: "SMTP credentials are required to send".to_string(),
            }
            .into());
        }

        match self.gate.admit().await? {
            Admission::Deferred(deferral) => {
                info!(to = %email.to, deferral = %deferral, "Send deferred");
                return Ok(SendOutcome::Skipped(deferral));
            }
            Admission::Granted { sent_today } => {
                if let Some(override_to) = &self.config.test_recipient_override {
                    info!(original = %email.to, redirect = %override_to, "Test recipient override active");
                    email.to = override_to.clone();
                    email.cc.clear();
                }

                match self.transport.transmit(&email).await {
                    Ok(()) => {
                        info!(to = %email.to, cc = email.cc.len(), sent_today, "Email sent");
                        Ok(SendOutcome::Sent {
                            to: email.to,
                            cc: email.cc,
                            sent_today,
                        })
                    }
                    Err(SendError::Refused { response }) => {
                        warn!(to = %email.to, response = %response, "Recipient refused");
                        Ok(SendOutcome::Failed {
                            error: response,
                            bounced: true,
                        })
                    }
                    Err(e) => {
                        warn!(to = %email.to, "Send failed: {e}");
                        Ok(SendOutcome::Failed {
                            error: e.to_string(),
                            bounced: false,
                        })
                    }
                }
            }
        }
    }
}

// ── SMTP transport ──────────────────────────────────────────────────

/// lettre-backed SMTP transport with a per-call timeout.
pub struct SmtpMailer {
    config: OutreachConfig,
}

impl SmtpMailer {
    pub fn new(config: OutreachConfig) -> Self {
        Self { config }
    }

    fn from_mailbox(&self) -> Result<Mailbox, SendError> {
        let smtp = &self.config.smtp;
        let formatted = if self.config.sender.name.is_empty() {
            smtp.from_address.clone()
        } else {
            format!("{} <{}>", self.config.sender.name, smtp.from_address)
        };
        formatted.parse().map_err(|e| SendError::InvalidAddress {
            address: smtp.from_address.clone(),
            reason: format!("{e}"),
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, SendError> {
        let mut builder = Message::builder()
            .from(self.from_mailbox()?)
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject.as_str());

        for cc in &email.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        match &email.html_body {
            Some(html) => builder
                .multipart(MultiPart::alternative_plain_html(
                    email.body.clone(),
                    html.clone(),
                ))
                .map_err(|e| SendError::MessageBuild(format!("{e}"))),
            None => builder
                .body(email.body.clone())
                .map_err(|e| SendError::MessageBuild(format!("{e}"))),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse().map_err(|e| SendError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn transmit(&self, email: &OutboundEmail) -> Result<(), SendError> {
        let message = self.build_message(email)?;
        let smtp = &self.config.smtp;

        let creds = Credentials::new(
            smtp.username.clone(),
            smtp.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&smtp.host)
            .map_err(|e| SendError::Transport(format!("SMTP relay setup: {e}")))?
            .port(smtp.port)
            .credentials(creds)
            .timeout(Some(smtp.timeout))
            .build();

        match transport.send(&message) {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(SendError::Refused {
                response: format!("{e}"),
            }),
            Err(e) => Err(SendError::Transport(format!("{e}"))),
        }
    }
}

// ── Test double ─────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use secrecy::SecretString;

    fn sendable_config() -> OutreachConfig {
        let mut config = OutreachConfig::default();
        config.smtp.username = "sender@example.com".to_string();
        config.smtp.password = SecretString::from("secret".to_string());
        config.smtp.from_address = "sender@example.com".to_string();
        config.send_days = crate::config::parse_days("Mon,Tue,Wed,Thu,Fri,Sat,Sun");
        config.window_start = chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        config.window_end = chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        config
    }

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            to: to.to_string(),
            cc: vec!["cc@example.com".to_string()],
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            html_body: None,
        }
    }

    async fn sender_with(
        config: OutreachConfig,
    ) -> (Sender, Arc<Store>, Arc<MockTransport>) {
        let store = Arc::new(Store::open_memory().await.unwrap());
        let transport = MockTransport::new();
        let sender = Sender::new(config, Arc::clone(&store), transport.clone());
        (sender, store, transport)
    }

    #[tokio::test]
    async fn missing_credentials_is_a_config_error() {
        let mut config = sendable_config();
        config.smtp.password = SecretString::from(String::new());
        let (sender, _, transport) = sender_with(config).await;

        let result = sender.send(email("to@example.com")).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn outside_window_is_a_skip_not_a_failure() {
        let mut config = sendable_config();
        config.send_days = vec![];
        let (sender, store, transport) = sender_with(config).await;

        match sender.send(email("to@example.com")).await.unwrap() {
            SendOutcome::Skipped(Deferral::OutsideWindow(_)) => {}
            other => panic!("expected window skip, got {other:?}"),
        }
        assert_eq!(transport.sent_count(), 0);
        // No warm-up slot consumed.
        assert_eq!(store.warmup_stats().await.unwrap().sent_today, 0);
    }

    #[tokio::test]
    async fn success_claims_a_warmup_slot() {
        let (sender, store, transport) = sender_with(sendable_config()).await;

        match sender.send(email("to@example.com")).await.unwrap() {
            SendOutcome::Sent { to, cc, sent_today } => {
                assert_eq!(to, "to@example.com");
                assert_eq!(cc, vec!["cc@example.com".to_string()]);
                assert_eq!(sent_today, 1);
            }
            other => panic!("expected sent, got {other:?}"),
        }
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(store.warmup_stats().await.unwrap().sent_today, 1);
    }

    #[tokio::test]
    async fn refusal_is_classified_as_bounce() {
        let (sender, _, transport) = sender_with(sendable_config()).await;
        transport.refuse_address("bad@example.com");

        match sender.send(email("bad@example.com")).await.unwrap() {
            SendOutcome::Failed { error, bounced } => {
                assert!(bounced);
                assert!(error.contains("550"));
            }
            other => panic!("expected bounce, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_a_plain_failure() {
        let (sender, _, transport) = sender_with(sendable_config()).await;
        *transport.fail_all.lock().unwrap() = true;

        match sender.send(email("to@example.com")).await.unwrap() {
            SendOutcome::Failed { bounced, .. } => assert!(!bounced),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_override_redirects_and_drops_cc() {
        let mut config = sendable_config();
        config.test_recipient_override = Some("me@example.com".to_string());
        let (sender, _, transport) = sender_with(config).await;

        sender.send(email("real@example.com")).await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].to, "me@example.com");
        assert!(sent[0].cc.is_empty());
    }

    #[tokio::test]
    async fn warmup_cap_defers_without_transmitting() {
        let (sender, store, transport) = sender_with(sendable_config()).await;
        // Age the sender to 10 days and fill today's quota of 15.
        let first = (chrono::Local::now().date_naive() - chrono::Duration::days(10)).to_string();
        store
            .conn()
            .execute(
                "INSERT INTO warmup_counters (date, emails_sent, first_send_date) VALUES (?1, 1, ?1)",
                libsql::params![first.clone()],
            )
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO warmup_counters (date, emails_sent, first_send_date) VALUES (?1, 15, ?2)",
                libsql::params![chrono::Local::now().date_naive().to_string(), first],
            )
            .await
            .unwrap();

        match sender.send(email("to@example.com")).await.unwrap() {
            SendOutcome::Skipped(Deferral::WarmupLimit { sent, cap }) => {
                assert_eq!((sent, cap), (15, 15));
            }
            other => panic!("expected warm-up skip, got {other:?}"),
        }
        assert_eq!(transport.sent_count(), 0);
        assert_eq!(store.warmup_stats().await.unwrap().sent_today, 15);
    }
}
