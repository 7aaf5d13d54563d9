//! Core data model: input contract types and the batch aggregate.
//!
//! `Opportunity` and `Recipient` are constructed once at the input boundary
//! (serde over the upstream JSON contract); everything downstream depends
//! only on these types. The engine never mutates an opportunity it
//! received; enrichment happens on a local copy.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A named email address eligible to receive outreach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub organization: String,
}

impl Recipient {
    /// Deduplication key: recipients are equal when their emails match
    /// case-insensitively.
    pub fn email_key(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// One external candidate for outreach, as delivered by the upstream
/// analysis pipeline. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub registration_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub estimated_assets: Vec<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    /// Real-world status of the underlying entity, e.g. "active" or
    /// "dissolved".
    #[serde(default)]
    pub entity_status: String,
}

/// Per-opportunity projection stored inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpportunitySummary {
    pub id: String,
    pub organization_name: String,
    pub registration_id: String,
    pub category: String,
    pub sector: String,
    pub estimated_assets: Vec<String>,
    pub score: i64,
    pub website_url: Option<String>,
}

impl From<&Opportunity> for OpportunitySummary {
    fn from(opp: &Opportunity) -> Self {
        Self {
            id: opp.id.clone(),
            organization_name: opp.organization_name.clone(),
            registration_id: opp.registration_id.clone(),
            category: opp.category.clone(),
            sector: opp.sector.clone(),
            estimated_assets: opp.estimated_assets.clone(),
            score: opp.score,
            website_url: opp.website_url.clone(),
        }
    }
}

/// Lifecycle state of an outreach batch.
///
/// Forward-only: `queued → approved → sent → replied`, with `closed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Approved,
    Sent,
    Replied,
    Closed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Replied => "replied",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "approved" => Ok(Self::Approved),
            "sent" => Ok(Self::Sent),
            "replied" => Ok(Self::Replied),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown batch status: {s}")),
        }
    }
}

/// The unit of send: one or more opportunities bundled to one
/// organization's recipients.
#[derive(Debug, Clone)]
pub struct OutreachBatch {
    pub id: i64,
    pub organization: String,
    pub status: BatchStatus,
    /// First recipient is the To address, the rest are CC. Never empty.
    pub recipients: Vec<Recipient>,
    /// Never empty.
    pub opportunities: Vec<OpportunitySummary>,
    /// Rendered at creation time, immutable thereafter. Follow-ups render a
    /// fresh subject/body at send time instead of mutating these.
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub follow_up_count: u32,
    /// Present only while more follow-ups remain possible.
    pub next_follow_up_date: Option<NaiveDate>,
    /// Free-text audit trail (skip reasons, reply notes).
    pub notes: String,
}

impl OutreachBatch {
    pub fn primary_recipient(&self) -> Option<&Recipient> {
        self.recipients.first()
    }

    pub fn cc_recipients(&self) -> &[Recipient] {
        if self.recipients.len() > 1 {
            &self.recipients[1..]
        } else {
            &[]
        }
    }

    /// Highest opportunity score in this batch; drives processing priority.
    pub fn max_score(&self) -> i64 {
        self.opportunities.iter().map(|o| o.score).max().unwrap_or(0)
    }
}

/// An opted-out or bounced address. Presence suppresses all future sends.
#[derive(Debug, Clone)]
pub struct BlocklistEntry {
    pub email: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// Warm-up accounting for the sending identity.
#[derive(Debug, Clone)]
pub struct WarmupStats {
    /// Date of the very first recorded send. `None` means nothing has been
    /// sent yet and no cap applies.
    pub first_send_date: Option<NaiveDate>,
    /// Days since `first_send_date`.
    pub age_days: Option<i64>,
    pub sent_today: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(email: &str) -> Recipient {
        Recipient {
            name: "Jo Bloggs".to_string(),
            email: email.to_string(),
            role: "Partner".to_string(),
            organization: "Bloggs & Co".to_string(),
        }
    }

    #[test]
    fn email_key_is_case_insensitive() {
        assert_eq!(
            recipient("Jo.Bloggs@Example.COM").email_key(),
            recipient("jo.bloggs@example.com").email_key()
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            BatchStatus::Queued,
            BatchStatus::Approved,
            BatchStatus::Sent,
            BatchStatus::Replied,
            BatchStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>(), Ok(status));
        }
        assert!("pending".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn opportunity_deserializes_with_defaults() {
        let opp: Opportunity = serde_json::from_str(
            r#"{"id": "n-1", "organization_name": "Acme Ltd", "score": 55}"#,
        )
        .unwrap();
        assert_eq!(opp.id, "n-1");
        assert_eq!(opp.score, 55);
        assert!(opp.recipients.is_empty());
        assert!(opp.entity_status.is_empty());
    }

    #[test]
    fn batch_recipient_split_and_max_score() {
        let batch = OutreachBatch {
            id: 1,
            organization: "Bloggs & Co".to_string(),
            status: BatchStatus::Queued,
            recipients: vec![recipient("a@x.com"), recipient("b@x.com"), recipient("c@x.com")],
            opportunities: vec![
                OpportunitySummary {
                    id: "n-1".into(),
                    organization_name: "Acme".into(),
                    registration_id: "123".into(),
                    category: String::new(),
                    sector: String::new(),
                    estimated_assets: vec![],
                    score: 40,
                    website_url: None,
                },
                OpportunitySummary {
                    id: "n-2".into(),
                    organization_name: "Beta".into(),
                    registration_id: "456".into(),
                    category: String::new(),
                    sector: String::new(),
                    estimated_assets: vec![],
                    score: 72,
                    website_url: None,
                },
            ],
            subject: String::new(),
            body: String::new(),
            created_at: Utc::now(),
            approved_at: None,
            sent_at: None,
            replied_at: None,
            follow_up_count: 0,
            next_follow_up_date: None,
            notes: String::new(),
        };
        assert_eq!(batch.primary_recipient().unwrap().email, "a@x.com");
        assert_eq!(batch.cc_recipients().len(), 2);
        assert_eq!(batch.max_score(), 72);
    }
}
