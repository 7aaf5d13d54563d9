//! Batching: group qualified opportunities by recipient organization.
//!
//! Each batch carries every opportunity for one organization plus the union
//! of their recipients, deduplicated case-insensitively by email. The first
//! recipient seen becomes the To address; the rest go on CC.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::model::{Opportunity, OpportunitySummary, Recipient};

/// Sentinel used when no organization name can be derived for a recipient.
pub const UNKNOWN_ORGANIZATION: &str = "Unknown Organization";

/// A batch in pre-persistence form.
#[derive(Debug, Clone)]
pub struct BatchDraft {
    pub organization: String,
    pub recipients: Vec<Recipient>,
    pub opportunities: Vec<OpportunitySummary>,
}

impl BatchDraft {
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

    pub fn max_score(&self) -> i64 {
        self.opportunities.iter().map(|o| o.score).max().unwrap_or(0)
    }
}

/// Group opportunities by the organization of each one's first recipient.
///
/// Opportunities with no recipients are dropped, as is any resulting group
/// whose recipients all lacked an email. The result is sorted by descending
/// max score (processing priority, not a send-time ordering guarantee).
pub fn group_by_organization(opportunities: &[Opportunity]) -> Vec<BatchDraft> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Opportunity>> = HashMap::new();

    for opp in opportunities {
        let Some(first) = opp.recipients.first() else {
            debug!(opportunity_id = %opp.id, "Skipping opportunity with no recipients");
            continue;
        };
        let key = organization_key(first);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(opp);
    }

    let mut batches: Vec<BatchDraft> = Vec::new();

    for organization in order {
        let members = &groups[&organization];
        let mut draft = BatchDraft {
            organization: organization.clone(),
            recipients: Vec::new(),
            opportunities: Vec::new(),
        };
        let mut seen_emails: HashSet<String> = HashSet::new();

        for opp in members {
            draft.opportunities.push(OpportunitySummary::from(*opp));
            for recipient in &opp.recipients {
                if recipient.email.trim().is_empty() {
                    continue;
                }
                if seen_emails.insert(recipient.email_key()) {
                    draft.recipients.push(recipient.clone());
                }
            }
        }

        if draft.recipients.is_empty() {
            debug!(organization = %organization, "Dropping group with no usable recipients");
            continue;
        }

        debug!(
            organization = %organization,
            opportunities = draft.opportunities.len(),
            recipients = draft.recipients.len(),
            "Batch drafted"
        );
        batches.push(draft);
    }

    batches.sort_by(|a, b| b.max_score().cmp(&a.max_score()));
    batches
}

/// Grouping key for a recipient: their organization name, a pseudo-name
/// derived from the email domain, or the unknown-organization sentinel.
pub fn organization_key(recipient: &Recipient) -> String {
    let organization = recipient.organization.trim();
    if !organization.is_empty() {
        return organization.to_string();
    }

    if let Some(domain) = recipient.email.split('@').nth(1) {
        let parts: Vec<&str> = domain.split('.').collect();
        if parts.len() >= 2 && !parts[0].is_empty() {
            return title_case(&parts[0].replace('-', " "));
        }
    }

    UNKNOWN_ORGANIZATION.to_string()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
