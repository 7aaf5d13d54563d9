//! Qualification: decide which opportunities may enter outreach.
//!
//! Gates run in a fixed order and the first failing gate wins. Every
//! rejection carries a human-readable reason for the audit trail; reasons
//! are surfaced to the operator, never dropped.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::config::OutreachConfig;
use crate::contacts::ContactResolver;
use crate::error::DatabaseError;
use crate::model::Opportunity;
use crate::store::Store;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

/// Entity statuses that mean the opportunity is already over.
const TERMINAL_ENTITY_STATUSES: &[&str] = &["dissolved", "closed", "converted-closed"];

/// Syntactic email validity check.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && EMAIL_RE.is_match(email)
}

/// Outcome of qualifying one opportunity.
#[derive(Debug)]
pub enum Decision {
    /// Admitted; carries a local copy, possibly enriched with resolved
    /// emails. The input record itself is never mutated.
    Admit(Opportunity),
    Reject(String),
}

/// A rejection record for reporting.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub opportunity_id: String,
    pub organization: String,
    pub reason: String,
}

/// Qualification gates over one opportunity at a time. Reads the blocklist
/// and contact history; writes nothing.
pub struct Qualifier {
    config: OutreachConfig,
    store: Arc<Store>,
    resolver: Option<Arc<dyn ContactResolver>>,
}

impl Qualifier {
    pub fn new(
        config: OutreachConfig,
        store: Arc<Store>,
        resolver: Option<Arc<dyn ContactResolver>>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
        }
    }

    /// Evaluate all gates for one opportunity. First failing gate wins.
    pub async fn decide(&self, opportunity: &Opportunity) -> Result<Decision, DatabaseError> {
        // Gate 1: minimum score.
        if opportunity.score < self.config.min_score {
            return Ok(Decision::Reject(format!(
                "score {} below threshold {}",
                opportunity.score, self.config.min_score
            )));
        }

        // Gate 2: at least one recipient with a valid email, after one
        // best-effort resolution pass for those missing one.
        let mut candidate = opportunity.clone();
        if !has_valid_recipient(&candidate) {
            if let Some(resolver) = &self.resolver {
                for recipient in candidate
                    .recipients
                    .iter_mut()
                    .filter(|r| !is_valid_email(&r.email))
                {
                    if let Some(found) = resolver.resolve(recipient).await
                        && is_valid_email(&found)
                    {
                        debug!(
                            opportunity_id = %candidate.id,
                            email = %found,
                            "Recipient email resolved via directory"
                        );
                        recipient.email = found;
                    }
                }
            }
            if !has_valid_recipient(&candidate) {
                return Ok(Decision::Reject(if candidate.recipients.is_empty() {
                    "no recipients on opportunity".to_string()
                } else {
                    format!(
                        "no valid recipient email among {} candidates",
                        candidate.recipients.len()
                    )
                }));
            }
        }

        // Gate 3: no admitted recipient may be blocklisted.
        for recipient in candidate.recipients.iter().filter(|r| is_valid_email(&r.email)) {
            if self.store.is_blocked(&recipient.email).await? {
                return Ok(Decision::Reject(format!(
                    "recipient {} is blocklisted",
                    recipient.email
                )));
            }
        }

        // Gate 4: organization cooldown.
        if self
            .store
            .was_contacted_within(&candidate.registration_id, self.config.cooldown_days)
            .await?
        {
            return Ok(Decision::Reject(format!(
                "organization {} already contacted within {} days",
                candidate.registration_id, self.config.cooldown_days
            )));
        }

        // Gate 5: underlying entity already wound down.
        let entity_status = candidate.entity_status.trim().to_lowercase();
        if TERMINAL_ENTITY_STATUSES.contains(&entity_status.as_str()) {
            return Ok(Decision::Reject(format!("entity status is {entity_status}")));
        }

        // Gate 6: low-urgency categories need a higher score.
        if is_low_urgency_category(&candidate.category)
            && candidate.score < self.config.low_urgency_min_score
        {
            return Ok(Decision::Reject(format!(
                "solvent wind-down category, score {} below {}",
                candidate.score, self.config.low_urgency_min_score
            )));
        }

        Ok(Decision::Admit(candidate))
    }

    /// Qualify a list of opportunities, recording the reason for every
    /// rejection. Stops collecting once `max_sends_per_run` admissions have
    /// been gathered.
    pub async fn qualify_all(
        &self,
        opportunities: &[Opportunity],
    ) -> Result<(Vec<Opportunity>, Vec<Rejection>), DatabaseError> {
        let mut admitted = Vec::new();
        let mut rejections = Vec::new();

        for opportunity in opportunities {
            if let Some(max) = self.config.max_sends_per_run
                && admitted.len() >= max as usize
            {
                info!(max, "Reached per-run qualification limit, stopping early");
                break;
            }

            match self.decide(opportunity).await? {
                Decision::Admit(copy) => {
                    debug!(opportunity_id = %copy.id, organization = %copy.organization_name, "Qualified");
                    admitted.push(copy);
                }
                Decision::Reject(reason) => {
                    info!(
                        opportunity_id = %opportunity.id,
                        organization = %opportunity.organization_name,
                        reason = %reason,
                        "Skipped"
                    );
                    rejections.push(Rejection {
                        opportunity_id: opportunity.id.clone(),
                        organization: opportunity.organization_name.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            qualified = admitted.len(),
            skipped = rejections.len(),
            "Qualification complete"
        );
        Ok((admitted, rejections))
    }
}

fn has_valid_recipient(opportunity: &Opportunity) -> bool {
    opportunity.recipients.iter().any(|r| is_valid_email(&r.email))
}

/// Categories that usually mean a solvent wind-down (low urgency).
fn is_low_urgency_category(category: &str) -> bool {
    let normalized = category.to_lowercase().replace(['\u{2019}', '\''], "");
    normalized.contains("members voluntary") || normalized.contains("mvl")
}
