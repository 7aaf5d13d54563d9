//! Follow-up scheduling: bounded escalation of sent, unanswered batches.
//!
//! Both follow-up intervals are measured from `sent_at`. A batch at the
//! follow-up cap is never selected again; `next_follow_up_date` is
//! informational and cleared at the cap.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::admission::Deferral;
use crate::config::OutreachConfig;
use crate::error::{DatabaseError, Error};
use crate::model::OutreachBatch;
use crate::send::{OutboundEmail, SendOutcome, Sender};
use crate::store::Store;
use crate::templates::TemplateRenderer;

/// Outcome of processing one due follow-up.
#[derive(Debug, Clone)]
pub enum FollowupOutcome {
    Sent { to: String },
    DryRun { to: String },
    Skipped(Deferral),
    Failed { error: String, bounced: bool },
}

#[derive(Debug, Clone)]
pub struct FollowupDetail {
    pub batch_id: i64,
    pub organization: String,
    pub followup_number: u32,
    pub outcome: FollowupOutcome,
}

/// Per-stage report; partial success stays visible.
#[derive(Debug, Clone, Default)]
pub struct FollowupReport {
    pub due: usize,
    pub sent: u32,
    pub failed: u32,
    pub skipped_warmup: u32,
    /// Set when the send window closed and the remaining due batches were
    /// left for the next run.
    pub halted: Option<String>,
    pub details: Vec<FollowupDetail>,
}

/// Selects and sends due follow-ups.
pub struct FollowupScheduler {
    config: OutreachConfig,
    store: Arc<Store>,
}

impl FollowupScheduler {
    pub fn new(config: OutreachConfig, store: Arc<Store>) -> Self {
        Self { config, store }
    }

    fn interval_for(&self, followup_number: u32) -> i64 {
        let index = (followup_number as usize - 1).min(self.config.followup_intervals_days.len() - 1);
        self.config.followup_intervals_days[index]
    }

    /// All batches due for a follow-up, paired with the follow-up number
    /// they are due for. Batches at the cap are never returned.
    pub async fn due(&self) -> Result<Vec<(OutreachBatch, u32)>, DatabaseError> {
        let mut due = Vec::new();
        for n in 1..=self.config.max_followups {
            let interval = self.interval_for(n);
            for batch in self.store.followups_due(n - 1, interval).await? {
                due.push((batch, n));
            }
        }
        Ok(due)
    }

    /// Send every due follow-up through the same gate and sender as a first
    /// send. On success the follow-up count advances under a guard so
    /// overlapping runs cannot double-record.
    pub async fn process_due(
        &self,
        sender: &Sender,
        templates: &TemplateRenderer,
        dry_run: bool,
    ) -> Result<FollowupReport, Error> {
        let due = self.due().await?;
        let mut report = FollowupReport {
            due: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            return Ok(report);
        }
        info!(due = due.len(), dry_run, "Processing follow-ups");

        let total = due.len();
        for (index, (batch, followup_number)) in due.into_iter().enumerate() {
            let Some(primary) = batch.primary_recipient().cloned() else {
                // Creation guarantees recipients; a bare row is data damage.
                warn!(batch_id = batch.id, "Follow-up batch has no recipients");
                report.failed += 1;
                report.details.push(FollowupDetail {
                    batch_id: batch.id,
                    organization: batch.organization.clone(),
                    followup_number,
                    outcome: FollowupOutcome::Failed {
                        error: "no recipients in batch".to_string(),
                        bounced: false,
                    },
                });
                continue;
            };

            if dry_run {
                report.details.push(FollowupDetail {
                    batch_id: batch.id,
                    organization: batch.organization.clone(),
                    followup_number,
                    outcome: FollowupOutcome::DryRun {
                        to: primary.email.clone(),
                    },
                });
                continue;
            }

            let rendered = templates.render_followup(&batch, followup_number);
            let email = OutboundEmail {
                to: primary.email.clone(),
                cc: batch.cc_recipients().iter().map(|r| r.email.clone()).collect(),
                subject: rendered.subject,
                body: rendered.body,
                html_body: rendered.html_body,
            };

            let outcome = match sender.send(email).await? {
                SendOutcome::Sent { to, .. } => {
                    let next_date = if followup_number < self.config.max_followups {
                        Some(
                            Local::now().date_naive()
                                + chrono::Duration::days(self.interval_for(followup_number + 1)),
                        )
                    } else {
                        None
                    };
                    if !self
                        .store
                        .increment_followup(batch.id, followup_number - 1, next_date)
                        .await?
                    {
                        warn!(
                            batch_id = batch.id,
                            followup_number, "Follow-up already recorded by another run"
                        );
                    }
                    info!(batch_id = batch.id, followup_number, to = %to, "Follow-up sent");
                    report.sent += 1;

                    if index + 1 < total && !self.config.min_send_delay.is_zero() {
                        tokio::time::sleep(self.config.min_send_delay).await;
                    }
                    FollowupOutcome::Sent { to }
                }
                SendOutcome::Skipped(deferral @ Deferral::OutsideWindow(_)) => {
                    report.halted = Some(deferral.to_string());
                    report.details.push(FollowupDetail {
                        batch_id: batch.id,
                        organization: batch.organization.clone(),
                        followup_number,
                        outcome: FollowupOutcome::Skipped(deferral),
                    });
                    break;
                }
                SendOutcome::Skipped(deferral) => {
                    report.skipped_warmup += 1;
                    FollowupOutcome::Skipped(deferral)
                }
                SendOutcome::Failed { error, bounced } => {
                    report.failed += 1;
                    if bounced {
                        self.store.block(&primary.email, "bounce").await?;
                    }
                    warn!(batch_id = batch.id, followup_number, error = %error, "Follow-up failed");
                    FollowupOutcome::Failed { error, bounced }
                }
            };

            report.details.push(FollowupDetail {
                batch_id: batch.id,
                organization: batch.organization.clone(),
                followup_number,
                outcome,
            });
        }

        Ok(report)
    }
}
