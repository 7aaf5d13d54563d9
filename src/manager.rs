//! Manager: sequences qualify → batch → persist → send → follow-ups.
//!
//! Each stage's results are returned separately so partial success (for
//! example, batching succeeded but the send window was closed) is always
//! visible. No batch's failure stops the others in the same run.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::admission::Deferral;
use crate::batch::{BatchDraft, group_by_organization};
use crate::config::OutreachConfig;
use crate::contacts::ContactResolver;
use crate::error::Result;
use crate::followup::{FollowupReport, FollowupScheduler};
use crate::model::{BatchStatus, Opportunity, OutreachBatch, WarmupStats};
use crate::qualify::{Qualifier, Rejection};
use crate::send::{OutboundEmail, SendOutcome, Sender, Transport};
use crate::store::{PipelineStats, Store};
use crate::templates::TemplateRenderer;

/// Results of the qualify/batch/persist stage.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub total: usize,
    pub qualified: usize,
    pub rejections: Vec<Rejection>,
    pub batch_ids: Vec<i64>,
    /// Dry run only: organizations that would have received a batch.
    pub planned: Vec<String>,
}

/// What happened to one batch during the send stage.
#[derive(Debug, Clone)]
pub enum BatchSendOutcome {
    Sent { to: String, cc: Vec<String> },
    DryRun { to: String },
    Skipped(Deferral),
    SkippedMaxSends,
    Failed { error: String, bounced: bool },
}

#[derive(Debug, Clone)]
pub struct SendDetail {
    pub batch_id: i64,
    pub organization: String,
    pub outcome: BatchSendOutcome,
}

/// Results of the send stage.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Batches that were candidates this run.
    pub candidates: usize,
    pub sent: u32,
    pub failed: u32,
    pub skipped_warmup: u32,
    /// Set when the send window closed mid-run; the rest stay eligible.
    pub halted: Option<String>,
    /// Missing credentials, reported once; never blocks qualification.
    pub config_error: Option<String>,
    pub details: Vec<SendDetail>,
}

/// Combined results of one full invocation.
#[derive(Debug)]
pub struct RunReport {
    pub processing: ProcessReport,
    pub sending: SendReport,
    pub followups: FollowupReport,
}

/// Operator status snapshot.
#[derive(Debug)]
pub struct StatusReport {
    pub date: NaiveDate,
    pub pipeline: PipelineStats,
    pub warmup: WarmupStats,
    pub daily_cap: Option<u32>,
    pub followups_due: usize,
    pub pending_batches: usize,
}

/// Orchestrates the outreach pipeline. The only component that sequences
/// the others.
pub struct Manager {
    config: OutreachConfig,
    store: Arc<Store>,
    qualifier: Qualifier,
    templates: TemplateRenderer,
    sender: Sender,
    followups: FollowupScheduler,
}

impl Manager {
    pub fn new(
        config: OutreachConfig,
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
        resolver: Option<Arc<dyn ContactResolver>>,
    ) -> Self {
        let qualifier = Qualifier::new(config.clone(), Arc::clone(&store), resolver);
        let templates = TemplateRenderer::new(&config);
        let sender = Sender::new(config.clone(), Arc::clone(&store), transport);
        let followups = FollowupScheduler::new(config.clone(), Arc::clone(&store));
        Self {
            config,
            store,
            qualifier,
            templates,
            sender,
            followups,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Qualify, batch, and persist new opportunities as queued batches,
    /// auto-approving unless manual approval is configured.
    pub async fn process_opportunities(
        &self,
        opportunities: &[Opportunity],
    ) -> Result<ProcessReport> {
        info!(count = opportunities.len(), "Processing opportunities");
        let (admitted, rejections) = self.qualifier.qualify_all(opportunities).await?;

        let mut report = ProcessReport {
            total: opportunities.len(),
            qualified: admitted.len(),
            rejections,
            ..Default::default()
        };

        if admitted.is_empty() {
            info!("No opportunities qualified for outreach");
            return Ok(report);
        }

        let drafts = group_by_organization(&admitted);

        if self.config.dry_run {
            report.planned = drafts.iter().map(|d| d.organization.clone()).collect();
            info!(planned = report.planned.len(), "Dry run: batches not persisted");
            return Ok(report);
        }

        for draft in &drafts {
            let batch_id = self.persist_batch(draft).await?;
            report.batch_ids.push(batch_id);
        }

        if !self.config.require_approval && !report.batch_ids.is_empty() {
            for &batch_id in &report.batch_ids {
                self.store
                    .transition(batch_id, &[BatchStatus::Queued], BatchStatus::Approved, None)
                    .await?;
            }
            info!(count = report.batch_ids.len(), "Auto-approved batches");
        }

        Ok(report)
    }

    async fn persist_batch(&self, draft: &BatchDraft) -> Result<i64> {
        let rendered = self.templates.render_batch(draft);
        let batch_id = self
            .store
            .create_batch(draft, &rendered.subject, &rendered.body)
            .await?;
        info!(
            batch_id,
            organization = %draft.organization,
            opportunities = draft.opportunities.len(),
            recipients = draft.recipients.len(),
            "Created batch"
        );
        Ok(batch_id)
    }

    /// Send approved batches (falling back to queued when none are
    /// approved, for manual-approval workflows) in descending max-score
    /// order, under the send-window and warm-up gates.
    pub async fn send_pending(&self, max_sends: Option<u32>) -> Result<SendReport> {
        let mut candidates = self.store.batches_by_status(BatchStatus::Approved).await?;
        if candidates.is_empty() {
            candidates = self.store.batches_by_status(BatchStatus::Queued).await?;
        }
        candidates.sort_by(|a, b| b.max_score().cmp(&a.max_score()));

        let mut report = SendReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(report);
        }

        if !self.config.dry_run && !self.config.smtp_configured() {
            let message = "SMTP credentials not configured; cannot send".to_string();
            error!("{message}");
            report.config_error = Some(message);
            return Ok(report);
        }

        let effective_max = max_sends.or(self.config.max_sends_per_run);
        let total = candidates.len();

        for (index, batch) in candidates.into_iter().enumerate() {
            if let Some(max) = effective_max
                && report.sent >= max
            {
                report.details.push(SendDetail {
                    batch_id: batch.id,
                    organization: batch.organization.clone(),
                    outcome: BatchSendOutcome::SkippedMaxSends,
                });
                continue;
            }

            let Some(primary) = batch.primary_recipient().cloned() else {
                report.failed += 1;
                report.details.push(SendDetail {
                    batch_id: batch.id,
                    organization: batch.organization.clone(),
                    outcome: BatchSendOutcome::Failed {
                        error: "no recipients in batch".to_string(),
                        bounced: false,
                    },
                });
                continue;
            };

            if self.config.dry_run {
                info!(
                    batch_id = batch.id,
                    to = %primary.email,
                    subject = %batch.subject,
                    "Dry run: would send"
                );
                report.details.push(SendDetail {
                    batch_id: batch.id,
                    organization: batch.organization.clone(),
                    outcome: BatchSendOutcome::DryRun {
                        to: primary.email.clone(),
                    },
                });
                continue;
            }

            let email = OutboundEmail {
                to: primary.email.clone(),
                cc: batch.cc_recipients().iter().map(|r| r.email.clone()).collect(),
                subject: batch.subject.clone(),
                body: batch.body.clone(),
                html_body: None,
            };

            let outcome = match self.sender.send(email).await? {
                SendOutcome::Sent { to, cc, .. } => {
                    self.record_sent(&batch).await?;
                    report.sent += 1;
                    if index + 1 < total && !self.config.min_send_delay.is_zero() {
                        tokio::time::sleep(self.config.min_send_delay).await;
                    }
                    BatchSendOutcome::Sent { to, cc }
                }
                SendOutcome::Skipped(deferral @ Deferral::OutsideWindow(_)) => {
                    report.halted = Some(deferral.to_string());
                    report.details.push(SendDetail {
                        batch_id: batch.id,
                        organization: batch.organization.clone(),
                        outcome: BatchSendOutcome::Skipped(deferral),
                    });
                    break;
                }
                SendOutcome::Skipped(deferral) => {
                    report.skipped_warmup += 1;
                    BatchSendOutcome::Skipped(deferral)
                }
                SendOutcome::Failed { error, bounced } => {
                    report.failed += 1;
                    if bounced {
                        self.store.block(&primary.email, "bounce").await?;
                    }
                    warn!(batch_id = batch.id, error = %error, bounced, "Batch send failed");
                    BatchSendOutcome::Failed { error, bounced }
                }
            };

            report.details.push(SendDetail {
                batch_id: batch.id,
                organization: batch.organization.clone(),
                outcome,
            });
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            skipped_warmup = report.skipped_warmup,
            "Send stage complete"
        );
        Ok(report)
    }

    /// Record a successful transmission: guarded transition to `sent` plus
    /// contact-history rows for every opportunity in the batch.
    async fn record_sent(&self, batch: &OutreachBatch) -> Result<()> {
        let transitioned = self
            .store
            .transition(
                batch.id,
                &[BatchStatus::Approved, BatchStatus::Queued],
                BatchStatus::Sent,
                None,
            )
            .await?;
        if !transitioned {
            warn!(batch_id = batch.id, "Batch was already moved on by another run");
            return Ok(());
        }

        for opportunity in &batch.opportunities {
            self.store
                .record_contact(&opportunity.registration_id, batch.id)
                .await?;
        }
        Ok(())
    }

    /// Send all due follow-ups under the same gates as first sends.
    pub async fn process_followups(&self) -> Result<FollowupReport> {
        self.followups
            .process_due(&self.sender, &self.templates, self.config.dry_run)
            .await
    }

    /// Full pipeline: process, send, follow-ups.
    pub async fn run(&self, opportunities: &[Opportunity]) -> Result<RunReport> {
        let processing = self.process_opportunities(opportunities).await?;
        let sending = self.send_pending(None).await?;
        let followups = self.process_followups().await?;
        Ok(RunReport {
            processing,
            sending,
            followups,
        })
    }

    // ── Operator actions ────────────────────────────────────────────

    /// Approve one queued batch.
    pub async fn approve(&self, batch_id: i64) -> Result<bool> {
        Ok(self
            .store
            .transition(batch_id, &[BatchStatus::Queued], BatchStatus::Approved, None)
            .await?)
    }

    /// Approve every queued batch. Returns how many were approved.
    pub async fn approve_all(&self) -> Result<usize> {
        let queued = self.store.batches_by_status(BatchStatus::Queued).await?;
        let mut approved = 0;
        for batch in queued {
            if self.approve(batch.id).await? {
                approved += 1;
            }
        }
        Ok(approved)
    }

    /// Close a batch from any non-terminal state, recording the reason.
    pub async fn skip(&self, batch_id: i64, reason: &str) -> Result<bool> {
        Ok(self
            .store
            .transition(
                batch_id,
                &[BatchStatus::Queued, BatchStatus::Approved, BatchStatus::Sent],
                BatchStatus::Closed,
                Some(&format!("Skipped: {reason}")),
            )
            .await?)
    }

    /// Mark a sent batch as replied.
    pub async fn mark_replied(&self, batch_id: i64, note: &str) -> Result<bool> {
        Ok(self
            .store
            .transition(batch_id, &[BatchStatus::Sent], BatchStatus::Replied, Some(note))
            .await?)
    }

    /// Read-only status snapshot.
    pub async fn status(&self) -> Result<StatusReport> {
        let pipeline = self.store.pipeline_stats().await?;
        let warmup = self.store.warmup_stats().await?;
        let daily_cap = self.sender.gate().daily_cap(warmup.age_days);
        let followups_due = self.followups.due().await?.len();
        let pending_batches = self.store.pending_batches().await?.len();
        Ok(StatusReport {
            date: chrono::Local::now().date_naive(),
            pipeline,
            warmup,
            daily_cap,
            followups_due,
            pending_batches,
        })
    }
}
