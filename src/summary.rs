//! Operator-facing text projections: status, queue, preview, history,
//! stats. Pure rendering over Store query results; writes nothing.

use crate::manager;
use crate::model::{BatchStatus, BlocklistEntry, OutreachBatch};
use crate::store::PipelineStats;

const RULE: &str = "------------------------------";

fn status_tag(status: BatchStatus) -> &'static str {
    match status {
        BatchStatus::Queued => "queued",
        BatchStatus::Approved => "approved",
        BatchStatus::Sent => "sent",
        BatchStatus::Replied => "replied",
        BatchStatus::Closed => "closed",
    }
}

fn organizations_line(batch: &OutreachBatch) -> String {
    let names: Vec<&str> = batch
        .opportunities
        .iter()
        .map(|o| o.organization_name.as_str())
        .collect();
    match names.len() {
        0 => String::new(),
        1 | 2 => names.join(", "),
        n => format!("{}, {} + {} more", names[0], names[1], n - 2),
    }
}

/// Status snapshot for `outreach status`.
pub fn render_status(status: &manager::StatusReport) -> String {
    let mut lines = vec![
        format!("OUTREACH STATUS - {}", status.date.format("%d %b %Y")),
        RULE.to_string(),
        format!(
            "Pipeline: {} queued, {} approved, {} awaiting reply, {} replied, {} closed",
            status.pipeline.queued,
            status.pipeline.approved,
            status.pipeline.awaiting_reply,
            status.pipeline.replied,
            status.pipeline.closed
        ),
        format!("Pending batches: {}", status.pending_batches),
        format!("Follow-ups due: {}", status.followups_due),
    ];

    match status.warmup.age_days {
        Some(age) => {
            let cap = status
                .daily_cap
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unlimited".to_string());
            lines.push(format!(
                "Warm-up: day {age}, sent {} today (limit {cap})",
                status.warmup.sent_today
            ));
        }
        None => lines.push("Warm-up: no sends recorded yet".to_string()),
    }

    lines.join("\n")
}

/// Pending-batch listing for `outreach queue`.
pub fn render_queue(batches: &[OutreachBatch]) -> String {
    if batches.is_empty() {
        return "No pending batches".to_string();
    }

    let mut lines = vec![format!("OUTREACH QUEUE - {} batches", batches.len()), RULE.to_string()];
    for batch in batches {
        lines.push(format!(
            "#{} [{}] {} (max score {})",
            batch.id,
            status_tag(batch.status),
            batch.organization,
            batch.max_score()
        ));
        lines.push(format!("    {}", organizations_line(batch)));
        if let Some(primary) = batch.primary_recipient() {
            let cc = batch.cc_recipients().len();
            if cc > 0 {
                lines.push(format!("    To: {} (+{} cc)", primary.email, cc));
            } else {
                lines.push(format!("    To: {}", primary.email));
            }
        }
    }
    lines.push(RULE.to_string());
    lines.push("Commands: approve --all | approve <id> | skip <id> | preview <id> | send".to_string());
    lines.join("\n")
}

/// Full email preview for `outreach preview <id>`.
pub fn render_preview(batch: &OutreachBatch) -> String {
    let mut lines = vec![format!("EMAIL PREVIEW - batch #{}", batch.id), RULE.to_string()];
    if let Some(primary) = batch.primary_recipient() {
        lines.push(format!("To:      {}", primary.email));
    }
    let cc: Vec<&str> = batch.cc_recipients().iter().map(|r| r.email.as_str()).collect();
    if !cc.is_empty() {
        lines.push(format!("Cc:      {}", cc.join(", ")));
    }
    lines.push(format!("Subject: {}", batch.subject));
    lines.push(String::new());
    lines.push(batch.body.clone());
    lines.push(RULE.to_string());
    lines.push(format!("Status: {}", status_tag(batch.status)));
    if batch.follow_up_count > 0 {
        lines.push(format!("Follow-ups sent: {}", batch.follow_up_count));
    }
    lines.join("\n")
}

/// History listing for `outreach history`.
pub fn render_history(batches: &[OutreachBatch]) -> String {
    if batches.is_empty() {
        return "No outreach history".to_string();
    }

    let mut lines = vec![format!("Outreach history (last {})", batches.len()), RULE.to_string()];
    for batch in batches {
        let date = batch
            .sent_at
            .unwrap_or(batch.created_at)
            .format("%Y-%m-%d")
            .to_string();
        lines.push(format!(
            "#{:>4} | {} | {:<8} | {} | {}",
            batch.id,
            date,
            status_tag(batch.status),
            batch.organization,
            organizations_line(batch)
        ));
    }
    lines.join("\n")
}

/// Blocklist listing for `outreach blocklist`.
pub fn render_blocklist(entries: &[BlocklistEntry]) -> String {
    if entries.is_empty() {
        return "Blocklist is empty".to_string();
    }
    let mut lines = vec![format!("Blocklist ({} entries)", entries.len())];
    for entry in entries {
        lines.push(format!(
            "  {} ({}) - {}",
            entry.email,
            entry.reason,
            entry.added_at.format("%Y-%m-%d")
        ));
    }
    lines.join("\n")
}

/// Detailed statistics for `outreach stats`.
pub fn render_stats(
    stats: &PipelineStats,
    recent_replies: &[OutreachBatch],
    followups_due: &[(OutreachBatch, u32)],
) -> String {
    let mut lines = vec![
        "PIPELINE".to_string(),
        RULE.to_string(),
        format!("Queued: {}", stats.queued),
        format!("Approved: {}", stats.approved),
        format!("Awaiting reply: {}", stats.awaiting_reply),
        format!("Replied: {}", stats.replied),
        format!("Closed: {}", stats.closed),
        format!("Sent today: {}", stats.sent_today),
        format!("Replied today: {}", stats.replied_today),
        format!("Response rate: {:.1}%", stats.response_rate),
    ];

    if !recent_replies.is_empty() {
        lines.push(String::new());
        lines.push("RECENT REPLIES".to_string());
        lines.push(RULE.to_string());
        for batch in recent_replies {
            let date = batch
                .replied_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            lines.push(format!(
                "  {}: {} ({})",
                batch.organization,
                organizations_line(batch),
                date
            ));
        }
    }

    if !followups_due.is_empty() {
        lines.push(String::new());
        lines.push(format!("FOLLOW-UPS DUE: {}", followups_due.len()));
        lines.push(RULE.to_string());
        for (batch, n) in followups_due.iter().take(5) {
            lines.push(format!(
                "  #{} {} (follow-up #{n})",
                batch.id, batch.organization
            ));
        }
        if followups_due.len() > 5 {
            lines.push(format!("  ... and {} more", followups_due.len() - 5));
        }
    }

    lines.join("\n")
}

/// One-line-per-batch results for `outreach send` / `followups`.
pub fn render_send_report(report: &manager::SendReport, dry_run: bool) -> String {
    let mut lines = Vec::new();
    if dry_run {
        lines.push("DRY RUN - no emails sent".to_string());
    }
    if let Some(error) = &report.config_error {
        lines.push(format!("Error: {error}"));
        return lines.join("\n");
    }
    if report.candidates == 0 {
        lines.push("No pending batches".to_string());
        return lines.join("\n");
    }

    lines.push(format!(
        "Sent: {}  Failed: {}  Skipped (warm-up): {}",
        report.sent, report.failed, report.skipped_warmup
    ));
    if let Some(halted) = &report.halted {
        lines.push(format!("Halted: {halted}"));
    }
    for detail in &report.details {
        let line = match &detail.outcome {
            manager::BatchSendOutcome::Sent { to, .. } => {
                format!("  #{}: sent to {to}", detail.batch_id)
            }
            manager::BatchSendOutcome::DryRun { to } => {
                format!("  #{}: would send to {to}", detail.batch_id)
            }
            manager::BatchSendOutcome::Skipped(deferral) => {
                format!("  #{}: skipped - {deferral}", detail.batch_id)
            }
            manager::BatchSendOutcome::SkippedMaxSends => {
                format!("  #{}: skipped - max sends per run reached", detail.batch_id)
            }
            manager::BatchSendOutcome::Failed { error, bounced } => {
                if *bounced {
                    format!("  #{}: bounced - {error}", detail.batch_id)
                } else {
                    format!("  #{}: failed - {error}", detail.batch_id)
                }
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Results of the follow-up stage.
pub fn render_followup_report(report: &crate::followup::FollowupReport, dry_run: bool) -> String {
    use crate::followup::FollowupOutcome;

    if report.due == 0 {
        return "No follow-ups due".to_string();
    }

    let mut lines = Vec::new();
    if dry_run {
        lines.push("DRY RUN - no emails sent".to_string());
    }
    lines.push(format!(
        "Follow-ups due: {}  Sent: {}  Failed: {}  Skipped (warm-up): {}",
        report.due, report.sent, report.failed, report.skipped_warmup
    ));
    if let Some(halted) = &report.halted {
        lines.push(format!("Halted: {halted}"));
    }
    for detail in &report.details {
        let line = match &detail.outcome {
            FollowupOutcome::Sent { to } => format!(
                "  #{} follow-up #{}: sent to {to}",
                detail.batch_id, detail.followup_number
            ),
            FollowupOutcome::DryRun { to } => format!(
                "  #{} follow-up #{}: would send to {to}",
                detail.batch_id, detail.followup_number
            ),
            FollowupOutcome::Skipped(deferral) => {
                format!("  #{}: skipped - {deferral}", detail.batch_id)
            }
            FollowupOutcome::Failed { error, .. } => {
                format!("  #{}: failed - {error}", detail.batch_id)
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Results of the qualify/batch stage.
pub fn render_process_report(report: &manager::ProcessReport, dry_run: bool) -> String {
    let mut lines = vec![format!(
        "Opportunities: {}  Qualified: {}  Skipped: {}",
        report.total,
        report.qualified,
        report.rejections.len()
    )];
    if dry_run {
        if report.planned.is_empty() {
            lines.push("Dry run: no batches would be created".to_string());
        } else {
            lines.push(format!(
                "Dry run: would create {} batches ({})",
                report.planned.len(),
                report.planned.join(", ")
            ));
        }
    } else {
        lines.push(format!("Batches created: {}", report.batch_ids.len()));
    }
    for rejection in &report.rejections {
        lines.push(format!(
            "  skipped {} ({}): {}",
            rejection.opportunity_id, rejection.organization, rejection.reason
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpportunitySummary, Recipient, WarmupStats};
    use chrono::Utc;

    fn batch(id: i64, status: BatchStatus) -> OutreachBatch {
        OutreachBatch {
            id,
            organization: "Smith LLP".to_string(),
            status,
            recipients: vec![
                Recipient {
                    name: "Pat".to_string(),
                    email: "pat@smith.co".to_string(),
                    role: String::new(),
                    organization: "Smith LLP".to_string(),
                },
                Recipient {
                    name: "Sam".to_string(),
                    email: "sam@smith.co".to_string(),
                    role: String::new(),
                    organization: "Smith LLP".to_string(),
                },
            ],
            opportunities: vec![OpportunitySummary {
                id: "n-1".to_string(),
                organization_name: "Acme Ltd".to_string(),
                registration_id: "01234567".to_string(),
                category: "Winding-up order".to_string(),
                sector: "Retail".to_string(),
                estimated_assets: vec![],
                score: 72,
                website_url: None,
            }],
            subject: "Expression of Interest - Acme Ltd".to_string(),
            body: "Dear Pat,\n\nBody here.".to_string(),
            created_at: Utc::now(),
            approved_at: None,
            sent_at: None,
            replied_at: None,
            follow_up_count: 0,
            next_follow_up_date: None,
            notes: String::new(),
        }
    }

    #[test]
    fn queue_lists_batches_with_recipients() {
        let text = render_queue(&[batch(7, BatchStatus::Queued)]);
        assert!(text.contains("#7 [queued] Smith LLP (max score 72)"));
        assert!(text.contains("To: pat@smith.co (+1 cc)"));
    }

    #[test]
    fn empty_queue_message() {
        assert_eq!(render_queue(&[]), "No pending batches");
    }

    #[test]
    fn preview_includes_headers_and_body() {
        let text = render_preview(&batch(7, BatchStatus::Approved));
        assert!(text.contains("To:      pat@smith.co"));
        assert!(text.contains("Cc:      sam@smith.co"));
        assert!(text.contains("Subject: Expression of Interest - Acme Ltd"));
        assert!(text.contains("Body here."));
        assert!(text.contains("Status: approved"));
    }

    #[test]
    fn status_mentions_warmup_state() {
        let status = manager::StatusReport {
            date: chrono::Local::now().date_naive(),
            pipeline: PipelineStats::default(),
            warmup: WarmupStats {
                first_send_date: Some(chrono::Local::now().date_naive()),
                age_days: Some(10),
                sent_today: 3,
            },
            daily_cap: Some(15),
            followups_due: 2,
            pending_batches: 1,
        };
        let text = render_status(&status);
        assert!(text.contains("day 10, sent 3 today (limit 15)"));
        assert!(text.contains("Follow-ups due: 2"));
    }
}
