//! Email rendering: single-opportunity, multi-opportunity, and follow-up
//! variants. Bodies are plain text; an HTML alternative stays optional and
//! additive at the transport layer.

use crate::batch::{BatchDraft, UNKNOWN_ORGANIZATION};
use crate::config::{OutreachConfig, SenderIdentity};
use crate::model::{OpportunitySummary, OutreachBatch};

/// A rendered subject/body pair.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

/// Renders outreach emails from the configured sender identity.
pub struct TemplateRenderer {
    sender: SenderIdentity,
}

impl TemplateRenderer {
    pub fn new(config: &OutreachConfig) -> Self {
        Self {
            sender: config.sender.clone(),
        }
    }

    /// Render the initial email for a batch, selecting the single- or
    /// multi-opportunity variant.
    pub fn render_batch(&self, draft: &BatchDraft) -> RenderedEmail {
        if draft.opportunities.len() == 1 {
            self.render_single(draft)
        } else {
            self.render_multi(draft)
        }
    }

    /// Render follow-up `followup_number` for an already-sent batch: a
    /// fresh body under "Re:" + the original subject.
    pub fn render_followup(&self, batch: &OutreachBatch, followup_number: u32) -> RenderedEmail {
        let greeting = greeting_for_organization(&batch.organization);
        let opportunity_ref = if batch.opportunities.len() == 1 {
            batch.opportunities[0].organization_name.clone()
        } else {
            format!("the {} opportunities I mentioned", batch.opportunities.len())
        };

        let body = if followup_number >= 2 {
            format!(
                "Dear {greeting},\n\n\
                 I wanted to follow up one last time regarding {opportunity_ref}.\n\n\
                 If there's an opportunity to discuss or if the assets or business are still \
                 available, I remain interested and can move quickly.\n\n\
                 If this isn't suitable or the opportunity has passed, no need to reply - \
                 I'll remove this from my list.\n\n\
                 {signature}{footer}",
                signature = self.signature(),
                footer = UNSUBSCRIBE_FOOTER,
            )
        } else {
            format!(
                "Dear {greeting},\n\n\
                 I wanted to follow up on my email from last week regarding {opportunity_ref}.\n\n\
                 I remain interested in exploring this opportunity and am happy to work around \
                 your timeline.\n\n\
                 Would a brief call this week be possible?\n\n\
                 {signature}{footer}",
                signature = self.signature(),
                footer = UNSUBSCRIBE_FOOTER,
            )
        };

        RenderedEmail {
            subject: format!("Re: {}", batch.subject),
            body,
            html_body: None,
        }
    }

    fn render_single(&self, draft: &BatchDraft) -> RenderedEmail {
        let opportunity = &draft.opportunities[0];
        let greeting = draft
            .primary_recipient()
            .map(|r| r.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or("Sir/Madam")
            .to_string();

        let reference = if opportunity.registration_id.is_empty() {
            String::new()
        } else {
            format!(" (Ref: {})", opportunity.registration_id)
        };

        let interest = if opportunity.sector.is_empty() {
            format!(
                "I would be interested in discussing: {}.",
                assets_line(opportunity)
            )
        } else {
            format!(
                "As a {} sector opportunity, I would be particularly interested in: {}.",
                opportunity.sector.to_lowercase(),
                assets_line(opportunity)
            )
        };

        let body = format!(
            "Dear {greeting},\n\n\
             I noticed the recent {category} of {company}{reference}.\n\n\
             {interest}\n\n\
             I'm actively acquiring businesses and can move quickly on due diligence. \
             I have funds available for the right opportunity.\n\n\
             Would this be suitable for a brief discussion?\n\n\
             {signature}{footer}",
            category = category_or_default(&opportunity.category),
            company = opportunity.organization_name,
            signature = self.signature(),
            footer = UNSUBSCRIBE_FOOTER,
        );

        RenderedEmail {
            subject: subject_for(&draft.opportunities),
            body,
            html_body: None,
        }
    }

    fn render_multi(&self, draft: &BatchDraft) -> RenderedEmail {
        let greeting = greeting_for_organization(&draft.organization);

        let mut listing = String::new();
        for (i, opportunity) in draft.opportunities.iter().enumerate() {
            listing.push_str(&format!(
                "\n{n}. {company}\n   - Type: {category}\n   - Sector: {sector}\n   - Potential assets: {assets}\n",
                n = i + 1,
                company = opportunity.organization_name,
                category = category_or_default(&opportunity.category),
                sector = if opportunity.sector.is_empty() {
                    "Various"
                } else {
                    &opportunity.sector
                },
                assets = assets_line(opportunity),
            ));
        }

        let body = format!(
            "Dear {greeting},\n\n\
             I noticed your recent appointments and wanted to express interest in the \
             following opportunities:\n\
             {listing}\n\
             I'm actively acquiring businesses in these sectors and can move quickly on due \
             diligence. I have funds available for suitable opportunities.\n\n\
             Would any of these be suitable for a brief discussion?\n\n\
             {signature}{footer}",
            signature = self.signature(),
            footer = UNSUBSCRIBE_FOOTER,
        );

        RenderedEmail {
            subject: subject_for(&draft.opportunities),
            body,
            html_body: None,
        }
    }

    fn signature(&self) -> String {
        let mut signature = format!("Best regards,\n{}", self.sender.name);
        if !self.sender.company.is_empty() {
            signature.push('\n');
            signature.push_str(&self.sender.company);
        }
        if !self.sender.phone.is_empty() {
            signature.push('\n');
            signature.push_str(&self.sender.phone);
        }
        signature
    }
}

const UNSUBSCRIBE_FOOTER: &str =
    "\n\n---\nIf you'd prefer not to receive these emails, simply reply with \"unsubscribe\".";

/// Subject line: organization names of up to two opportunities, then a
/// count for the rest.
fn subject_for(opportunities: &[OpportunitySummary]) -> String {
    match opportunities {
        [only] => format!("Expression of Interest - {}", only.organization_name),
        [first, second] => format!(
            "Expression of Interest - {} & {}",
            first.organization_name, second.organization_name
        ),
        [first, rest @ ..] => format!(
            "Expression of Interest - {} & {} others",
            first.organization_name,
            rest.len()
        ),
        [] => "Expression of Interest".to_string(),
    }
}

fn greeting_for_organization(organization: &str) -> String {
    if organization == UNKNOWN_ORGANIZATION || organization.is_empty() {
        "Sir/Madam".to_string()
    } else {
        format!("{organization} Team")
    }
}

fn category_or_default(category: &str) -> String {
    if category.is_empty() {
        "insolvency proceedings".to_string()
    } else {
        category.to_lowercase()
    }
}

fn assets_line(opportunity: &OpportunitySummary) -> String {
    let named: Vec<&str> = opportunity
        .estimated_assets
        .iter()
        .take(3)
        .map(String::as_str)
        .collect();
    if named.is_empty() {
        "the business and assets".to_string()
    } else {
        named.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchStatus, Recipient};
    use chrono::Utc;

    fn renderer() -> TemplateRenderer {
        let mut config = OutreachConfig::default();
        config.sender.name = "Alex Doe".to_string();
        config.sender.phone = "+44 7700 900000".to_string();
        TemplateRenderer::new(&config)
    }

    fn summary(name: &str) -> OpportunitySummary {
        OpportunitySummary {
            id: format!("n-{name}"),
            organization_name: name.to_string(),
            registration_id: "01234567".to_string(),
            category: "Winding-up order".to_string(),
            sector: "Retail".to_string(),
            estimated_assets: vec!["Stock".to_string()],
            score: 60,
            website_url: None,
        }
    }

    fn draft(opportunities: Vec<OpportunitySummary>) -> BatchDraft {
        BatchDraft {
            organization: "Smith LLP".to_string(),
            recipients: vec![Recipient {
                name: "Pat Smith".to_string(),
                email: "pat@smith.co".to_string(),
                role: String::new(),
                organization: "Smith LLP".to_string(),
            }],
            opportunities,
        }
    }

    #[test]
    fn single_opportunity_subject_and_greeting() {
        let email = renderer().render_batch(&draft(vec![summary("Acme Ltd")]));
        assert_eq!(email.subject, "Expression of Interest - Acme Ltd");
        assert!(email.body.starts_with("Dear Pat Smith,"));
        assert!(email.body.contains("winding-up order"));
        assert!(email.body.contains("(Ref: 01234567)"));
        assert!(email.body.contains("unsubscribe"));
        assert!(email.html_body.is_none());
    }

    #[test]
    fn two_opportunities_join_names() {
        let email = renderer().render_batch(&draft(vec![summary("Acme"), summary("Beta")]));
        assert_eq!(email.subject, "Expression of Interest - Acme & Beta");
        assert!(email.body.starts_with("Dear Smith LLP Team,"));
        assert!(email.body.contains("1. Acme"));
        assert!(email.body.contains("2. Beta"));
    }

    #[test]
    fn many_opportunities_count_the_rest() {
        let email = renderer().render_batch(&draft(vec![
            summary("Acme"),
            summary("Beta"),
            summary("Gamma"),
        ]));
        assert_eq!(email.subject, "Expression of Interest - Acme & 2 others");
    }

    #[test]
    fn followup_prefixes_original_subject() {
        let batch = OutreachBatch {
            id: 1,
            organization: "Smith LLP".to_string(),
            status: BatchStatus::Sent,
            recipients: vec![],
            opportunities: vec![summary("Acme Ltd")],
            subject: "Expression of Interest - Acme Ltd".to_string(),
            body: String::new(),
            created_at: Utc::now(),
            approved_at: None,
            sent_at: Some(Utc::now()),
            replied_at: None,
            follow_up_count: 0,
            next_follow_up_date: None,
            notes: String::new(),
        };

        let first = renderer().render_followup(&batch, 1);
        assert_eq!(first.subject, "Re: Expression of Interest - Acme Ltd");
        assert!(first.body.contains("follow up on my email from last week"));

        let last = renderer().render_followup(&batch, 2);
        assert_eq!(last.subject, "Re: Expression of Interest - Acme Ltd");
        assert!(last.body.contains("one last time"));
        assert!(last.body.contains("no need to reply"));
    }

    #[test]
    fn unknown_organization_gets_neutral_greeting() {
        let mut d = draft(vec![summary("Acme"), summary("Beta")]);
        d.organization = UNKNOWN_ORGANIZATION.to_string();
        let email = renderer().render_batch(&d);
        assert!(email.body.starts_with("Dear Sir/Madam,"));
    }
}
