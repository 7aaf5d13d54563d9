//! Configuration: one value built at startup, passed into every component.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use secrecy::SecretString;

/// Who the outreach mail is from. Rendered into templates and SMTP headers.
#[derive(Debug, Clone)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
}

/// SMTP transport settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// From address; defaults to the username when unset.
    pub from_address: String,
    /// Per-transmission timeout.
    pub timeout: Duration,
}

/// Engine configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    /// Path to the engine's SQLite database.
    pub db_path: PathBuf,
    pub sender: SenderIdentity,
    pub smtp: SmtpConfig,

    /// Minimum opportunity score to qualify for outreach.
    pub min_score: i64,
    /// Higher bar applied to low-urgency categories (solvent wind-downs).
    pub low_urgency_min_score: i64,
    /// Days before the same organization may be queued again.
    pub cooldown_days: i64,

    /// Days of week on which sending is permitted.
    pub send_days: Vec<Weekday>,
    /// Local time-of-day interval in which sending is permitted.
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Minimum pause after each successful send.
    pub min_send_delay: Duration,

    /// Daily send caps for sender ages <7, <14, <21, <28 days.
    /// Age 28+ is uncapped.
    pub warmup_daily_caps: [u32; 4],

    /// Days after `sent_at` before the first and second follow-up are due.
    pub followup_intervals_days: [i64; 2],
    pub max_followups: u32,

    /// Hold new batches at `queued` until an operator approves them.
    pub require_approval: bool,
    /// Report what would happen without sending or persisting anything.
    pub dry_run: bool,
    /// Redirect all outbound mail to this address (test mode).
    pub test_recipient_override: Option<String>,
    /// Cap on sends per invocation. `None` means unlimited.
    pub max_sends_per_run: Option<u32>,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/outreach.db"),
            sender: SenderIdentity {
                name: String::new(),
                email: String::new(),
                phone: String::new(),
                company: String::new(),
            },
            smtp: SmtpConfig {
                host: "smtp.gmail.com".to_string(),
                port: 587,
                username: String::new(),
                password: SecretString::from(String::new()),
                from_address: String::new(),
                timeout: Duration::from_secs(30),
            },
            min_score: 40,
            low_urgency_min_score: 60,
            cooldown_days: 30,
            send_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            window_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            min_send_delay: Duration::from_secs(120),
            warmup_daily_caps: [5, 15, 30, 50],
            followup_intervals_days: [7, 14],
            max_followups: 2,
            require_approval: false,
            dry_run: false,
            test_recipient_override: None,
            max_sends_per_run: None,
        }
    }
}

impl OutreachConfig {
    /// Build config from `OUTREACH_*` environment variables, with defaults
    /// for everything not set.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let username = env_str("OUTREACH_SMTP_USER").unwrap_or_default();
        let from_address =
            env_str("OUTREACH_SENDER_EMAIL").unwrap_or_else(|| username.clone());

        Self {
            db_path: env_str("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            sender: SenderIdentity {
                name: env_str("OUTREACH_SENDER_NAME").unwrap_or_default(),
                email: from_address.clone(),
                phone: env_str("OUTREACH_SENDER_PHONE").unwrap_or_default(),
                company: env_str("OUTREACH_SENDER_COMPANY").unwrap_or_default(),
            },
            smtp: SmtpConfig {
                host: env_str("OUTREACH_SMTP_HOST").unwrap_or(defaults.smtp.host),
                port: env_parse("OUTREACH_SMTP_PORT").unwrap_or(defaults.smtp.port),
                username,
                password: SecretString::from(
                    env_str("OUTREACH_SMTP_PASSWORD").unwrap_or_default(),
                ),
                from_address,
                timeout: defaults.smtp.timeout,
            },
            min_score: env_parse("OUTREACH_MIN_SCORE").unwrap_or(defaults.min_score),
            low_urgency_min_score: env_parse("OUTREACH_LOW_URGENCY_MIN_SCORE")
                .unwrap_or(defaults.low_urgency_min_score),
            cooldown_days: env_parse("OUTREACH_COOLDOWN_DAYS").unwrap_or(defaults.cooldown_days),
            send_days: env_str("OUTREACH_SEND_DAYS")
                .map(|s| parse_days(&s))
                .unwrap_or(defaults.send_days),
            window_start: env_str("OUTREACH_SEND_START")
                .and_then(|s| parse_time(&s))
                .unwrap_or(defaults.window_start),
            window_end: env_str("OUTREACH_SEND_END")
                .and_then(|s| parse_time(&s))
                .unwrap_or(defaults.window_end),
            min_send_delay: env_parse("OUTREACH_SEND_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_send_delay),
            warmup_daily_caps: [
                env_parse("OUTREACH_WARMUP_W1").unwrap_or(defaults.warmup_daily_caps[0]),
                env_parse("OUTREACH_WARMUP_W2").unwrap_or(defaults.warmup_daily_caps[1]),
                env_parse("OUTREACH_WARMUP_W3").unwrap_or(defaults.warmup_daily_caps[2]),
                env_parse("OUTREACH_WARMUP_W4").unwrap_or(defaults.warmup_daily_caps[3]),
            ],
            followup_intervals_days: [
                env_parse("OUTREACH_FOLLOWUP_1_DAYS")
                    .unwrap_or(defaults.followup_intervals_days[0]),
                env_parse("OUTREACH_FOLLOWUP_2_DAYS")
                    .unwrap_or(defaults.followup_intervals_days[1]),
            ],
            max_followups: env_parse("OUTREACH_MAX_FOLLOWUPS").unwrap_or(defaults.max_followups),
            require_approval: env_bool("OUTREACH_REQUIRE_APPROVAL"),
            dry_run: env_bool("OUTREACH_DRY_RUN"),
            test_recipient_override: env_str("OUTREACH_TEST_RECIPIENT"),
            max_sends_per_run: env_parse::<u32>("OUTREACH_MAX_SENDS").filter(|&n| n > 0),
        }
    }

    /// Whether SMTP credentials are present. Sending is impossible without
    /// them; qualification and batching still work.
    pub fn smtp_configured(&self) -> bool {
        use secrecy::ExposeSecret;
        !self.smtp.username.is_empty() && !self.smtp.password.expose_secret().is_empty()
    }

    /// Configuration problems worth reporting at startup. Only credential
    /// problems are fatal, and only for send attempts.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.smtp.username.is_empty() {
            problems.push("OUTREACH_SMTP_USER not set".to_string());
        }
        if !self.smtp_configured() {
            problems.push("OUTREACH_SMTP_PASSWORD not set".to_string());
        }
        if self.sender.name.is_empty() {
            problems.push("OUTREACH_SENDER_NAME not set".to_string());
        }
        if self.window_start >= self.window_end {
            problems.push(format!(
                "send window start {} is not before end {}",
                self.window_start, self.window_end
            ));
        }
        problems
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

/// Parse a comma-separated day list like "Mon,Tue,Wed". Unknown entries are
/// dropped.
pub fn parse_days(s: &str) -> Vec<Weekday> {
    s.split(',')
        .filter_map(|d| match d.trim().to_lowercase().as_str() {
            "mon" | "monday" => Some(Weekday::Mon),
            "tue" | "tuesday" => Some(Weekday::Tue),
            "wed" | "wednesday" => Some(Weekday::Wed),
            "thu" | "thursday" => Some(Weekday::Thu),
            "fri" | "friday" => Some(Weekday::Fri),
            "sat" | "saturday" => Some(Weekday::Sat),
            "sun" | "sunday" => Some(Weekday::Sun),
            _ => None,
        })
        .collect()
}

/// Parse an "HH:MM" wall-clock time.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_warmup_tiers() {
        let config = OutreachConfig::default();
        assert_eq!(config.warmup_daily_caps, [5, 15, 30, 50]);
        assert_eq!(config.followup_intervals_days, [7, 14]);
        assert_eq!(config.max_followups, 2);
        assert_eq!(config.min_score, 40);
        assert_eq!(config.cooldown_days, 30);
    }

    #[test]
    fn parse_days_mixed_formats() {
        assert_eq!(
            parse_days("Mon, tue,WEDNESDAY"),
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed]
        );
        assert!(parse_days("holiday").is_empty());
    }

    #[test]
    fn parse_time_valid_and_invalid() {
        assert_eq!(parse_time("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time(" 17:00 "), NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("nope"), None);
    }

    #[test]
    fn smtp_configured_requires_both_credentials() {
        let mut config = OutreachConfig::default();
        assert!(!config.smtp_configured());
        config.smtp.username = "user@example.com".to_string();
        assert!(!config.smtp_configured());
        config.smtp.password = SecretString::from("hunter2".to_string());
        assert!(config.smtp_configured());
    }

    #[test]
    fn validate_flags_inverted_window() {
        let mut config = OutreachConfig::default();
        config.window_start = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("send window")));
    }
}
