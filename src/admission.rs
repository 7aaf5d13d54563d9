//! Admission gate: send-window policy and warm-up rate policy.
//!
//! Both policies are evaluated immediately before every transmission
//! attempt, never cached from the start of a run, so a long run stops
//! mid-way when the window closes or the daily cap fills. Claiming a
//! warm-up slot is a single atomic statement in the store.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, Timelike};

use crate::config::OutreachConfig;
use crate::error::DatabaseError;
use crate::store::Store;

/// Why an attempt was deferred. A deferral is not a failure; the attempt is
/// naturally retried on the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferral {
    OutsideWindow(String),
    WarmupLimit { sent: u32, cap: u32 },
}

impl std::fmt::Display for Deferral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutsideWindow(reason) => write!(f, "outside send window: {reason}"),
            Self::WarmupLimit { sent, cap } => {
                write!(f, "warm-up limit reached, sent {sent} of {cap} today")
            }
        }
    }
}

/// Result of asking the gate for permission to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A slot was claimed; `sent_today` includes this send.
    Granted { sent_today: u32 },
    Deferred(Deferral),
}

/// Combined send-window and warm-up check.
pub struct AdmissionGate {
    config: OutreachConfig,
    store: Arc<Store>,
}

impl AdmissionGate {
    pub fn new(config: OutreachConfig, store: Arc<Store>) -> Self {
        Self { config, store }
    }

    /// Check the send window at a given instant.
    pub fn window_check(&self, now: DateTime<Local>) -> Result<(), String> {
        let weekday = now.weekday();
        if !self.config.send_days.contains(&weekday) {
            return Err(format!("today ({}) is not a send day", now.format("%a")));
        }

        let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());
        if time < self.config.window_start {
            return Err(format!(
                "before send window (opens {})",
                self.config.window_start.format("%H:%M")
            ));
        }
        if time > self.config.window_end {
            return Err(format!(
                "after send window (closed {})",
                self.config.window_end.format("%H:%M")
            ));
        }
        Ok(())
    }

    /// Daily cap for the given sender age. `None` age means nothing has
    /// been sent yet, so no cap applies yet; age 28+ is uncapped.
    pub fn daily_cap(&self, age_days: Option<i64>) -> Option<u32> {
        let age = age_days?;
        let caps = self.config.warmup_daily_caps;
        match age {
            _ if age < 7 => Some(caps[0]),
            _ if age < 14 => Some(caps[1]),
            _ if age < 21 => Some(caps[2]),
            _ if age < 28 => Some(caps[3]),
            _ => None,
        }
    }

    /// Ask permission for one send, claiming a warm-up slot on success.
    pub async fn admit(&self) -> Result<Admission, DatabaseError> {
        if let Err(reason) = self.window_check(Local::now()) {
            return Ok(Admission::Deferred(Deferral::OutsideWindow(reason)));
        }

        let stats = self.store.warmup_stats().await?;
        let cap = self.daily_cap(stats.age_days);
        match self.store.reserve_send_slot(cap).await? {
            Some(sent_today) => Ok(Admission::Granted { sent_today }),
            None => Ok(Admission::Deferred(Deferral::WarmupLimit {
                sent: stats.sent_today,
                cap: cap.unwrap_or(0),
            })),
        }
    }

    /// Read-only view of what `admit()` would say right now. Used by dry
    /// runs and the status projection; claims nothing.
    pub async fn peek(&self) -> Result<Admission, DatabaseError> {
        if let Err(reason) = self.window_check(Local::now()) {
            return Ok(Admission::Deferred(Deferral::OutsideWindow(reason)));
        }

        let stats = self.store.warmup_stats().await?;
        match self.daily_cap(stats.age_days) {
            Some(cap) if stats.sent_today >= cap => Ok(Admission::Deferred(
                Deferral::WarmupLimit {
                    sent: stats.sent_today,
                    cap,
                },
            )),
            _ => Ok(Admission::Granted {
                sent_today: stats.sent_today,
            }),
        }
    }
}
