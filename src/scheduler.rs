//! # Recurrence Scheduler
//! Schedule state lives on the source (`recurring.frequency` and
//! `recurring.nextTriggerTimestamp`). A recurring pass runs the due sources,
//! then re-reads them from the connector and pushes each due source's next
//! trigger past the pass start.
//!
//! Every entry point has an `_at(now)` variant so tests can pin the clock.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::connector::{self, RESULTS, SOURCES};
use crate::engine::{Engine, PassOutcome, RunOptions};
use crate::types::{ResultKind, Source};

/// How often a recurring source re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Biweekly,
    /// One calendar month.
    Monthly,
    /// Explicit interval in minutes (`15m`, `6h`, `3d`).
    Minutes(u32),
}

impl Frequency {
    /// Next trigger after `from`; always strictly later.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Hourly => from + ChronoDuration::hours(1),
            Frequency::Daily => from + ChronoDuration::days(1),
            Frequency::Weekly => from + ChronoDuration::weeks(1),
            Frequency::Biweekly => from + ChronoDuration::weeks(2),
            Frequency::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| from + ChronoDuration::days(30)),
            Frequency::Minutes(m) => from + ChronoDuration::minutes(i64::from(*m)),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Hourly => f.write_str("hourly"),
            Frequency::Daily => f.write_str("daily"),
            Frequency::Weekly => f.write_str("weekly"),
            Frequency::Biweekly => f.write_str("biweekly"),
            Frequency::Monthly => f.write_str("monthly"),
            Frequency::Minutes(m) => write!(f, "{m}m"),
        }
    }
}

fn interval_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s*([mhd])$").expect("interval regex"))
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "hourly" => return Ok(Frequency::Hourly),
            "daily" => return Ok(Frequency::Daily),
            "weekly" => return Ok(Frequency::Weekly),
            "biweekly" => return Ok(Frequency::Biweekly),
            "monthly" => return Ok(Frequency::Monthly),
            _ => {}
        }
        let caps = interval_re()
            .captures(&s)
            .ok_or_else(|| format!("unknown frequency: {s:?}"))?;
        let n: u32 = caps[1].parse().map_err(|_| format!("interval out of range: {s:?}"))?;
        let minutes = match &caps[2] {
            "h" => n.checked_mul(60),
            "d" => n.checked_mul(24 * 60),
            _ => Some(n),
        }
        .ok_or_else(|| format!("interval out of range: {s:?}"))?;
        if minutes == 0 {
            return Err(format!("frequency must be positive: {s:?}"));
        }
        Ok(Frequency::Minutes(minutes))
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Eligibility of `source` at `now`.
///
/// A source without `recurring` is one-shot and always eligible. A recurring
/// source is due when it has a frequency and its next trigger is unset or not
/// in the future.
pub fn is_due(source: &Source, now: DateTime<Utc>) -> bool {
    match &source.recurring {
        None => true,
        Some(r) => r.frequency.is_some() && r.next_trigger_timestamp.map_or(true, |t| t <= now),
    }
}

/// Due for the recurring pass: has a frequency and [`is_due`].
pub fn is_recurring_due(source: &Source, now: DateTime<Utc>) -> bool {
    source.frequency().is_some() && is_due(source, now)
}

/// Set the next trigger of every source in `ids` that still has a frequency.
/// Returns the sources that changed.
pub fn advance_schedule(sources: Vec<Source>, ids: &[String], now: DateTime<Utc>) -> Vec<Source> {
    let mut changed = Vec::new();
    for mut s in sources {
        if !ids.iter().any(|id| *id == s.id) {
            continue;
        }
        if let Some(rec) = s.recurring.as_mut() {
            if let Some(freq) = rec.frequency {
                rec.next_trigger_timestamp = Some(freq.advance(now));
                changed.push(s);
            }
        }
    }
    changed
}

impl Engine {
    /// Recurring pass at the current time.
    pub async fn run_recurring(&self, options: &RunOptions) -> Result<PassOutcome> {
        self.run_recurring_at(Utc::now(), options).await
    }

    /// Recurring pass with `now` as the pass start.
    ///
    /// Runs the due sources (unless `activate_only`), then re-fetches them and
    /// writes the advanced schedule back through the connector.
    pub async fn run_recurring_at(&self, now: DateTime<Utc>, options: &RunOptions) -> Result<PassOutcome> {
        let fetched = connector::fetch_sources(self.connector(), &options.filters).await?;
        let due: Vec<Source> = fetched
            .records
            .into_iter().filter(|s| is_recurring_due(s, now)).collect();
        let due_ids: Vec<String> = due.iter().map(|s| s.id.clone()).collect();

        tracing::info!(target: "scheduler", due = due_ids.len(), activate_only = options.activate_only, "recurring pass");

        let mut outcome = if options.activate_only {
            PassOutcome {
                sources: due,
                ..PassOutcome::default()
            }
        } else {
            let mut o = options.clone();
            o.kind = ResultKind::Recurring;
            self.execute(RESULTS, due, &o).await?
        };

        outcome.errors.splice(0..0, fetched.errors);
        outcome.written += self.reschedule(&due_ids, now).await?;
        Ok(outcome)
    }

    /// Arm recurring sources without running them.
    pub async fn activate_recurring(&self, options: &RunOptions) -> Result<PassOutcome> {
        let mut o = options.clone();
        o.activate_only = true;
        self.run_recurring(&o).await
    }

    // Reads sources fresh: extensions may have mutated the in-memory copies.
    async fn reschedule(&self, ids: &[String], now: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        // Undecodable rows were already reported when the pass selected its sources.
        let fresh = connector::fetch_sources(self.connector(), &[]).await?.records;
        let changed = advance_schedule(fresh, ids, now);
        if changed.is_empty() {
            return Ok(0);
        }
        connector::update_records(self.connector(), SOURCES, &changed).await?;
        for s in &changed {
            tracing::debug!(
                target: "scheduler",
                source = %s.id,
                next = ?s.recurring.as_ref().and_then(|r| r.next_trigger_timestamp),
                "rescheduled"
            );
        }
        Ok(changed.len())
    }
}
