//! Period aggregation.
//!
//! Finds the span of a repository's history, cuts it into calendar months or
//! years, counts commits per author in each bucket with `git shortlog`, and
//! folds the per-period rankings into per-contributor time series.

mod series;

#[cfg(test)]
mod tests;

pub use series::{SeriesBuilder, SeriesKey};

use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{CensusError, Result};
use crate::git::{GitCommand, GitRunner};
use crate::progress::Progress;
use crate::types::{Interval, PeriodDefinition};

/// Histories shorter than this are bucketed by month.
const MONTHLY_WINDOW_DAYS: i64 = 365;

/// Earliest and latest commit timestamps across all refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitWindow {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl CommitWindow {
    pub fn interval(&self) -> Interval {
        if self.last - self.first < TimeDelta::days(MONTHLY_WINDOW_DAYS) {
            Interval::Month
        } else {
            Interval::Year
        }
    }
}

/// Parse `git log --format=%ct` output into a window.
pub fn parse_window(output: &str) -> Result<CommitWindow> {
    let mut first: Option<i64> = None;
    let mut last: Option<i64> = None;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let ts: i64 = line
            .parse()
            .map_err(|_| CensusError::Window(format!("unparsable commit timestamp `{line}`")))?;
        first = Some(first.map_or(ts, |f| f.min(ts)));
        last = Some(last.map_or(ts, |l| l.max(ts)));
    }

    let (Some(first), Some(last)) = (first, last) else {
        return Err(CensusError::Window("repository has no commits".to_string()));
    };
    let to_utc = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| CensusError::Window(format!("commit timestamp {ts} out of range")))
    };
    Ok(CommitWindow {
        first: to_utc(first)?,
        last: to_utc(last)?,
    })
}

pub async fn detect_window(
    runner: &GitRunner,
    repo: &Path,
    progress: &Progress,
    cancel: &CancellationToken,
) -> Result<CommitWindow> {
    let cmd = GitCommand::new(["log", "--all", "--format=%ct"])
        .label("git log (window)")
        .current_dir(repo)
        .capture_stdout();
    let output = runner.run(&cmd, progress, cancel).await?;
    parse_window(&output)
}

// =============================================================================
// Periods
// =============================================================================

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn bucket_start(instant: DateTime<Utc>, interval: Interval) -> Option<NaiveDate> {
    match interval {
        Interval::Month => NaiveDate::from_ymd_opt(instant.year(), instant.month(), 1),
        Interval::Year => NaiveDate::from_ymd_opt(instant.year(), 1, 1),
    }
}

fn next_bucket(start: NaiveDate, interval: Interval) -> Option<NaiveDate> {
    match interval {
        Interval::Month if start.month() == 12 => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
        Interval::Month => NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1),
        Interval::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
    }
}

fn label_for(start: NaiveDate, interval: Interval) -> String {
    match interval {
        Interval::Month => start.format("%Y-%m").to_string(),
        Interval::Year => start.format("%Y").to_string(),
    }
}

/// Contiguous half-open buckets covering the whole window.
pub fn build_periods(window: &CommitWindow, interval: Interval) -> Vec<PeriodDefinition> {
    let mut periods = Vec::new();
    let Some(mut start) = bucket_start(window.first, interval) else {
        return periods;
    };

    while start_of(start) <= window.last {
        let Some(end) = next_bucket(start, interval) else {
            break;
        };
        periods.push(PeriodDefinition {
            label: label_for(start, interval),
            start: start_of(start),
            end: start_of(end),
        });
        start = end;
    }
    periods
}

// =============================================================================
// Shortlog
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortlogEntry {
    pub commits: u64,
    pub name: String,
    pub email: String,
}

/// Parse one `git shortlog -sne` line: `<count>\t<name> <<email>>`.
pub fn parse_shortlog_line(line: &str) -> Option<ShortlogEntry> {
    let (count, rest) = line.trim().split_once('\t')?;
    let commits = count.trim().parse().ok()?;
    let rest = rest.trim();

    let (name, email) = match rest.strip_suffix('>').and_then(|r| r.rsplit_once('<')) {
        Some((name, email)) => (name.trim(), email.trim()),
        None => (rest, ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }

    let display = if name.is_empty() { email } else { name };
    Some(ShortlogEntry {
        commits,
        name: display.to_string(),
        email: email.to_string(),
    })
}

/// Parse shortlog output, most commits first, ties broken by name.
pub fn parse_shortlog(output: &str) -> Vec<ShortlogEntry> {
    let mut entries: Vec<ShortlogEntry> = output.lines().filter_map(parse_shortlog_line).collect();
    entries.sort_by(rank_order);
    entries
}

fn rank_order(a: &ShortlogEntry, b: &ShortlogEntry) -> Ordering {
    b.commits
        .cmp(&a.commits)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.email.cmp(&b.email))
}

/// Split ranked entries at the per-period cut.
pub fn split_at_limit(
    mut entries: Vec<ShortlogEntry>,
    limit: usize,
) -> (Vec<ShortlogEntry>, Vec<ShortlogEntry>) {
    let rest = entries.split_off(limit.min(entries.len()));
    (entries, rest)
}

fn git_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S +0000").to_string()
}

/// Per-author commit counts inside `period`, ranked.
pub async fn count_period(
    runner: &GitRunner,
    repo: &Path,
    period: &PeriodDefinition,
    progress: &Progress,
    cancel: &CancellationToken,
) -> Result<Vec<ShortlogEntry>> {
    let until = period.end - TimeDelta::seconds(1);
    let cmd = GitCommand::new([
        "shortlog".to_string(),
        "-sne".to_string(),
        "--all".to_string(),
        format!("--since={}", git_date(period.start)),
        format!("--until={}", git_date(until)),
    ])
    .label(format!("git shortlog {}", period.label))
    .current_dir(repo)
    .capture_stdout();

    let output = runner.run(&cmd, progress, cancel).await?;
    Ok(parse_shortlog(&output))
}
