use super::*;
use crate::types::{PeriodContributor, PeriodRecord, SeriesPoint};
use chrono::TimeZone;

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn window(first: DateTime<Utc>, last: DateTime<Utc>) -> CommitWindow {
    CommitWindow { first, last }
}

fn labels(periods: &[PeriodDefinition]) -> Vec<&str> {
    periods.iter().map(|p| p.label.as_str()).collect()
}

fn assert_contiguous(periods: &[PeriodDefinition], w: &CommitWindow) {
    assert!(!periods.is_empty());
    assert!(periods[0].start <= w.first);
    assert!(periods[periods.len() - 1].end > w.last);
    for pair in periods.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
    for p in periods {
        assert!(p.start < p.end);
    }
}

// ============================================================================
// Window and interval
// ============================================================================

#[test]
fn window_spans_min_and_max_timestamps() {
    let w = parse_window("1700000000\n1600000000\n\n1650000000\n").unwrap();
    assert_eq!(w.first.timestamp(), 1_600_000_000);
    assert_eq!(w.last.timestamp(), 1_700_000_000);
}

#[test]
fn empty_history_is_a_window_error() {
    assert!(matches!(parse_window(""), Err(CensusError::Window(_))));
    assert!(matches!(parse_window("\n  \n"), Err(CensusError::Window(_))));
}

#[test]
fn garbage_timestamp_is_a_window_error() {
    let err = parse_window("1700000000\nyesterday\n").unwrap_err();
    assert!(matches!(err, CensusError::Window(ref msg) if msg.contains("yesterday")));
}

#[test]
fn interval_switches_at_one_year() {
    let start = utc(2022, 1, 1);
    assert_eq!(window(start, start).interval(), Interval::Month);
    assert_eq!(
        window(start, start + TimeDelta::days(364)).interval(),
        Interval::Month
    );
    assert_eq!(
        window(start, start + TimeDelta::days(365)).interval(),
        Interval::Year
    );
}

// ============================================================================
// Periods
// ============================================================================

#[test]
fn monthly_periods_cover_window() {
    let w = window(utc(2023, 3, 1), utc(2023, 11, 20));
    assert_eq!(w.interval(), Interval::Month);

    let periods = build_periods(&w, Interval::Month);
    assert_eq!(
        labels(&periods),
        [
            "2023-03", "2023-04", "2023-05", "2023-06", "2023-07", "2023-08", "2023-09",
            "2023-10", "2023-11"
        ]
    );
    assert_contiguous(&periods, &w);
    assert_eq!(periods[8].end, utc(2023, 12, 1));
}

#[test]
fn yearly_periods_cover_window() {
    let w = window(utc(2018, 1, 5), utc(2023, 6, 1));
    assert_eq!(w.interval(), Interval::Year);

    let periods = build_periods(&w, Interval::Year);
    assert_eq!(labels(&periods), ["2018", "2019", "2020", "2021", "2022", "2023"]);
    assert_contiguous(&periods, &w);
    assert_eq!(periods[0].start, utc(2018, 1, 1));
    assert_eq!(periods[5].end, utc(2024, 1, 1));
}

#[test]
fn months_roll_over_year_boundary() {
    let w = window(utc(2022, 11, 15), utc(2023, 2, 3));
    let periods = build_periods(&w, Interval::Month);
    assert_eq!(labels(&periods), ["2022-11", "2022-12", "2023-01", "2023-02"]);
    assert_contiguous(&periods, &w);
}

#[test]
fn single_instant_window_has_one_period() {
    let at = utc(2024, 7, 9) + TimeDelta::hours(13);
    let w = window(at, at);
    let periods = build_periods(&w, Interval::Month);
    assert_eq!(labels(&periods), ["2024-07"]);
    assert_contiguous(&periods, &w);
}

#[test]
fn commit_exactly_at_bucket_start_gets_its_own_period() {
    let w = window(utc(2023, 1, 20), utc(2023, 3, 1));
    let periods = build_periods(&w, Interval::Month);
    assert_eq!(labels(&periods), ["2023-01", "2023-02", "2023-03"]);
}

// ============================================================================
// Shortlog
// ============================================================================

#[test]
fn parses_shortlog_line_with_email() {
    let entry = parse_shortlog_line("    12\tJane Doe <jane@users.noreply.github.com>").unwrap();
    assert_eq!(
        entry,
        ShortlogEntry {
            commits: 12,
            name: "Jane Doe".into(),
            email: "jane@users.noreply.github.com".into(),
        }
    );
}

#[test]
fn parses_shortlog_line_without_email_or_name() {
    let entry = parse_shortlog_line("3\tbuild bot").unwrap();
    assert_eq!(entry.name, "build bot");
    assert_eq!(entry.email, "");

    let entry = parse_shortlog_line("1\t <ci@example.com>").unwrap();
    assert_eq!(entry.name, "ci@example.com");
    assert_eq!(entry.email, "ci@example.com");
}

#[test]
fn rejects_malformed_shortlog_lines() {
    assert_eq!(parse_shortlog_line(""), None);
    assert_eq!(parse_shortlog_line("Jane Doe <jane@example.com>"), None);
    assert_eq!(parse_shortlog_line("many\tJane Doe <jane@example.com>"), None);
}

#[test]
fn shortlog_sorted_by_commits_then_name() {
    let output = "     2\tZed <z@example.com>\n     5\tBob <b@example.com>\n     2\tAmy <a@example.com>\n";
    let names: Vec<String> = parse_shortlog(output).into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["Bob", "Amy", "Zed"]);
}

#[test]
fn split_at_limit_handles_short_lists() {
    let entries = parse_shortlog("3\tA <a@x>\n2\tB <b@x>\n1\tC <c@x>\n");
    let (top, rest) = split_at_limit(entries.clone(), 2);
    assert_eq!(top.len(), 2);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].name, "C");

    let (top, rest) = split_at_limit(entries, 10);
    assert_eq!(top.len(), 3);
    assert!(rest.is_empty());
}

#[test]
fn git_date_is_utc_with_offset() {
    assert_eq!(git_date(utc(2023, 3, 1)), "2023-03-01 00:00:00 +0000");
}

// ============================================================================
// Series
// ============================================================================

fn period_labels() -> Vec<String> {
    vec!["2021".into(), "2022".into(), "2023".into()]
}

#[test]
fn series_include_zero_points_and_below_cut_commits() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "Jane", Some("https://github.com/jane"), 10, true);
    // missed the cut in 2023 but still counts toward the total
    builder.record("2023", "Jane", Some("https://github.com/jane"), 2, false);

    let series = builder.finish();
    assert_eq!(series.len(), 1);
    let jane = &series[0];
    assert_eq!(jane.total, 12);
    assert_eq!(
        jane.values,
        vec![
            SeriesPoint { label: "2021".into(), commits: 10 },
            SeriesPoint { label: "2022".into(), commits: 0 },
            SeriesPoint { label: "2023".into(), commits: 2 },
        ]
    );
}

#[test]
fn identities_that_never_reach_a_cut_are_dropped() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "Jane", None, 10, true);
    builder.record("2021", "Lurker", None, 1, false);
    let names: Vec<String> = builder.finish().into_iter().map(|s| s.name).collect();
    assert_eq!(names, ["Jane"]);
}

#[test]
fn name_keys_are_case_insensitive() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "Jane Doe", None, 3, true);
    builder.record("2022", "jane doe", None, 4, true);
    let series = builder.finish();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "Jane Doe");
    assert_eq!(series[0].total, 7);
}

#[test]
fn rekey_merges_into_existing_profile_series() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "jdoe", Some("https://github.com/jane"), 5, true);
    builder.record("2022", "Jane Doe", None, 3, true);
    assert_eq!(builder.len(), 2);

    assert!(builder.rekey("Jane Doe", "https://github.com/jane"));
    assert!(!builder.rekey("Jane Doe", "https://github.com/jane"));
    assert_eq!(builder.len(), 1);

    let series = builder.finish();
    assert_eq!(series[0].name, "jdoe");
    assert_eq!(series[0].total, 8);
    assert_eq!(series[0].commits_in("2022"), 3);
    assert_eq!(series[0].profile_url.as_deref(), Some("https://github.com/jane"));
}

#[test]
fn rekey_without_existing_profile_attaches_url() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "Jane Doe", None, 3, true);
    assert!(builder.rekey("JANE DOE", "https://github.com/jane"));
    let series = builder.finish();
    assert_eq!(series[0].name, "Jane Doe");
    assert_eq!(series[0].profile_url.as_deref(), Some("https://github.com/jane"));
}

fn row(author: &str, commits: u64, url: Option<&str>) -> PeriodContributor {
    PeriodContributor {
        author: author.into(),
        commits,
        profile_url: url.map(str::to_string),
        email: None,
    }
}

#[test]
fn replay_counts_below_cut_rows_toward_later_top_identities() {
    let mut reused = PeriodRecord::empty(&PeriodDefinition {
        label: "2021".into(),
        start: utc(2021, 1, 1),
        end: utc(2022, 1, 1),
    });
    reused.contributors.push(row("Jane", 5, Some("https://github.com/jane")));
    reused.below_cut.push(row("Bob", 2, None));
    reused.below_cut.push(row("Eve", 1, None));

    let mut builder = SeriesBuilder::new(period_labels());
    builder.replay(&reused);
    builder.record("2023", "Bob", None, 4, true);
    assert!(builder.rekey("Bob", "https://github.com/bob"));

    let series = builder.finish();
    let totals: Vec<(&str, u64)> = series.iter().map(|s| (s.name.as_str(), s.total)).collect();
    // Eve never made a cut
    assert_eq!(totals, [("Bob", 6), ("Jane", 5)]);
    assert_eq!(series[0].commits_in("2021"), 2);
    assert_eq!(series[0].profile_url.as_deref(), Some("https://github.com/bob"));
}

#[test]
fn series_sorted_by_total_then_name() {
    let mut builder = SeriesBuilder::new(period_labels());
    builder.record("2021", "Bob", None, 4, true);
    builder.record("2021", "Amy", None, 4, true);
    builder.record("2022", "Cat", None, 9, true);
    let names: Vec<String> = builder.finish().into_iter().map(|s| s.name).collect();
    assert_eq!(names, ["Cat", "Amy", "Bob"]);
}
