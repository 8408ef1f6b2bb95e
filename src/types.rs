use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CensusError;

/// `owner/name` identifier for a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = CensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(".git");
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(CensusError::Validation(format!(
                "expected `owner/name`, got `{s}`"
            )));
        };

        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            return Err(CensusError::Validation(format!(
                "`{s}` is not a valid repository slug"
            )));
        }

        Ok(Self::new(owner, name))
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Month,
    Year,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Month => f.write_str("month"),
            Interval::Year => f.write_str("year"),
        }
    }
}

/// Calendar bucket covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodContributor {
    pub author: String,
    pub commits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One period's top contributors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub contributors: Vec<PeriodContributor>,
    /// Everyone else who committed in the period; replayed into series
    /// totals when the period is reused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub below_cut: Vec<PeriodContributor>,
}

impl PeriodRecord {
    pub fn empty(period: &PeriodDefinition) -> Self {
        Self {
            label: period.label.clone(),
            start: period.start,
            end: period.end,
            contributors: Vec::new(),
            below_cut: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub commits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorSeries {
    pub name: String,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    pub values: Vec<SeriesPoint>,
}

impl ContributorSeries {
    pub fn commits_in(&self, label: &str) -> u64 {
        self.values
            .iter()
            .find(|point| point.label == label)
            .map(|point| point.commits)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoContributionSummary {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_depth: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,
    pub interval: Interval,
    /// Earliest commit timestamp across all refs.
    pub start_date: DateTime<Utc>,
    /// Latest commit timestamp across all refs.
    pub end_date: DateTime<Utc>,
    pub periods: Vec<PeriodRecord>,
    pub series: Vec<ContributorSeries>,
}
