use std::collections::HashMap;

use crate::types::{ContributorSeries, PeriodRecord, SeriesPoint};

/// Identity a series is accumulated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesKey {
    Profile(String),
    /// Lowercased display name, used until a profile is known.
    Name(String),
}

impl SeriesKey {
    pub fn for_author(name: &str, profile_url: Option<&str>) -> Self {
        match profile_url {
            Some(url) => SeriesKey::Profile(url.to_string()),
            None => SeriesKey::Name(name.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    name: String,
    profile_url: Option<String>,
    counts: HashMap<String, u64>,
    reached_top: bool,
}

impl Accumulator {
    fn new(name: &str, profile_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            profile_url: profile_url.map(str::to_string),
            counts: HashMap::new(),
            reached_top: false,
        }
    }

    fn absorb(&mut self, other: Accumulator) {
        for (label, commits) in other.counts {
            *self.counts.entry(label).or_default() += commits;
        }
        self.reached_top |= other.reached_top;
    }
}

/// Folds per-period counts into one series per contributor.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuilder {
    labels: Vec<String>,
    series: HashMap<SeriesKey, Accumulator>,
}

impl SeriesBuilder {
    /// `labels` fixes the order (and zero-filling) of every series' values.
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            series: HashMap::new(),
        }
    }

    /// Add `commits` for `author` in period `label`.
    pub fn record(
        &mut self,
        label: &str,
        author: &str,
        profile_url: Option<&str>,
        commits: u64,
        in_top: bool,
    ) {
        let key = SeriesKey::for_author(author, profile_url);
        let acc = self
            .series
            .entry(key)
            .or_insert_with(|| Accumulator::new(author, profile_url));
        *acc.counts.entry(label.to_string()).or_default() += commits;
        acc.reached_top |= in_top;
    }

    /// Re-add every row of an already aggregated period, top rows and
    /// below-cut rows alike.
    pub fn replay(&mut self, record: &PeriodRecord) {
        for row in &record.contributors {
            self.record(&record.label, &row.author, row.profile_url.as_deref(), row.commits, true);
        }
        for row in &record.below_cut {
            self.record(&record.label, &row.author, row.profile_url.as_deref(), row.commits, false);
        }
    }

    /// Move a name-keyed series under its newly resolved profile, merging
    /// with any series already keyed by that profile.
    pub fn rekey(&mut self, author: &str, profile_url: &str) -> bool {
        let Some(mut moved) = self.series.remove(&SeriesKey::Name(author.to_lowercase())) else {
            return false;
        };
        match self.series.get_mut(&SeriesKey::Profile(profile_url.to_string())) {
            Some(existing) => existing.absorb(moved),
            None => {
                moved.profile_url = Some(profile_url.to_string());
                self.series
                    .insert(SeriesKey::Profile(profile_url.to_string()), moved);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Series for identities that reached a cut, largest total first.
    pub fn finish(self) -> Vec<ContributorSeries> {
        let labels = self.labels;
        let mut out: Vec<ContributorSeries> = self
            .series
            .into_values()
            .filter(|acc| acc.reached_top)
            .map(|acc| {
                let values: Vec<SeriesPoint> = labels
                    .iter()
                    .map(|label| SeriesPoint {
                        label: label.clone(),
                        commits: acc.counts.get(label).copied().unwrap_or(0),
                    })
                    .collect();
                ContributorSeries {
                    total: acc.counts.values().sum(),
                    name: acc.name,
                    profile_url: acc.profile_url,
                    values,
                }
            })
            .collect();
        out.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
        out
    }
}
