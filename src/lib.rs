//! Per-period commit contribution statistics.
//!
//! [`ContributionService::collect_contribution_summary`] syncs a local clone of
//! a hosted repository, buckets its history into months or years, ranks the
//! contributors of each bucket, and resolves their hosting-site profiles. The
//! identity lookups and finished summaries are kept in [`PersistentCache`]
//! files so repeated runs only redo what changed.

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod identity;
pub mod persistent_cache;
pub mod progress;
mod reqwest_simd_json;
pub mod summary;
pub mod sync;
pub mod types;
pub mod utils;

pub use error::{CensusError, Result};
pub use persistent_cache::{CacheEntry, CacheOptions, PersistentCache};
pub use progress::{GitOutputCoalescer, GitStream, Progress, ProgressCallback, ProgressEvent};
pub use summary::{CollectOptions, ContributionService};
pub use types::{
    ContributorSeries, Interval, PeriodContributor, PeriodRecord, RepoContributionSummary,
    RepoSlug, SeriesPoint,
};
