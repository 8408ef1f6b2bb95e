use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commitcensus::config::{self, Config};
use commitcensus::utils::{self, NumberFormatOptions};
use commitcensus::{
    CensusError, CollectOptions, ContributionService, GitOutputCoalescer, ProgressCallback,
    ProgressEvent, RepoContributionSummary,
};

#[derive(Parser)]
#[command(name = "commitcensus")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hide git output and status messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use human-readable number formatting (k, m, b, t)
    #[arg(short = 'H', long, global = true)]
    number_human: bool,

    /// Locale for number formatting (en, de, fr, es, it, ja, ko, zh)
    #[arg(long, global = true)]
    locale: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect per-period contributor statistics for one repository
    Collect(CollectArgs),
    /// Collect statistics for an owner's most-starred repositories
    Top(TopArgs),
    /// Inspect cached summaries
    Cache(CacheArgs),
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct OutputArgs {
    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Pretty-print JSON instead of a single line
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct CollectArgs {
    /// Repository as `owner/name`
    slug: String,

    /// Contributors listed per period (defaults to the configured limit)
    #[arg(long)]
    limit: Option<usize>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct TopArgs {
    /// User or organization whose repositories to analyse
    owner: String,

    /// How many repositories to collect
    #[arg(long, default_value_t = 5)]
    count: usize,

    /// Contributors listed per period (defaults to the configured limit)
    #[arg(long)]
    limit: Option<usize>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    subcommand: CacheSubcommands,
}

#[derive(Subcommand)]
enum CacheSubcommands {
    /// List cached summaries
    Show,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (github-token, api-url, web-url, cache-dir, repos-dir, remote-base,
        /// identity-ttl-days, summary-ttl-days, default-limit, resolve-identities)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    // Load config file to get defaults
    let config = Config::load().unwrap_or(None).unwrap_or_default();

    let format_options = NumberFormatOptions {
        use_human: cli.number_human,
        locale: cli.locale.clone().unwrap_or_else(|| "en".to_string()),
        ..Default::default()
    };

    let result = match cli.command {
        Commands::Collect(args) => {
            run_collect(&config, args, cli.quiet, &format_options).await
        }
        Commands::Top(args) => run_top(&config, args, cli.quiet, &format_options).await,
        Commands::Cache(args) => match args.subcommand {
            CacheSubcommands::Show => run_cache_show(&config).await,
        },
        Commands::Config(args) => handle_config_subcommand(args),
    };

    if let Err(e) = result {
        let cancelled = e
            .downcast_ref::<CensusError>()
            .is_some_and(CensusError::is_cancelled);
        if cancelled {
            eprintln!("Cancelled.");
            std::process::exit(130);
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Cancellation token that fires on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_signal.cancel();
        }
    });
    cancel
}

fn progress_printer(quiet: bool) -> Option<ProgressCallback> {
    if quiet {
        return None;
    }
    let coalescer = Mutex::new(GitOutputCoalescer::new());
    Some(Arc::new(move |event: &ProgressEvent| {
        for line in coalescer.lock().render(event) {
            eprintln!("{line}");
        }
    }))
}

fn collect_options(quiet: bool) -> CollectOptions {
    CollectOptions {
        on_progress: progress_printer(quiet),
        cancel: cancel_on_ctrl_c(),
    }
}

async fn run_collect(
    config: &Config,
    args: CollectArgs,
    quiet: bool,
    format_options: &NumberFormatOptions,
) -> Result<()> {
    let service = ContributionService::new(config).context("Failed to initialise")?;
    let limit = args.limit.unwrap_or(config.aggregation.default_limit);

    let summary = service
        .collect_contribution_summary(&args.slug, limit, collect_options(quiet))
        .await?;

    if args.output.json {
        print_json(&summary, args.output.pretty)?;
    } else {
        print_summary(&summary, format_options);
    }
    Ok(())
}

async fn run_top(
    config: &Config,
    args: TopArgs,
    quiet: bool,
    format_options: &NumberFormatOptions,
) -> Result<()> {
    let service = ContributionService::new(config).context("Failed to initialise")?;
    let limit = args.limit.unwrap_or(config.aggregation.default_limit);

    let summaries = service
        .collect_top_repositories(&args.owner, args.count, limit, collect_options(quiet))
        .await?;

    if args.output.json {
        print_json(&summaries, args.output.pretty)?;
    } else if summaries.is_empty() {
        println!("No repositories could be collected for {}.", args.owner);
    } else {
        for summary in &summaries {
            print_summary(summary, format_options);
            println!();
        }
    }
    Ok(())
}

async fn run_cache_show(config: &Config) -> Result<()> {
    let service = ContributionService::new(config).context("Failed to initialise")?;
    let cache = service.summary_cache();
    let entries = cache.entries_list().await;

    if let Some(path) = cache.path() {
        println!("📍 {}", path.display());
    }
    if entries.is_empty() {
        println!("No cached summaries.");
        return Ok(());
    }

    for (key, entry) in entries {
        let summary = &entry.value;
        println!(
            "{}  {:>3} {}s  {} series  cached {}",
            utils::fit_width(&key, 40),
            summary.periods.len(),
            summary.interval,
            summary.series.len(),
            entry.updated_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        simd_json::to_string_pretty(value)?
    } else {
        simd_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn print_summary(summary: &RepoContributionSummary, format_options: &NumberFormatOptions) {
    println!("📦 {}", summary.slug);
    if let Some(description) = &summary.description {
        println!("   {description}");
    }
    if let Some(path) = &summary.repo_path {
        println!("   Clone: {path}");
    }
    let mut facts = Vec::new();
    if let Some(depth) = summary.clone_depth {
        facts.push(format!("{} commits", utils::format_number(depth, format_options)));
    }
    if let Some(size) = summary.disk_size {
        facts.push(utils::format_bytes(size));
    }
    if !facts.is_empty() {
        println!("   {}", facts.join(" · "));
    }
    println!(
        "   {} buckets, commits from {} to {}",
        summary.interval,
        summary.start_date.format("%Y-%m-%d"),
        summary.end_date.format("%Y-%m-%d")
    );

    for period in &summary.periods {
        println!();
        println!("{}", period.label);
        if period.contributors.is_empty() {
            println!("   (no commits)");
        }
        for (rank, contributor) in period.contributors.iter().enumerate() {
            println!(
                "  {:>3}. {} {:>8}  {}",
                rank + 1,
                utils::fit_width(&contributor.author, 28),
                utils::format_number(contributor.commits, format_options),
                contributor.profile_url.as_deref().unwrap_or("")
            );
        }
    }

    if !summary.series.is_empty() {
        println!();
        println!("Overall");
        for series in &summary.series {
            println!(
                "       {} {:>8}  {}",
                utils::fit_width(&series.name, 28),
                utils::format_number(series.total, format_options),
                series.profile_url.as_deref().unwrap_or("")
            );
        }
    }
}

fn handle_config_subcommand(config_args: ConfigArgs) -> Result<()> {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            config::create_default_config(overwrite).context("Error creating config")
        }
        ConfigSubcommands::Show => config::show_config().context("Error showing config"),
        ConfigSubcommands::Set { key, value } => {
            config::set_config_value(&key, &value).context("Error setting config")
        }
    }
}
