use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub github: GithubConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub web_url: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Overrides the per-user state directory when non-empty.
    pub directory: String,
    pub identity_ttl_days: u64,
    pub identity_max_entries: usize,
    pub summary_ttl_days: u64,
    pub summary_max_entries: usize,
    pub prune_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    /// Where clones live; defaults to `<state dir>/repos` when empty.
    pub repos_dir: String,
    /// Clone from this base instead of the web URL (mirrors, local testing).
    #[serde(default)]
    pub remote_base: String,
    pub kill_grace_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AggregationConfig {
    pub default_limit: usize,
    pub resolve_identities: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GithubConfig {
                api_url: "https://api.github.com".to_string(),
                web_url: "https://github.com".to_string(),
                token: "".to_string(),
            },
            cache: CacheConfig {
                directory: "".to_string(),
                identity_ttl_days: 30,
                identity_max_entries: 20_000,
                summary_ttl_days: 7,
                summary_max_entries: 200,
                prune_interval_secs: 300,
            },
            sync: SyncConfig {
                repos_dir: "".to_string(),
                remote_base: "".to_string(),
                kill_grace_ms: 2_000,
            },
            aggregation: AggregationConfig {
                default_limit: 10,
                resolve_identities: true,
            },
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".commitcensus.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("✅ Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    /// Token from the config file, falling back to `GITHUB_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        if !self.github.token.is_empty() {
            return Some(self.github.token.clone());
        }
        std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
    }

    /// Host part of the web URL, used to recognise reserved emails.
    pub fn web_host(&self) -> String {
        let url = self.github.web_url.trim_end_matches('/');
        let host = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        host.split('/').next().unwrap_or(host).to_lowercase()
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.cache.directory)
    }

    pub fn repos_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.sync.repos_dir)
    }

    pub fn remote_base(&self) -> &str {
        let base = self.sync.remote_base.trim();
        if base.is_empty() {
            &self.github.web_url
        } else {
            base
        }
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.identity_ttl_days * DAY_SECS)
    }

    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.summary_ttl_days * DAY_SECS)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.cache.prune_interval_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.sync.kill_grace_ms)
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("📝 Created default configuration file.");
        println!("📍 Add a GitHub token to raise API rate limits:");
        println!("   commitcensus config set github-token ...");
        println!("or");
        println!("   {}", Config::config_path()?.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("🔧 Current configuration:");
            println!("   API URL: {}", config.github.api_url);
            println!("   Web URL: {}", config.github.web_url);
            println!(
                "   GitHub Token: {}",
                if config.github.token.is_empty() {
                    "Not set"
                } else {
                    "Set"
                }
            );
            println!(
                "   Cache Directory: {}",
                config
                    .cache_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(default)".to_string())
            );
            println!("   Identity TTL (days): {}", config.cache.identity_ttl_days);
            println!("   Summary TTL (days): {}", config.cache.summary_ttl_days);
            println!("   Default Limit: {}", config.aggregation.default_limit);
            println!(
                "   Resolve Identities: {}",
                config.aggregation.resolve_identities
            );
        }
        None => {
            println!("❌ No configuration file found.");
            println!("   Run 'commitcensus config init' to create one.");
        }
    }
    Ok(())
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_default();

    match key {
        "github-token" => config.github.token = value.to_string(),
        "api-url" => config.github.api_url = value.trim_end_matches('/').to_string(),
        "web-url" => config.github.web_url = value.trim_end_matches('/').to_string(),
        "cache-dir" => config.cache.directory = value.to_string(),
        "repos-dir" => config.sync.repos_dir = value.to_string(),
        "remote-base" => config.sync.remote_base = value.trim_end_matches('/').to_string(),
        "identity-ttl-days" => {
            config.cache.identity_ttl_days =
                value.parse::<u64>().context("Invalid number value")?;
        }
        "summary-ttl-days" => {
            config.cache.summary_ttl_days = value.parse::<u64>().context("Invalid number value")?;
        }
        "default-limit" => {
            let limit = value.parse::<usize>().context("Invalid number value")?;
            if limit == 0 {
                anyhow::bail!("default-limit must be at least 1");
            }
            config.aggregation.default_limit = limit;
        }
        "resolve-identities" => {
            config.aggregation.resolve_identities = value
                .parse::<bool>()
                .context("Invalid boolean value. Use 'true' or 'false'")?;
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    config.save(false)?;
    Ok(())
}
