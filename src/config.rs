mod types;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use take_mut::take;
use tracing::{debug, info};

pub use self::types::*;

fn default_api_base_url() -> Url {
    Config::default().api_base_url
}

fn default_page_size() -> u32 {
    Config::default().page_size
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: Url,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "SubscriptionSyncConfig::default")]
    pub subscription_sync: SubscriptionSyncConfig,

    #[serde(default = "ChannelFeedSyncConfig::default")]
    pub channel_feed_sync: ChannelFeedSyncConfig,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.bind_addr, args.bind_addr);
        set_if_some(&mut self.db_path, args.db_path);
        set_if_some(&mut self.cache_dir, args.cache_dir.map(Some));
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // destructure everything so that new fields can't be forgotten here.
        take(self, |this| Self {
            bind_addr: this.bind_addr,
            db_path: config_dir.join(&this.db_path),
            cache_dir: this.cache_dir.map(|cache_dir| config_dir.join(cache_dir)),
            api_base_url: this.api_base_url,
            page_size: this.page_size,
            subscription_sync: this.subscription_sync,
            channel_feed_sync: this.channel_feed_sync,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:20655".into(),
            db_path: "./tubemirror.sqlite3".into(),
            cache_dir: None,
            api_base_url: Url::parse("https://www.googleapis.com/youtube/v3/")
                .expect("the default API base URL is valid"),
            page_size: 50,
            subscription_sync: Default::default(),
            channel_feed_sync: Default::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SubscriptionSyncConfig {
    #[serde(default = "SubscriptionSyncConfig::default_interval")]
    pub interval: Duration,

    /// Delay before the first run when the task is overdue at startup.
    #[serde(default = "SubscriptionSyncConfig::default_overdue_delay")]
    pub overdue_delay: Duration,
}

impl SubscriptionSyncConfig {
    fn default_interval() -> Duration {
        Duration::from_secs(7 * 24 * 3600)
    }

    fn default_overdue_delay() -> Duration {
        Duration::from_secs(5 * 60)
    }
}

impl Default for SubscriptionSyncConfig {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
            overdue_delay: Self::default_overdue_delay(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ChannelFeedSyncConfig {
    #[serde(default = "ChannelFeedSyncConfig::default_interval")]
    pub interval: Duration,

    /// Delay before the first run when the task is overdue at startup.
    #[serde(default = "ChannelFeedSyncConfig::default_overdue_delay")]
    pub overdue_delay: Duration,

    #[serde(default = "ChannelFeedSyncConfig::default_max_activities_per_channel")]
    pub max_activities_per_channel: usize,
}

impl ChannelFeedSyncConfig {
    fn default_interval() -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn default_overdue_delay() -> Duration {
        Duration::from_secs(60)
    }

    fn default_max_activities_per_channel() -> usize {
        200
    }
}

impl Default for ChannelFeedSyncConfig {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
            overdue_delay: Self::default_overdue_delay(),
            max_activities_per_channel: Self::default_max_activities_per_channel(),
        }
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let mut cfg = parse(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        if let Some(parent) = path.parent() {
            cfg.resolve_relative_paths(parent);
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}

/// The largest page the catalog API serves.
const MAX_PAGE_SIZE: u32 = 50;

fn parse(contents: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(contents)?;
    cfg.validate().context("invalid config")?;

    Ok(cfg)
}

impl Config {
    fn validate(&self) -> Result<()> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            bail!(
                "`page-size` must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            );
        }

        if self.channel_feed_sync.max_activities_per_channel == 0 {
            bail!("`channel-feed-sync.max-activities-per-channel` must be at least 1");
        }

        let intervals = [
            ("subscription-sync", self.subscription_sync.interval),
            ("channel-feed-sync", self.channel_feed_sync.interval),
        ];

        for (section, interval) in intervals {
            if std::time::Duration::from(interval).is_zero() {
                bail!("`{section}.interval` must not be zero");
            }
        }

        Ok(())
    }
}
