//! Static settings, validated once at startup, and the shared upstream HTTP
//! client built from them.

use crate::cache::Cache;
use crate::cli::Cli;
use crate::file_cache::{FileCache, FileCacheError};
use crate::index::IndexCache;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Fallback connect/read timeouts applied when only the other of the pair is
/// configured.
const DEFAULT_CONNECT_TIMEOUT: f64 = 3.1;
const DEFAULT_READ_TIMEOUT: f64 = 20.0;

/// Default TTL for extra indexes (seconds).
const DEFAULT_EXTRA_TTL: u64 = 180;

pub const USER_AGENT: &str = concat!("pyrelay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "number of extra index URLs doesn't equal number of extra index \
         times-to-live: {urls} != {ttls}"
    )]
    ExtraIndexMismatch { urls: usize, ttls: usize },
    #[error("invalid index url '{url}': {source}")]
    InvalidIndexUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid extra index TTL '{0}'")]
    InvalidTtl(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    FileCache(#[from] FileCacheError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub index_url: Url,
    pub index_ttl: Duration,
    pub extra_indexes: Vec<(Url, Duration)>,
    pub cache_size: u64,
    pub cache_dir: Option<PathBuf>,
    pub download_timeout: Duration,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub insecure: bool,
    pub binary_file_mime_type: bool,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_index_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidIndexUrl {
        url: raw.to_string(),
        source,
    })
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let index_url = parse_index_url(&cli.index_url)?;

        let extra_urls = split_csv(&cli.extra_index_urls);
        let extra_ttls = split_csv(&cli.extra_index_ttls);
        let extra_ttls: Vec<u64> = if extra_ttls.is_empty() {
            vec![DEFAULT_EXTRA_TTL; extra_urls.len()]
        } else {
            extra_ttls
                .iter()
                .map(|raw| raw.parse().map_err(|_| ConfigError::InvalidTtl(raw.clone())))
                .collect::<Result<_, _>>()?
        };
        if extra_urls.len() != extra_ttls.len() {
            return Err(ConfigError::ExtraIndexMismatch {
                urls: extra_urls.len(),
                ttls: extra_ttls.len(),
            });
        }
        let extra_indexes = extra_urls
            .iter()
            .zip(&extra_ttls)
            .map(|(raw, ttl)| Ok((parse_index_url(raw)?, Duration::from_secs(*ttl))))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        // Configuring either upstream timeout fills in the other's fallback.
        let (connect_timeout, read_timeout) = match (cli.connect_timeout, cli.read_timeout) {
            (None, None) => (None, None),
            (connect, read) => (
                Some(connect.unwrap_or(DEFAULT_CONNECT_TIMEOUT)),
                Some(read.unwrap_or(DEFAULT_READ_TIMEOUT)),
            ),
        };

        Ok(Self {
            host: cli.host.clone(),
            port: cli.port,
            index_url,
            index_ttl: Duration::from_secs(cli.index_ttl),
            extra_indexes,
            cache_size: cli.cache_size,
            cache_dir: cli.cache_dir.clone(),
            download_timeout: Duration::from_secs_f64(cli.download_timeout),
            connect_timeout: connect_timeout.map(Duration::from_secs_f64),
            read_timeout: read_timeout.map(Duration::from_secs_f64),
            insecure: cli.insecure,
            binary_file_mime_type: cli.binary_file_mime_type,
        })
    }

    /// Shared upstream client: proxy User-Agent, optional timeouts, optional
    /// TLS-verification bypass.
    pub fn build_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(read_timeout) = self.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }
        if self.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder.build()?)
    }

    /// Assemble the full cache stack: root index, extras, file cache.
    pub fn build_cache(&self) -> Result<Cache, ConfigError> {
        let client = self.build_client()?;
        let root = IndexCache::new(self.index_url.clone(), self.index_ttl, client.clone());
        let extras = self
            .extra_indexes
            .iter()
            .map(|(url, ttl)| IndexCache::new(url.clone(), *ttl, client.clone()))
            .collect();
        let file_cache = FileCache::new(
            self.cache_size,
            self.cache_dir.clone(),
            self.download_timeout,
            client,
        )?;
        Ok(Cache::new(root, extras, file_cache))
    }
}
