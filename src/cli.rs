use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pyrelay",
    about = "Caching reverse proxy for Python package indexes (Simple Repository API)",
    version,
    long_about = None
)]
pub struct Cli {
    /// Address to bind.
    #[arg(long, env = "PYRELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "PYRELAY_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Root index URL.
    #[arg(long, env = "PYRELAY_INDEX_URL", default_value = "https://pypi.org/simple/")]
    pub index_url: String,

    /// Comma-separated extra index URLs, consulted in order after the root.
    #[arg(long, env = "PYRELAY_EXTRA_INDEX_URLS", default_value = "")]
    pub extra_index_urls: String,

    /// Root index cache time-to-live (seconds).
    #[arg(long, env = "PYRELAY_INDEX_TTL", default_value_t = 1800)]
    pub index_ttl: u64,

    /// Comma-separated TTLs aligned with the extra index URLs (180 each if
    /// unset).
    #[arg(long, env = "PYRELAY_EXTRA_INDEX_TTLS", default_value = "")]
    pub extra_index_ttls: String,

    /// File-cache byte budget; 0 disables file caching.
    #[arg(long, env = "PYRELAY_CACHE_SIZE", default_value_t = 5368709120)]
    pub cache_size: u64,

    /// File-cache directory. A temporary directory is used (and removed on
    /// exit) if unset.
    #[arg(long, env = "PYRELAY_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum time (seconds) to wait on an in-flight download before
    /// redirecting to the upstream URL.
    #[arg(long, env = "PYRELAY_DOWNLOAD_TIMEOUT", default_value_t = 0.9)]
    pub download_timeout: f64,

    /// Upstream connect timeout (seconds).
    #[arg(long, env = "PYRELAY_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<f64>,

    /// Upstream read timeout (seconds).
    #[arg(long, env = "PYRELAY_READ_TIMEOUT")]
    pub read_timeout: Option<f64>,

    /// Disable upstream TLS certificate verification.
    #[arg(long, env = "PYRELAY_DISABLE_INDEX_SSL_VERIFICATION")]
    pub insecure: bool,

    /// Serve cached files as application/octet-stream.
    #[arg(long, env = "PYRELAY_BINARY_FILE_MIME_TYPE")]
    pub binary_file_mime_type: bool,
}
