//! Bounded on-disk cache of package files.
//!
//! Files are stored under `<cache_dir>/<normalized-host>/<url-path>` and
//! downloaded at most once per URL: concurrent requests for the same key
//! coalesce onto a single in-flight download and wait a bounded time for it,
//! falling back to the upstream URL so tail latency stays capped regardless
//! of file size. When the byte budget would be exceeded, least-frequently-hit
//! entries are evicted first, ties broken by smaller size.

use dashmap::DashMap;
use futures::StreamExt;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error};
use url::Url;
use walkdir::WalkDir;

use crate::index::mask_password;

/// Bound on the URL-to-key memoization table.
const KEY_CACHE_SIZE: usize = 8096;

/// Suffix of partially-downloaded files; skipped during startup recovery.
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, thiserror::Error)]
pub enum FileCacheError {
    #[error("failed to prepare cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a cache fetch: a local file, or the upstream URL the caller
/// should redirect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Local(PathBuf),
    Upstream(String),
}

#[derive(Debug)]
struct CachedFile {
    path: PathBuf,
    size: u64,
    n_hits: u64,
}

#[derive(Debug)]
enum FileEntry {
    Cached(CachedFile),
    InFlight(watch::Receiver<bool>),
}

pub struct FileCache {
    max_size: u64,
    cache_dir: PathBuf,
    download_timeout: Duration,
    client: reqwest::Client,
    files: Arc<DashMap<String, FileEntry>>,
    evict_lock: Mutex<()>,
    keys: StdMutex<LruCache<String, String>>,
    /// Present when the directory is ours; dropping it deletes the tree.
    _temp_dir: Option<TempDir>,
}

impl FileCache {
    /// Open a cache with the given byte budget. A provided directory is
    /// created if missing and its existing files are re-discovered; without
    /// one, a temporary directory is used and removed on drop.
    pub fn new(
        max_size: u64,
        cache_dir: Option<PathBuf>,
        download_timeout: Duration,
        client: reqwest::Client,
    ) -> Result<Self, FileCacheError> {
        let (cache_dir, temp_dir) = match cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir).map_err(|source| FileCacheError::CacheDir {
                    path: dir.clone(),
                    source,
                })?;
                (dir, None)
            }
            None => {
                let temp = tempfile::tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let files = Arc::new(DashMap::new());
        populate_from_cache_dir(&files, &cache_dir);

        Ok(Self {
            max_size,
            cache_dir,
            download_timeout,
            client,
            files,
            evict_lock: Mutex::new(()),
            keys: StdMutex::new(LruCache::new(
                NonZeroUsize::new(KEY_CACHE_SIZE).expect("nonzero key cache bound"),
            )),
            _temp_dir: temp_dir,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Total bytes of completed cache entries.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .map(|entry| match entry.value() {
                FileEntry::Cached(file) => file.size,
                FileEntry::InFlight(_) => 0,
            })
            .sum()
    }

    /// Fetch `url` through the cache.
    ///
    /// Returns the local path on a hit or once a download completes within
    /// the wait budget; returns the URL itself when caching is disabled, the
    /// download is still in flight after `download_timeout`, or it failed.
    pub async fn get(&self, url: &str) -> Fetched {
        if self.max_size == 0 {
            return Fetched::Upstream(url.to_string());
        }
        let Ok(parsed) = Url::parse(url) else {
            return Fetched::Upstream(url.to_string());
        };
        let key = self.key_for(url, &parsed);

        loop {
            enum Step {
                Hit(PathBuf),
                Wait(watch::Receiver<bool>),
                Miss,
            }

            let step = match self.files.get_mut(&key) {
                Some(mut entry) => match entry.value_mut() {
                    FileEntry::Cached(file) => {
                        file.n_hits += 1;
                        Step::Hit(file.path.clone())
                    }
                    FileEntry::InFlight(receiver) => Step::Wait(receiver.clone()),
                },
                None => Step::Miss,
            };

            match step {
                Step::Hit(path) => return Fetched::Local(path),
                Step::Wait(mut receiver) => {
                    let _ = tokio::time::timeout(self.download_timeout, receiver.changed()).await;
                    // Completed downloads leave a cached entry; failures
                    // leave nothing; timeouts leave the in-flight marker.
                    return match self.files.get_mut(&key) {
                        Some(mut entry) => match entry.value_mut() {
                            FileEntry::Cached(file) => {
                                file.n_hits += 1;
                                Fetched::Local(file.path.clone())
                            }
                            FileEntry::InFlight(_) => Fetched::Upstream(url.to_string()),
                        },
                        None => Fetched::Upstream(url.to_string()),
                    };
                }
                Step::Miss => {
                    if self.start_download(&key, &parsed) {
                        let _guard = self.evict_lock.lock().await;
                        self.evict_lfu(&parsed).await;
                    }
                }
            }
        }
    }

    /// Cache key for a URL: normalized hostname joined with the URL path
    /// components. Memoized with a bounded insertion-ordered cache.
    fn key_for(&self, raw: &str, url: &Url) -> String {
        if let Some(key) = self
            .keys
            .lock()
            .expect("key cache poisoned")
            .get(raw)
            .cloned()
        {
            return key;
        }
        let key = derive_key(url);
        self.keys
            .lock()
            .expect("key cache poisoned")
            .put(raw.to_string(), key.clone());
        key
    }

    /// Register an in-flight entry for `key` and spawn its download task.
    /// Returns false when another caller won the registration race.
    fn start_download(&self, key: &str, url: &Url) -> bool {
        use dashmap::mapref::entry::Entry;

        let (sender, receiver) = watch::channel(false);
        match self.files.entry(key.to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(vacant) => {
                vacant.insert(FileEntry::InFlight(receiver));
            }
        }

        let path = self.cache_dir.join(key);
        let files = Arc::clone(&self.files);
        let client = self.client.clone();
        let key = key.to_string();
        let url = url.clone();
        tokio::spawn(async move {
            match download_file(&client, &url, &path).await {
                Some(size) => {
                    files.insert(
                        key,
                        FileEntry::Cached(CachedFile {
                            path,
                            size,
                            n_hits: 0,
                        }),
                    );
                }
                // Remove the marker so the next request retries.
                None => {
                    files.remove(&key);
                }
            }
            let _ = sender.send(true);
        });
        true
    }

    /// Evict least-frequently-used entries until the incoming file fits.
    /// Caller holds the eviction mutex; downloads proceed concurrently.
    async fn evict_lfu(&self, url: &Url) {
        let anticipated = match self.client.head(url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                response.content_length().unwrap_or(0)
            }
            _ => 0,
        };

        let mut candidates: Vec<(String, u64, u64)> = self
            .files
            .iter()
            .filter_map(|entry| match entry.value() {
                FileEntry::Cached(file) => {
                    Some((entry.key().clone(), file.n_hits, file.size))
                }
                FileEntry::InFlight(_) => None,
            })
            .collect();
        candidates.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

        let mut existing: u64 = candidates.iter().map(|entry| entry.2).sum();
        let mut candidates = candidates.into_iter();
        while existing + anticipated > self.max_size && existing > 0 {
            let Some((key, _, _)) = candidates.next() else {
                break;
            };
            let Some((_, entry)) = self.files.remove(&key) else {
                continue;
            };
            if let FileEntry::Cached(file) = entry {
                debug!("evicting '{key}' ({} bytes)", file.size);
                let _ = tokio::fs::remove_file(&file.path).await;
                existing = existing.saturating_sub(file.size);
            }
        }
    }
}

/// Normalize a hostname for use as a directory name: every run of
/// non-lowercase-alphanumeric characters becomes a single `-`.
fn normalize_hostname(host: &str) -> String {
    let mut out = String::with_capacity(host.len());
    let mut in_run = false;
    for c in host.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

fn derive_key(url: &Url) -> String {
    let host = normalize_hostname(url.host_str().unwrap_or_default());
    let mut key = host;
    for component in url.path().split('/').filter(|part| !part.is_empty()) {
        key.push('/');
        key.push_str(component);
    }
    key
}

/// Re-discover files left in a user-provided cache directory, keyed by their
/// path relative to it, with hit counts reset.
fn populate_from_cache_dir(files: &DashMap<String, FileEntry>, cache_dir: &Path) {
    for entry in WalkDir::new(cache_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_string_lossy()
            .ends_with(PARTIAL_SUFFIX)
        {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(cache_dir) else {
            continue;
        };
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(
            key,
            FileEntry::Cached(CachedFile {
                path: entry.into_path(),
                size: metadata.len(),
                n_hits: 0,
            }),
        );
    }
}

/// Stream a download to a partial file and rename it into place. Returns the
/// completed size, or `None` on any failure (logged, not propagated: the
/// caller falls back to redirecting).
async fn download_file(client: &reqwest::Client, url: &Url, path: &Path) -> Option<u64> {
    let url_masked = mask_password(url);
    debug!("downloading '{url_masked}' to '{}'", path.display());

    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            error!("failed to download '{url_masked}': {err}");
            return None;
        }
    };
    if !response.status().is_success() {
        error!(
            "failed to download '{url_masked}': status={}",
            response.status()
        );
        return None;
    }

    if let Some(parent) = path.parent()
        && let Err(err) = tokio::fs::create_dir_all(parent).await
    {
        error!("failed to create '{}': {err}", parent.display());
        return None;
    }

    // Single-flight per key makes this partial path exclusive to us.
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result: Result<(), std::io::Error> = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(std::io::Error::other)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, path).await
    }
    .await;

    if let Err(err) = result {
        error!("failed to download '{url_masked}': {err}");
        let _ = tokio::fs::remove_file(&partial).await;
        return None;
    }

    let size = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            error!("failed to stat '{}': {err}", path.display());
            return None;
        }
    };
    debug!("finished downloading '{url_masked}'");
    Some(size)
}
