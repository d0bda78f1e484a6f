use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::app_cache_dir;

const CACHE_VERSION: u32 = 1;
const CACHE_SUBDIR: &str = "archives";

/// On-disk store of downloaded archives plus their HTTP validators.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    version: u32,
    url: String,
    etag: Option<String>,
    last_modified: Option<String>,
    fetched_at: u64,
}

impl ArchiveCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_location() -> Option<Self> {
        app_cache_dir().map(|dir| Self::new(dir.join(CACHE_SUBDIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", url_key(url)))
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", url_key(url)))
    }

    fn load(&self, url: &str) -> Option<(CacheMeta, Vec<u8>)> {
        let raw = fs::read_to_string(self.meta_path(url)).ok()?;
        let meta = serde_json::from_str::<CacheMeta>(&raw).ok()?;
        if meta.version != CACHE_VERSION || meta.url != url {
            return None;
        }
        let body = fs::read(self.body_path(url)).ok()?;
        Some((meta, body))
    }

    fn store(&self, meta: &CacheMeta, body: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create archive cache dir {}", self.dir.display()))?;
        let body_path = self.body_path(&meta.url);
        let tmp = body_path.with_extension("bin.tmp");
        fs::write(&tmp, body).context("write cached archive")?;
        fs::rename(&tmp, &body_path).context("swap cached archive")?;

        let meta_path = self.meta_path(&meta.url);
        let tmp = meta_path.with_extension("json.tmp");
        let json = serde_json::to_string(meta).context("serialize archive cache meta")?;
        fs::write(&tmp, json).context("write archive cache meta")?;
        fs::rename(&tmp, &meta_path).context("swap archive cache meta")?;
        Ok(())
    }
}

/// Download `url`, revalidating against the cached copy when one exists.
pub fn fetch_bytes_cached(
    client: &Client,
    url: &str,
    cache: Option<&ArchiveCache>,
) -> Result<Vec<u8>> {
    let cached = cache.and_then(|c| c.load(url));

    let mut req = client.get(url);
    if let Some((meta, _)) = cached.as_ref() {
        if let Some(etag) = meta.etag.as_ref() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = meta.last_modified.as_ref() {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let resp = req.send().context("archive request failed")?;
    let status = resp.status();
    let headers = resp.headers().clone();
    if status == StatusCode::NOT_MODIFIED {
        let Some((meta, body)) = cached else {
            return Err(anyhow!("received 304 without a cached archive"));
        };
        debug!(url, fetched_at = meta.fetched_at, "archive not modified, reusing cached copy");
        return Ok(body);
    }
    if !status.is_success() {
        return Err(anyhow!("http {status} fetching {url}"));
    }

    let body = resp.bytes().context("failed reading archive body")?.to_vec();
    info!(url, bytes = body.len(), "downloaded archive");

    if let Some(cache) = cache {
        let meta = CacheMeta {
            version: CACHE_VERSION,
            url: url.to_string(),
            etag: header_string(&headers, ETAG),
            last_modified: header_string(&headers, LAST_MODIFIED),
            fetched_at: system_time_to_secs(SystemTime::now()).unwrap_or_default(),
        };
        // A failed cache write only costs a full download next time.
        if let Err(err) = cache.store(&meta, &body) {
            debug!(error = %err, "archive cache write failed");
        }
    }
    Ok(body)
}

fn header_string(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn url_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn system_time_to_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}
