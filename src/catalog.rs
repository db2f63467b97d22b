//! Remote catalog access.
//!
//! The catalog (`addons.xml`) is downloaded next to its published MD5
//! (`addons.xml.md5`). When the checksum can be fetched, the freshly
//! downloaded bytes must match it; when it cannot, the catalog is used
//! unverified and a warning is logged. Temporary files never outlive the call.

use crate::addon::CatalogEntry;
use crate::config::NetworkConfig;
use crate::descriptor::parse_catalog;
use crate::error::{AddonError, Result};
use crate::version::Version;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const CATALOG_TEMP_NAME: &str = ".addons.xml.new";
const CHECKSUM_TEMP_NAME: &str = ".addons.xml.md5.new";

/// Something that can fetch a URL into a local file.
pub trait Transport {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// URLs of everything published under one catalog base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogUrls {
    base: String,
}

impl CatalogUrls {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn catalog(&self) -> String {
        format!("{}/addons.xml", self.base)
    }

    pub fn checksum(&self) -> String {
        format!("{}/addons.xml.md5", self.base)
    }

    /// `{base}/{id}/{id}-{version}.zip`
    pub fn artifact(&self, id: &str, version: &Version) -> String {
        format!("{}/{}/{}", self.base, id, artifact_file_name(id, version))
    }
}

pub fn artifact_file_name(id: &str, version: &Version) -> String {
    format!("{}-{}.zip", id, version)
}

/// A verified (or knowingly unverified) catalog.
#[derive(Debug, Clone)]
pub struct FetchedCatalog {
    pub bytes: Vec<u8>,
    pub entries: Vec<CatalogEntry>,
    /// MD5 of `bytes`, lowercase hex.
    pub checksum: String,
    /// False when the published checksum could not be retrieved.
    pub verified: bool,
}

impl FetchedCatalog {
    pub fn entry(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Removes the wrapped path when dropped.
pub(crate) struct TempPath(PathBuf);

impl TempPath {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let result = if self.0.is_dir() {
            fs::remove_dir_all(&self.0)
        } else if self.0.exists() {
            fs::remove_file(&self.0)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            tracing::warn!("Failed to remove temporary path {:?}: {}", self.0, e);
        }
    }
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// First token of an `.md5` file (`<hex>` or `<hex>  <file name>`), lowercased.
/// `None` for an empty body.
fn published_digest(contents: &str) -> Option<String> {
    contents.split_whitespace().next().map(str::to_ascii_lowercase)
}

/// Body of the published checksum, or `None` when it cannot be retrieved.
fn fetch_published_checksum(transport: &dyn Transport, url: &str, work_dir: &Path) -> Option<String> {
    let temp = TempPath::new(work_dir.join(CHECKSUM_TEMP_NAME));
    if let Err(e) = transport.download(url, temp.path()) {
        tracing::warn!(
            "Unable to download {}, so the catalog cannot be checked: {}",
            url,
            e
        );
        return None;
    }

    match fs::read(temp.path()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!("Unable to read downloaded checksum {:?}: {}", temp.path(), e);
            None
        }
    }
}

/// Downloads, verifies and parses the catalog. `work_dir` holds the temporary
/// files and must exist.
pub fn fetch_catalog(transport: &dyn Transport, urls: &CatalogUrls, work_dir: &Path) -> Result<FetchedCatalog> {
    let catalog_url = urls.catalog();
    let temp = TempPath::new(work_dir.join(CATALOG_TEMP_NAME));

    tracing::debug!("Downloading catalog {}", catalog_url);
    transport.download(&catalog_url, temp.path())?;
    let bytes = fs::read(temp.path())
        .map_err(|e| AddonError::io(format!("Failed to read downloaded catalog {:?}", temp.path()), e))?;
    let actual = md5_hex(&bytes);

    // A retrieved checksum must match, whatever it contains
    let published = fetch_published_checksum(transport, &urls.checksum(), work_dir);
    if let Some(body) = &published {
        let expected = published_digest(body);
        if expected.as_deref() != Some(actual.as_str()) {
            tracing::debug!("MD5 mismatch [{}] != [{}]", body.trim(), actual);
            return Err(AddonError::Integrity(format!(
                "catalog checksum mismatch: published {:?}, downloaded {}",
                expected.unwrap_or_default(),
                actual
            )));
        }
    }

    let entries = parse_catalog(&bytes)?;
    tracing::info!(
        entries = entries.len(),
        verified = published.is_some(),
        "Fetched add-on catalog"
    );

    Ok(FetchedCatalog {
        bytes,
        entries,
        checksum: actual,
        verified: published.is_some(),
    })
}

/// Server errors may go away on their own; client errors will not.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
}

/// Blocking HTTP transport with a per-request timeout and bounded retries.
/// `file://` URLs are read from the local filesystem.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    max_retries: u32,
    backoff: Duration,
}

/// One failed attempt and whether it is worth repeating.
struct AttemptError {
    error: AddonError,
    transient: bool,
}

impl HttpTransport {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("scraperdepot/", env!("CARGO_PKG_VERSION")))
            .timeout(network.timeout())
            .build()
            .map_err(|e| AddonError::Network {
                url: String::new(),
                message: format!("unable to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_retries: network.max_retries,
            backoff: network.backoff(),
        })
    }

    fn classify(url: &str, e: reqwest::Error) -> AttemptError {
        if e.is_timeout() {
            AttemptError {
                error: AddonError::NetworkTimeout { url: url.to_string() },
                transient: true,
            }
        } else {
            AttemptError {
                transient: e.is_connect() || e.is_request(),
                error: AddonError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            }
        }
    }

    fn fetch_once(&self, url: &str) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self.client.get(url).send().map_err(|e| Self::classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError {
                error: AddonError::Network {
                    url: url.to_string(),
                    message: format!("server answered {}", status),
                },
                transient: is_transient_status(status),
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Self::classify(url, e))
    }

    /// Wait before retry number `attempt + 1`: `backoff * 2^attempt`.
    fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn copy_local(url: &str, path: &str, dest: &Path) -> Result<()> {
        fs::copy(path, dest).map(|_| ()).map_err(|e| AddonError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(path) = url.strip_prefix("file://") {
            return Self::copy_local(url, path, dest);
        }

        let mut attempt = 0;
        let bytes = loop {
            match self.fetch_once(url) {
                Ok(bytes) => break bytes,
                Err(failure) if failure.transient && attempt < self.max_retries => {
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(
                        "Download of {} failed ({}), retrying in {:?}",
                        url,
                        failure.error,
                        delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(failure) => return Err(failure.error),
            }
        };

        fs::write(dest, &bytes).map_err(|e| AddonError::io(format!("Failed to write {:?}", dest), e))
    }
}
