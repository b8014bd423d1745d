//! Release feed client for the Kitware CMake GitHub releases.

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::UpgradeConfig;
use crate::download::{TempFileHint, create_client_builder};
use crate::error::{ReleaseError, UpgradeError, UpgradeResult};
use crate::version::Version;

/// Release asset as returned by the GitHub API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Release as returned by the GitHub API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

/// Where to download the installer from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    /// Download URL (redirects are followed)
    pub url: String,
    /// Published file name
    pub file_name: String,
    /// Published SHA256 digest, if any
    pub sha256: Option<String>,
}

impl ArtifactSource {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Temp file naming derived from the published file name.
    pub fn temp_file_hint(&self) -> TempFileHint {
        match self.file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                TempFileHint::new(format!("{stem}-"), format!(".{ext}"))
            }
            _ => TempFileHint::default(),
        }
    }
}

/// The advertised latest release for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestRelease {
    /// Version without the tag's `v` prefix
    pub version: String,
    pub artifact: ArtifactSource,
}

/// Client for the GitHub "latest release" endpoint.
#[derive(Clone)]
pub struct GithubReleaseClient {
    client: Client,
    feed_url: String,
}

impl GithubReleaseClient {
    pub fn new(config: &UpgradeConfig) -> UpgradeResult<Self> {
        let client = create_client_builder(config)
            .build()
            .map_err(UpgradeError::HttpClient)?;
        Ok(Self::with_client(client, config.release_feed_url.clone()))
    }

    pub fn with_client(client: Client, feed_url: String) -> Self {
        Self { client, feed_url }
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    /// Latest release for the running architecture.
    pub async fn latest(&self) -> Result<LatestRelease, ReleaseError> {
        self.latest_for(std::env::consts::ARCH).await
    }

    /// Latest release for `arch` (a `std::env::consts::ARCH` value).
    pub async fn latest_for(&self, arch: &str) -> Result<LatestRelease, ReleaseError> {
        let response = self
            .client
            .get(&self.feed_url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReleaseError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let release: GithubRelease = response.json().await?;
        let version = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name)
            .to_string();
        if Version::parse(&version).is_err() {
            return Err(ReleaseError::InvalidTag {
                tag: release.tag_name,
            });
        }

        let wanted = installer_file_name(&version, arch);
        let asset = release
            .assets
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ReleaseError::NoPlatformAsset {
                platform: format!("linux-{arch}"),
            })?;
        debug!(version = %version, asset = %asset.name, "Resolved latest CMake release");

        let mut artifact = ArtifactSource::new(&asset.browser_download_url, &asset.name);

        let checksum_name = format!("cmake-{version}-SHA-256.txt");
        match release.assets.iter().find(|a| a.name == checksum_name) {
            Some(listing) => {
                artifact.sha256 = self
                    .fetch_checksum(&listing.browser_download_url, &asset.name)
                    .await;
            }
            None => warn!(version = %version, "Release publishes no SHA-256 listing"),
        }

        Ok(LatestRelease { version, artifact })
    }

    /// Look up `file_name` in a `sha256sum`-style listing. Failures only cost
    /// the checksum, not the release.
    async fn fetch_checksum(&self, url: &str, file_name: &str) -> Option<String> {
        let listing = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok()?,
            Ok(response) => {
                warn!(url, status = %response.status(), "Failed to fetch checksum listing");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch checksum listing");
                return None;
            }
        };

        let digest = parse_checksum_listing(&listing, file_name);
        if digest.is_none() {
            warn!(file_name, "Installer missing from checksum listing");
        }
        digest
    }
}

/// Installer file name for a version and architecture, lowercase.
pub(crate) fn installer_file_name(version: &str, arch: &str) -> String {
    format!("cmake-{version}-linux-{arch}.sh")
}

fn parse_checksum_listing(listing: &str, file_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let digest = fields.next()?;
        let name = fields.next()?.trim_start_matches('*');
        name.eq_ignore_ascii_case(file_name)
            .then(|| digest.to_lowercase())
    })
}
