//! Release authority client. Every failure collapses into "no update" so a
//! connectivity problem never reaches startup.

use std::cmp::Ordering;

use reqwest::{header, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::{RELEASE_CHECK_TIMEOUT, UPDATER_USER_AGENT};

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const INSTALLER_EXTENSION: &str = ".exe";
const INSTALLER_MARKER: &str = "setup";
const ARCHIVE_EXTENSION: &str = ".zip";
const ARCHIVE_MARKER: &str = "update";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Installer,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: Url,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub version: String,
    pub changelog: String,
    pub asset: Option<ReleaseAsset>,
    pub force_update: bool,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateManifest {
    latest_version: String,
    #[serde(default)]
    update_available: Option<bool>,
    #[serde(default)]
    changelog: String,
    #[serde(default)]
    download_url: String,
    #[serde(default)]
    file_size: u64,
    #[serde(default)]
    force_update: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReleaseFeed {
    Github(GithubRelease),
    Manifest(UpdateManifest),
}

/// Strips a leading `v` or `v.` from a release tag.
pub fn normalize_version_tag(tag: &str) -> &str {
    let trimmed = tag.trim();
    let without_v = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    without_v.strip_prefix('.').unwrap_or(without_v)
}

fn version_components(version: &str) -> Vec<u64> {
    normalize_version_tag(version)
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Component-wise numeric comparison; missing trailing components count as
/// zero and non-numeric components count as zero.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = version_components(left);
    let right = version_components(right);
    let depth = left.len().max(right.len());
    for index in 0..depth {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

fn classify_asset_name(name: &str) -> Option<ArtifactKind> {
    let lowered = name.to_ascii_lowercase();
    if lowered.ends_with(INSTALLER_EXTENSION) && lowered.contains(INSTALLER_MARKER) {
        Some(ArtifactKind::Installer)
    } else if lowered.ends_with(ARCHIVE_EXTENSION) && lowered.contains(ARCHIVE_MARKER) {
        Some(ArtifactKind::Archive)
    } else {
        None
    }
}

/// Picks the installer when one is published, otherwise the update archive.
pub fn select_asset<'a, I>(assets: I) -> Option<ReleaseAsset>
where
    I: IntoIterator<Item = (&'a str, &'a str, u64)>,
{
    let mut archive: Option<ReleaseAsset> = None;
    for (name, url, size_bytes) in assets {
        let Some(kind) = classify_asset_name(name) else {
            continue;
        };
        let Ok(url) = Url::parse(url) else {
            continue;
        };
        let asset = ReleaseAsset {
            name: name.to_string(),
            url,
            size_bytes,
            kind,
        };
        match kind {
            ArtifactKind::Installer => return Some(asset),
            ArtifactKind::Archive if archive.is_none() => archive = Some(asset),
            ArtifactKind::Archive => {}
        }
    }
    archive
}

fn manifest_asset(manifest: &UpdateManifest, feed_url: &Url) -> Option<ReleaseAsset> {
    let raw = manifest.download_url.trim();
    if raw.is_empty() {
        return None;
    }
    let url = feed_url.join(raw).ok()?;
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("update")
        .to_string();
    let kind = if name.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) {
        ArtifactKind::Archive
    } else if name.to_ascii_lowercase().ends_with(INSTALLER_EXTENSION) {
        ArtifactKind::Installer
    } else {
        // Manifest download endpoints serve the update archive.
        ArtifactKind::Archive
    };
    Some(ReleaseAsset {
        name,
        url,
        size_bytes: manifest.file_size,
        kind,
    })
}

/// Decodes either a GitHub "latest release" document or an update-server
/// manifest. `None` when the manifest itself reports no update.
pub fn parse_release_feed(body: &str, feed_url: &Url) -> Result<Option<ReleaseDescriptor>, String> {
    let feed: ReleaseFeed = serde_json::from_str(body)
        .map_err(|error| format!("Failed to parse release feed: {error}"))?;
    let descriptor = match feed {
        ReleaseFeed::Github(release) => {
            let changelog = release
                .body
                .filter(|body| !body.trim().is_empty())
                .or(release.name)
                .unwrap_or_default();
            let asset = select_asset(release.assets.iter().map(|asset| {
                (
                    asset.name.as_str(),
                    asset.browser_download_url.as_str(),
                    asset.size,
                )
            }));
            ReleaseDescriptor {
                version: normalize_version_tag(&release.tag_name).to_string(),
                changelog,
                asset,
                force_update: false,
            }
        }
        ReleaseFeed::Manifest(manifest) => {
            if manifest.update_available == Some(false) {
                return Ok(None);
            }
            ReleaseDescriptor {
                version: normalize_version_tag(&manifest.latest_version).to_string(),
                asset: manifest_asset(&manifest, feed_url),
                changelog: manifest.changelog,
                force_update: manifest.force_update,
            }
        }
    };
    Ok(Some(descriptor))
}

pub struct UpdateChecker {
    client: reqwest::Client,
    feed_url: Url,
    log: fn(&str),
}

impl UpdateChecker {
    pub fn new(feed_url: Url, log: fn(&str)) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(UPDATER_USER_AGENT)
            .timeout(RELEASE_CHECK_TIMEOUT)
            .build()
            .map_err(|error| format!("Failed to build update HTTP client: {error}"))?;
        Ok(Self {
            client,
            feed_url,
            log,
        })
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Returns a descriptor only when the authority publishes a version newer
    /// than `current_version`. Never fails.
    pub async fn check(&self, current_version: &str) -> Option<ReleaseDescriptor> {
        match self.fetch(current_version).await {
            Ok(Some(release)) if is_newer_version(&release.version, current_version) => {
                if release.asset.is_none() {
                    (self.log)(&format!(
                        "update {} found but no download is available",
                        release.version
                    ));
                }
                Some(release)
            }
            Ok(Some(release)) => {
                (self.log)(&format!(
                    "no update: latest={}, current={current_version}",
                    release.version
                ));
                None
            }
            Ok(None) => None,
            Err(reason) => {
                (self.log)(&format!("update check skipped: {reason}"));
                None
            }
        }
    }

    async fn fetch(&self, current_version: &str) -> Result<Option<ReleaseDescriptor>, String> {
        let mut request_url = self.feed_url.clone();
        request_url
            .query_pairs_mut()
            .append_pair("current_version", current_version);

        let response = self
            .client
            .get(request_url)
            .header(header::ACCEPT, GITHUB_ACCEPT)
            .send()
            .await
            .map_err(|error| format!("request failed: {error}"))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                (self.log)("no releases published");
                return Ok(None);
            }
            status => return Err(format!("HTTP {}", status.as_u16())),
        }

        let body = response
            .text()
            .await
            .map_err(|error| format!("failed to read response: {error}"))?;
        parse_release_feed(&body, &self.feed_url)
    }
}
