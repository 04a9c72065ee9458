use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::UPDATER_USER_AGENT;

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub target_path: PathBuf,
    pub bytes_total: Option<u64>,
    pub bytes_received: u64,
    pub status: DownloadStatus,
}

impl DownloadJob {
    pub fn new(target_path: PathBuf) -> Self {
        Self {
            target_path,
            bytes_total: None,
            bytes_received: 0,
            status: DownloadStatus::Pending,
        }
    }

    /// Whole-number percentage, `None` while the total size is unknown.
    pub fn percent(&self) -> Option<u8> {
        let total = self.bytes_total.filter(|total| *total > 0)?;
        let percent = (self.bytes_received.min(total) as f64 / total as f64 * 100.0).round();
        Some(percent as u8)
    }
}

pub fn build_download_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .user_agent(UPDATER_USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|error| format!("Failed to build download HTTP client: {error}"))
}

/// File name for a download URL: last path segment, or `fallback`.
pub fn artifact_file_name(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && name != "..")
        .unwrap_or_else(|| fallback.to_string())
}

async fn remove_if_present(path: &Path) -> Result<(), String> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(format!(
            "Failed to remove previous download {}: {error}",
            path.display()
        )),
    }
}

/// Streams `url` into `target`, following redirect chains. `on_progress` runs
/// once per received chunk. A previous file at `target` is removed first and a
/// partially written file is removed on failure.
pub async fn download_artifact<P>(
    client: &reqwest::Client,
    url: &Url,
    target: &Path,
    mut on_progress: P,
) -> Result<DownloadJob, String>
where
    P: FnMut(&DownloadJob),
{
    let mut job = DownloadJob::new(target.to_path_buf());
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|error| {
            format!(
                "Failed to create download directory {}: {error}",
                parent.display()
            )
        })?;
    }
    remove_if_present(target).await?;

    match stream_to_file(client, url, &mut job, &mut on_progress).await {
        Ok(()) => {
            job.status = DownloadStatus::Done;
            Ok(job)
        }
        Err(error) => {
            job.status = DownloadStatus::Failed;
            on_progress(&job);
            let _ = remove_if_present(target).await;
            Err(error)
        }
    }
}

async fn stream_to_file<P>(
    client: &reqwest::Client,
    url: &Url,
    job: &mut DownloadJob,
    on_progress: &mut P,
) -> Result<(), String>
where
    P: FnMut(&DownloadJob),
{
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|error| format!("Download request failed: url={url}, error={error}"))?;
    if response.status() != StatusCode::OK {
        return Err(format!(
            "Download failed: HTTP {} from {}",
            response.status().as_u16(),
            response.url()
        ));
    }

    job.bytes_total = response.content_length();
    job.status = DownloadStatus::Downloading;
    on_progress(job);

    let mut file = tokio::fs::File::create(&job.target_path)
        .await
        .map_err(|error| {
            format!(
                "Failed to create download file {}: {error}",
                job.target_path.display()
            )
        })?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| format!("Download interrupted: {error}"))?;
        file.write_all(&chunk).await.map_err(|error| {
            format!(
                "Failed to write download file {}: {error}",
                job.target_path.display()
            )
        })?;
        job.bytes_received += chunk.len() as u64;
        on_progress(job);
    }
    file.flush()
        .await
        .map_err(|error| format!("Failed to flush download file: {error}"))?;
    drop(file);

    verify_download(job).await
}

async fn verify_download(job: &DownloadJob) -> Result<(), String> {
    let metadata = tokio::fs::metadata(&job.target_path).await.map_err(|error| {
        format!(
            "Downloaded file is missing {}: {error}",
            job.target_path.display()
        )
    })?;
    if metadata.len() != job.bytes_received {
        return Err(format!(
            "Downloaded file size mismatch: on_disk={}, received={}",
            metadata.len(),
            job.bytes_received
        ));
    }
    if let Some(total) = job.bytes_total {
        if total != job.bytes_received {
            return Err(format!(
                "Download truncated: expected={total}, received={}",
                job.bytes_received
            ));
        }
    }
    if job.bytes_received == 0 {
        return Err("Downloaded file is empty".to_string());
    }
    Ok(())
}
