use crate::errors::AirgapError;
use crate::managers::remote::{CommandSpec, RemoteExecutor, RemoteSession};
use crate::utils::fs_atomic::{discard, ensure_dir_for_file, persist, temp_sibling_path};
use crate::utils::shell::quote;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub bytes: Option<u64>,
    pub sha256: Option<String>,
}

/// Fetches one resource to a staging location. Implementations create any
/// missing parent directories and overwrite an existing file.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<DownloadReceipt, AirgapError>;
}

/// Streams resources into a staging root on the local filesystem.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, AirgapError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .map_err(|err| {
                AirgapError::internal(format!("Failed to build HTTP client: {}", err))
            })?;
        Ok(Self { client })
    }

    async fn stream_to(
        &self,
        url: &str,
        tmp_path: &Path,
    ) -> Result<DownloadReceipt, AirgapError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .error_for_status()
            .map_err(map_reqwest_error)?;
        let mut file = tokio::fs::File::create(tmp_path).await.map_err(|err| {
            AirgapError::download(format!("Failed to create {}: {}", tmp_path.display(), err))
        })?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            hasher.update(&chunk);
            total += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|err| {
                AirgapError::download(format!("Failed to write {}: {}", tmp_path.display(), err))
            })?;
        }
        file.flush().await?;
        Ok(DownloadReceipt {
            bytes: Some(total),
            sha256: Some(format!("{:x}", hasher.finalize())),
        })
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<DownloadReceipt, AirgapError> {
        ensure_dir_for_file(destination).await.map_err(|err| {
            AirgapError::download(format!(
                "Failed to create staging directory for {}: {}",
                destination.display(),
                err
            ))
        })?;
        let tmp_path = temp_sibling_path(destination);
        match self.stream_to(url, &tmp_path).await {
            Ok(receipt) => {
                persist(&tmp_path, destination).await?;
                Ok(receipt)
            }
            Err(err) => {
                discard(&tmp_path).await;
                Err(err)
            }
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AirgapError {
    if err.is_timeout() {
        return AirgapError::timeout(format!("HTTP request timed out: {}", err));
    }
    AirgapError::download(err.to_string())
}

/// Has the file-server VM fetch the resource itself with curl, so the staging
/// root is a directory on that VM.
#[derive(Clone)]
pub struct RemoteCurlDownloader {
    executor: Arc<RemoteExecutor>,
    session: RemoteSession,
}

impl RemoteCurlDownloader {
    pub fn new(executor: Arc<RemoteExecutor>, session: RemoteSession) -> Self {
        Self { executor, session }
    }

    pub fn command_for(url: &str, destination: &Path) -> String {
        format!(
            "curl --fail --silent --show-error --create-dirs -Lo {} {}",
            quote(&destination.to_string_lossy()),
            quote(url)
        )
    }
}

#[async_trait::async_trait]
impl Downloader for RemoteCurlDownloader {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<DownloadReceipt, AirgapError> {
        let spec = CommandSpec::new(Self::command_for(url, destination));
        self.executor
            .execute(&self.session, &spec)
            .await
            .map_err(|err| {
                if err.is_command_failure() {
                    AirgapError::download(err.message.clone()).with_details(
                        err.details.clone().unwrap_or(serde_json::Value::Null),
                    )
                } else {
                    err
                }
            })?;
        Ok(DownloadReceipt::default())
    }
}
