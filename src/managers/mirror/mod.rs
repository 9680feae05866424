use crate::errors::AirgapError;
use crate::services::logger::Logger;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

mod download;
mod tree;

pub use download::{DownloadReceipt, Downloader, HttpDownloader, RemoteCurlDownloader};
pub use tree::{ResourceTree, Scalar};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirroredResource {
    pub original_url: String,
    pub staged_path: PathBuf,
    pub published_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorOutcome {
    pub tree: ResourceTree,
    pub resources: Vec<MirroredResource>,
}

#[derive(Debug, Clone, Copy)]
pub struct MirrorPolicy {
    /// Extra attempts per resource after the first failed download.
    pub download_retries: u32,
    pub retry_interval: Duration,
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self {
            download_retries: crate::constants::retry::DOWNLOAD_RETRIES,
            retry_interval: Duration::from_secs(
                crate::constants::retry::COMMAND_RETRY_INTERVAL_SECS,
            ),
        }
    }
}

/// A resource URL sliced out of the original text. Nothing is normalized:
/// dot segments, escapes and case survive exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUrl<'a> {
    pub scheme: &'a str,
    pub authority: &'a str,
    /// Path, query and fragment following the authority.
    pub tail: &'a str,
}

impl<'a> ResourceUrl<'a> {
    pub fn path(&self) -> &'a str {
        let end = self.tail.find(['?', '#']).unwrap_or(self.tail.len());
        &self.tail[..end]
    }
}

/// Splits `value` when it is an absolute, hierarchical URL
/// (`scheme://authority/...`). Plain strings, relative paths, opaque
/// `scheme:data` values and strings with surrounding whitespace are not
/// resources. `Url` only validates; the pieces come from the raw text.
pub fn parse_resource_url(value: &str) -> Option<ResourceUrl<'_>> {
    if value.trim() != value {
        return None;
    }
    let parsed = Url::parse(value).ok()?;
    if parsed.cannot_be_a_base() {
        return None;
    }
    let (scheme, rest) = value.split_once("://")?;
    if !scheme.eq_ignore_ascii_case(parsed.scheme()) {
        return None;
    }
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(ResourceUrl {
        scheme,
        authority: &rest[..authority_end],
        tail: &rest[authority_end..],
    })
}

pub fn is_resource_url(value: &str) -> bool {
    parse_resource_url(value).is_some()
}

/// Rewrites `url` onto the file server: scheme becomes `http`, authority
/// becomes `publish_authority`, path, query and fragment are kept verbatim.
pub fn publish_url(url: &ResourceUrl<'_>, publish_authority: &str) -> String {
    format!("http://{}{}", publish_authority, url.tail)
}

pub fn staged_path_for(url: &ResourceUrl<'_>, staging_root: &Path) -> Result<PathBuf, AirgapError> {
    let relative = url.path().trim_start_matches('/');
    if relative.is_empty() || relative.ends_with('/') {
        return Err(AirgapError::download(format!(
            "Resource {}://{}{} has no file path to stage",
            url.scheme, url.authority, url.tail
        ))
        .with_hint("Only URLs pointing at a file can be mirrored."));
    }
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir if depth == 0 => {
                return Err(AirgapError::download(format!(
                    "Resource path {} climbs out of the staging root",
                    url.path()
                )));
            }
            Component::ParentDir => depth -= 1,
            _ => {}
        }
    }
    Ok(staging_root.join(relative))
}

fn validate_authority(publish_authority: &str) -> Result<(), AirgapError> {
    let trimmed = publish_authority.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains(char::is_whitespace) {
        return Err(AirgapError::invalid_params(format!(
            "publish authority must look like host[:port], got '{}'",
            publish_authority
        )));
    }
    Ok(())
}

/// Rewrites every resource URL in `tree` without downloading anything.
/// The returned resources are in traversal order; later entries overwrite
/// earlier ones when their staged paths collide.
pub fn plan_mirror(
    tree: &ResourceTree,
    staging_root: &Path,
    publish_authority: &str,
) -> Result<MirrorOutcome, AirgapError> {
    validate_authority(publish_authority)?;
    let mut resources = Vec::new();
    let tree = rewrite_node(tree, staging_root, publish_authority, &mut resources)?;
    Ok(MirrorOutcome { tree, resources })
}

fn rewrite_node(
    node: &ResourceTree,
    staging_root: &Path,
    publish_authority: &str,
    resources: &mut Vec<MirroredResource>,
) -> Result<ResourceTree, AirgapError> {
    match node {
        ResourceTree::Mapping(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                out.push((
                    key.clone(),
                    rewrite_node(value, staging_root, publish_authority, resources)?,
                ));
            }
            Ok(ResourceTree::Mapping(out))
        }
        ResourceTree::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(rewrite_node(item, staging_root, publish_authority, resources)?);
            }
            Ok(ResourceTree::Sequence(out))
        }
        ResourceTree::Scalar(Scalar::String(text)) => {
            let Some(url) = parse_resource_url(text) else {
                return Ok(node.clone());
            };
            let published = publish_url(&url, publish_authority);
            resources.push(MirroredResource {
                original_url: text.clone(),
                staged_path: staged_path_for(&url, staging_root)?,
                published_url: published.clone(),
                bytes: None,
                sha256: None,
            });
            Ok(ResourceTree::string(published))
        }
        ResourceTree::Scalar(_) => Ok(node.clone()),
    }
}

#[derive(Clone)]
pub struct ResourceMirror {
    logger: Logger,
    downloader: Arc<dyn Downloader>,
    policy: MirrorPolicy,
}

impl ResourceMirror {
    pub fn new(logger: Logger, downloader: Arc<dyn Downloader>, policy: MirrorPolicy) -> Self {
        Self {
            logger: logger.child("mirror"),
            downloader,
            policy,
        }
    }

    /// Downloads every resource referenced by `tree` under `staging_root` and
    /// returns the tree rewritten to `publish_authority`. Any resource that
    /// still fails after its retries aborts the whole operation.
    pub async fn mirror(
        &self,
        tree: &ResourceTree,
        staging_root: &Path,
        publish_authority: &str,
    ) -> Result<MirrorOutcome, AirgapError> {
        let mut outcome = plan_mirror(tree, staging_root, publish_authority)?;
        self.logger.info(
            "Mirroring resources",
            Some(&serde_json::json!({
                "count": outcome.resources.len(),
                "staging_root": staging_root.display().to_string(),
                "publish_authority": publish_authority,
            })),
        );
        for resource in outcome.resources.iter_mut() {
            let receipt = self.fetch_with_retries(resource).await?;
            resource.bytes = receipt.bytes;
            resource.sha256 = receipt.sha256;
        }
        Ok(outcome)
    }

    async fn fetch_with_retries(
        &self,
        resource: &MirroredResource,
    ) -> Result<DownloadReceipt, AirgapError> {
        self.logger.info(
            &format!(
                "Downloading {} to {}",
                resource.original_url,
                resource.staged_path.display()
            ),
            None,
        );
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self
                .downloader
                .fetch(&resource.original_url, &resource.staged_path)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(err) if attempt > self.policy.download_retries => {
                    return Err(AirgapError::download(format!(
                        "Failed to download {} after {} attempts: {}",
                        resource.original_url, attempt, err.message
                    ))
                    .with_details(serde_json::json!({
                        "url": resource.original_url,
                        "staged_path": resource.staged_path.display().to_string(),
                        "attempts": attempt,
                        "cause": err,
                    })));
                }
                Err(err) => {
                    self.logger.warn(
                        "Download failed, retrying",
                        Some(&serde_json::json!({
                            "url": resource.original_url,
                            "attempt": attempt,
                            "error": err.message,
                            "retry_in_secs": self.policy.retry_interval.as_secs(),
                        })),
                    );
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
            }
        }
    }
}
