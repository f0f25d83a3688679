use crate::resolver::TieredResolver;
use keptn::resources::{ResourceError, ResourceRef};
use shared::paths::{PathError, contained_join};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("could not list resources: {0}")]
    List(#[from] ResourceError),
    #[error(transparent)]
    PathTraversal(#[from] PathError),
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct DownloadOptions {
    /// Replace files that already exist locally
    pub overwrite: bool,
    /// Also mirror resources stored at project level
    pub include_project_scope: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            overwrite: true,
            include_project_scope: true,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DownloadSummary {
    /// Files written, in listing order
    pub files: Vec<PathBuf>,
    /// Listed resources outside the prefix
    pub skipped: usize,
    /// Resources that already existed locally and were kept
    pub kept: usize,
}

impl DownloadSummary {
    pub fn written(&self) -> usize {
        self.files.len()
    }
}

/// Mirrors every resource whose URI contains `prefix` into `local_dir`,
/// keyed by the part of the URI after the prefix.
///
/// Stage level resources are listed first, then project level ones. A
/// relative path is only written once; the first listing wins. Contents are
/// fetched through the tiered resolver so service level overrides apply.
pub async fn download_tree(
    resolver: &TieredResolver,
    coordinates: &ResourceRef,
    prefix: &str,
    local_dir: &Path,
    options: &DownloadOptions,
) -> Result<DownloadSummary, DownloadError> {
    let store = resolver.store();

    let mut uris = store.list_resources(&coordinates.stage_scope()).await?;
    if options.include_project_scope && store.is_scoped() {
        uris.extend(store.list_resources(&coordinates.project_scope()).await?);
    }

    let mut summary = DownloadSummary::default();
    let mut seen = HashSet::new();

    for uri in uris {
        let Some(relative) = remainder_after(&uri, prefix) else {
            summary.skipped += 1;
            continue;
        };
        if !seen.insert(relative.to_string()) {
            continue;
        }

        let path = contained_join(local_dir, relative)?;
        if !options.overwrite && path.exists() {
            tracing::debug!(path = %path.display(), "Keeping existing file");
            summary.kept += 1;
            continue;
        }

        let Some(resource) = resolver.resolve(&coordinates.with_uri(&uri)).await else {
            tracing::warn!(uri = %uri, "Listed resource could not be fetched");
            continue;
        };

        write_file(&path, &resource.content).await?;
        tracing::debug!(uri = %uri, path = %path.display(), "Downloaded resource");
        summary.files.push(path);
    }

    tracing::info!(
        project = %coordinates.project,
        stage = %coordinates.stage,
        service = %coordinates.service,
        written = summary.written(),
        skipped = summary.skipped,
        "Downloaded resource tree"
    );
    Ok(summary)
}

/// The part of `uri` after `prefix`, ignoring leading slashes on both.
/// `None` when the prefix does not occur or nothing follows it.
fn remainder_after<'a>(uri: &'a str, prefix: &str) -> Option<&'a str> {
    let uri = uri.trim_start_matches('/');
    let prefix = prefix.trim_start_matches('/');

    let start = uri.find(prefix)? + prefix.len();
    let relative = uri[start..].trim_start_matches('/');
    (!relative.is_empty()).then_some(relative)
}

async fn write_file(path: &Path, content: &[u8]) -> Result<(), DownloadError> {
    let write_error = |source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, content).await.map_err(write_error)
}
