//! Per-context working directories and the file preparation pipeline.
//!
//! Every Keptn context gets `<base>/<context>`. Monaco projects come either
//! from a `dynatrace/monaco.zip` archive, extracted into the context
//! directory, or from the `dynatrace/projects/` resource tree, mirrored into
//! `<context>/projects`.

use crate::archive::{ArchiveError, extract_archive_file};
use crate::downloader::{DownloadError, DownloadOptions, download_tree};
use crate::resolver::TieredResolver;
use keptn::events::KeptnEvent;
use keptn::resources::ResourceRef;
use shared::paths::is_single_component;
use std::path::{Path, PathBuf};

pub const ARCHIVE_URI: &str = "dynatrace/monaco.zip";
pub const ARCHIVE_FILENAME: &str = "monaco.zip";
pub const PROJECTS_PREFIX: &str = "/dynatrace/projects/";
pub const PROJECTS_DIR: &str = "projects";

#[derive(thiserror::Error, Debug)]
pub enum PrepareError {
    #[error("invalid keptn context '{0}'")]
    InvalidContext(String),
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not download monaco projects: {0}")]
    Download(#[from] DownloadError),
    #[error(
        "no monaco projects found for project={project}, stage={stage}, service={service}: neither dynatrace/monaco.zip nor files below /dynatrace/projects/"
    )]
    NoProjectFiles {
        project: String,
        stage: String,
        service: String,
    },
}

/// How the monaco projects ended up on disk.
#[derive(Debug, PartialEq)]
pub enum PreparedFiles {
    Archive { files: Vec<PathBuf> },
    Tree { files: Vec<PathBuf> },
}

impl PreparedFiles {
    pub fn files(&self) -> &[PathBuf] {
        match self {
            PreparedFiles::Archive { files } | PreparedFiles::Tree { files } => files,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Workspace { base: base.into() }
    }

    /// `<base>/<context>`. The context must be a plain directory name.
    pub fn context_dir(&self, context: &str) -> Result<PathBuf, PrepareError> {
        if !is_single_component(context) {
            return Err(PrepareError::InvalidContext(context.to_string()));
        }
        Ok(self.base.join(context))
    }

    pub fn projects_dir(&self, context: &str) -> Result<PathBuf, PrepareError> {
        Ok(self.context_dir(context)?.join(PROJECTS_DIR))
    }

    /// Materializes the monaco projects for the event's service.
    pub async fn prepare(
        &self,
        resolver: &TieredResolver,
        event: &KeptnEvent,
    ) -> Result<PreparedFiles, PrepareError> {
        let context_dir = self.context_dir(&event.context)?;
        create_dir(&self.base).await?;
        create_dir(&context_dir).await?;
        tracing::info!(
            context = %event.context,
            dir = %context_dir.display(),
            "Monaco workspace created"
        );

        let resource = ResourceRef::new(&event.project, &event.stage, &event.service, ARCHIVE_URI);

        match self.prepare_from_archive(resolver, &resource, &context_dir).await {
            Ok(Some(files)) => return Ok(PreparedFiles::Archive { files }),
            Ok(None) => {
                tracing::info!(
                    project = %event.project,
                    stage = %event.stage,
                    service = %event.service,
                    "No monaco archive found, downloading project tree"
                );
            }
            Err(e) => {
                tracing::warn!(
                    project = %event.project,
                    stage = %event.stage,
                    service = %event.service,
                    error = %e,
                    "Could not use monaco archive, downloading project tree"
                );
            }
        }

        let projects_dir = context_dir.join(PROJECTS_DIR);
        if tokio::fs::try_exists(&projects_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&projects_dir)
                .await
                .map_err(|source| PrepareError::Filesystem {
                    path: projects_dir.clone(),
                    source,
                })?;
        }
        create_dir(&projects_dir).await?;

        let summary = download_tree(
            resolver,
            &resource,
            PROJECTS_PREFIX,
            &projects_dir,
            &DownloadOptions::default(),
        )
        .await?;

        if summary.files.is_empty() {
            return Err(PrepareError::NoProjectFiles {
                project: event.project.clone(),
                stage: event.stage.clone(),
                service: event.service.clone(),
            });
        }

        Ok(PreparedFiles::Tree {
            files: summary.files,
        })
    }

    /// `Ok(None)` when there is no archive at any level.
    async fn prepare_from_archive(
        &self,
        resolver: &TieredResolver,
        resource: &ResourceRef,
        context_dir: &Path,
    ) -> Result<Option<Vec<PathBuf>>, ArchiveError> {
        let Some(archive) = resolver.resolve(resource).await else {
            return Ok(None);
        };

        let archive_path = context_dir.join(ARCHIVE_FILENAME);
        tokio::fs::write(&archive_path, &archive.content).await?;

        let dest = context_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || extract_archive_file(&archive_path, &dest))
            .await
            .map_err(std::io::Error::other)??;

        tracing::info!(
            dir = %context_dir.display(),
            files = files.len(),
            "Extracted monaco archive"
        );
        Ok(Some(files))
    }

    /// Deletes `<base>/<context>`. A missing directory is not an error.
    pub async fn remove(&self, context: &str) -> Result<(), PrepareError> {
        let context_dir = self.context_dir(context)?;

        match tokio::fs::remove_dir_all(&context_dir).await {
            Ok(()) => {
                tracing::info!(dir = %context_dir.display(), "Deleted monaco workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PrepareError::Filesystem {
                path: context_dir,
                source,
            }),
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), PrepareError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| PrepareError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
}
