//! Archive upload and cache steps
//!
//! Each of these may carry `ignore_err`; the job executor decides what a
//! failure means, the executors here just report it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use taskline_core::domain::step::{
    StepArchiveSpec, StepDownloadArchiveSpec, StepTarArchiveSpec, StepTask,
};

use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::object_store::object_key;
use crate::process::Process;

/// Files below `path`, or `path` itself when it is a file
async fn collect_files(path: &Path) -> Result<Vec<PathBuf>, StepError> {
    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(current) = pending.pop() {
        if tokio::fs::metadata(&current).await?.is_dir() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push(entry.path());
            }
        } else {
            files.push(current);
        }
    }
    files.sort();
    Ok(files)
}

// =============================================================================
// Archive (plain file upload)
// =============================================================================

pub struct ArchiveExecutor {
    spec: StepArchiveSpec,
}

impl ArchiveExecutor {
    pub fn new(spec: StepArchiveSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl StepExecutor for ArchiveExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        if self.spec.upload_detail.is_empty() {
            return Err(StepError::invalid("no files to upload"));
        }
        let storage = self.spec.object_storage.as_ref();

        for detail in &self.spec.upload_detail {
            let source = ctx.resolve(&detail.file_path);
            let dest = ctx.expand(&detail.dest_path);
            let base = if source.is_dir() {
                source.clone()
            } else {
                source.parent().map(Path::to_path_buf).unwrap_or_default()
            };

            for file in collect_files(&source).await? {
                let relative = file.strip_prefix(&base).unwrap_or(&file).to_string_lossy().to_string();
                let key = object_key(storage, &[dest.as_str(), relative.as_str()]);
                ctx.step_info(&step.name, format!("Uploading {} to {}", file.display(), key));
                ctx.object_store.put_file(&file, &key).await?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tar archive (cache upload)
// =============================================================================

pub struct TarArchiveExecutor {
    spec: StepTarArchiveSpec,
}

impl TarArchiveExecutor {
    pub fn new(spec: StepTarArchiveSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl StepExecutor for TarArchiveExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        let mut dirs = Vec::new();
        for dir in &self.spec.result_dirs {
            let path = ctx.resolve(dir);
            if tokio::fs::try_exists(&path).await? {
                dirs.push(path);
            } else {
                ctx.step_warn(&step.name, format!("{} does not exist, skipped", path.display()));
            }
        }
        if dirs.is_empty() {
            return Err(StepError::invalid("none of the result directories exist"));
        }

        let archive = if self.spec.dest_dir.is_empty() {
            ctx.scratch_path(&self.spec.file_name)
        } else {
            ctx.resolve(&self.spec.dest_dir).join(&self.spec.file_name)
        };
        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Paths inside the workspace are stored relative to it
        let members = dirs.iter().map(|dir| {
            dir.strip_prefix(&ctx.workspace)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| dir.clone())
                .to_string_lossy()
                .to_string()
        });
        Process::new("tar")
            .arg("-czf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(ctx.workspace.to_string_lossy())
            .args(members)
            .run(ctx, &step.name)
            .await?;

        let key = object_key(
            self.spec.object_storage.as_ref(),
            &[ctx.expand(&self.spec.object_path).as_str(), self.spec.file_name.as_str()],
        );
        ctx.step_info(&step.name, format!("Uploading {} to {}", self.spec.file_name, key));
        ctx.object_store.put_file(&archive, &key).await?;
        Ok(())
    }
}

// =============================================================================
// Download archive (cache restore)
// =============================================================================

pub struct DownloadArchiveExecutor {
    spec: StepDownloadArchiveSpec,
}

impl DownloadArchiveExecutor {
    pub fn new(spec: StepDownloadArchiveSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl StepExecutor for DownloadArchiveExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        let key = object_key(
            self.spec.object_storage.as_ref(),
            &[ctx.expand(&self.spec.object_path).as_str(), self.spec.file_name.as_str()],
        );
        let dest_dir = if self.spec.dest_dir.is_empty() {
            ctx.workspace.clone()
        } else {
            ctx.resolve(&self.spec.dest_dir)
        };
        tokio::fs::create_dir_all(&dest_dir).await?;
        let local = dest_dir.join(&self.spec.file_name);

        ctx.step_info(&step.name, format!("Downloading {}", key));
        ctx.object_store.get_file(&key, &local).await?;

        if self.spec.un_tar {
            Process::new("tar")
                .arg("-xzf")
                .arg(local.to_string_lossy())
                .arg("-C")
                .arg(dest_dir.to_string_lossy())
                .run(ctx, &step.name)
                .await?;
            tokio::fs::remove_file(&local).await?;
        }
        Ok(())
    }
}
