//! Local working directory for compiled-code deltas.
//!
//! An update is first written in full to `deltas.staging`. Only once it has
//! been pushed does it replace the contents of `deltas`, so a failed write
//! or push never leaves a mix of two updates behind. The previous update is
//! renamed aside to `deltas.old` during the swap; an interrupted swap is
//! settled before the next update is staged.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::compilation::Delta;

pub const DELTA_DIR_NAME: &str = "deltas";
const STAGING_DIR_NAME: &str = "deltas.staging";
const RETIRED_DIR_NAME: &str = "deltas.old";

/// File names for the `index`-th delta of an update: metadata, IL, PDB
pub fn delta_file_names(index: usize) -> [String; 3] {
    [
        format!("tmp_metadata{index}.metadata"),
        format!("tmp_il{index}.il"),
        format!("tmp_pdb{index}.pdb"),
    ]
}

#[derive(Debug, Clone)]
pub struct DeltaStore {
    dir: PathBuf,
    staging: PathBuf,
    retired: PathBuf,
}

impl DeltaStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            dir: project_dir.join(DELTA_DIR_NAME),
            staging: project_dir.join(STAGING_DIR_NAME),
            retired: project_dir.join(RETIRED_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Create an empty working directory, discarding leftovers from earlier sessions
    pub async fn prepare(&self) -> io::Result<()> {
        remove_dir_if_present(&self.staging).await?;
        remove_dir_if_present(&self.retired).await?;
        remove_dir_if_present(&self.dir).await?;
        fs::create_dir_all(&self.dir).await
    }

    /// Write every delta of one update into the staging directory
    pub async fn stage(&self, deltas: &[Delta]) -> io::Result<()> {
        self.settle().await?;
        remove_dir_if_present(&self.staging).await?;
        fs::create_dir_all(&self.staging).await?;
        for (index, delta) in deltas.iter().enumerate() {
            let [metadata, il, pdb] = delta_file_names(index);
            fs::write(self.staging.join(metadata), &delta.metadata).await?;
            fs::write(self.staging.join(il), &delta.il).await?;
            fs::write(self.staging.join(pdb), &delta.pdb).await?;
            tracing::trace!(index, module_id = %delta.module_id, "staged delta");
        }
        Ok(())
    }

    /// Replace the working directory contents with the staged update
    pub async fn commit(&self) -> io::Result<()> {
        remove_dir_if_present(&self.retired).await?;
        if fs::try_exists(&self.dir).await? {
            fs::rename(&self.dir, &self.retired).await?;
        }
        if let Err(e) = fs::rename(&self.staging, &self.dir).await {
            if fs::try_exists(&self.retired).await.unwrap_or(false) {
                if let Err(restore) = fs::rename(&self.retired, &self.dir).await {
                    tracing::warn!(
                        dir = %self.dir.display(),
                        error = %restore,
                        "restoring previous deltas"
                    );
                }
            }
            return Err(e);
        }
        if let Err(e) = remove_dir_if_present(&self.retired).await {
            tracing::warn!(dir = %self.retired.display(), error = %e, "removing previous deltas");
        }
        Ok(())
    }

    /// Finish or roll back a swap that was cut short
    async fn settle(&self) -> io::Result<()> {
        if !fs::try_exists(&self.retired).await? {
            return Ok(());
        }
        if fs::try_exists(&self.dir).await? {
            tracing::debug!(dir = %self.retired.display(), "removing leftover previous deltas");
            remove_dir_if_present(&self.retired).await
        } else {
            tracing::debug!(dir = %self.dir.display(), "restoring deltas from interrupted commit");
            fs::rename(&self.retired, &self.dir).await
        }
    }

    pub async fn discard_staging(&self) {
        if let Err(e) = remove_dir_if_present(&self.staging).await {
            tracing::warn!(dir = %self.staging.display(), error = %e, "removing staged deltas");
        }
    }

    /// Delete the working directory and anything staged
    pub async fn remove(&self) -> io::Result<()> {
        remove_dir_if_present(&self.staging).await?;
        remove_dir_if_present(&self.retired).await?;
        remove_dir_if_present(&self.dir).await
    }

    /// Sorted file names currently in the working directory
    pub async fn files(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

async fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
