use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::protocol::{FileEntry, LibraryError, Listing};

use super::security::PathValidator;

/// Read-only view of the files directly inside the ROM directory.
///
/// Subdirectories are skipped. Symlinks are skipped unless
/// `follow_symlinks` is set and the link resolves to a visible regular file
/// directly inside the root.
#[derive(Clone)]
pub struct DirectoryCatalog {
    validator: Arc<PathValidator>,
    follow_symlinks: bool,
}

impl DirectoryCatalog {
    pub fn new(validator: Arc<PathValidator>, follow_symlinks: bool) -> Self {
        Self {
            validator,
            follow_symlinks,
        }
    }

    /// List the directory, most recently modified first
    pub async fn list(&self) -> Result<Listing, LibraryError> {
        let root = self.validator.root();
        let mut read_dir = fs::read_dir(root).await.map_err(|e| {
            tracing::error!("Failed to read ROM directory {}: {}", root.display(), e);
            LibraryError::CatalogUnavailable { source: e }
        })?;

        let mut entries = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed while reading {}: {}", root.display(), e);
                    return Err(LibraryError::CatalogUnavailable { source: e });
                }
            };

            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if !self.validator.is_visible(&entry_path, &name) {
                continue;
            }
            match self.build_file_entry(&entry_path, &name).await {
                Some(file_entry) => entries.push(file_entry),
                None => continue,
            }
        }

        sort_entries(&mut entries);

        let total_count = entries.len();
        tracing::debug!("Listed {} ROMs from {}", total_count, root.display());

        Ok(Listing {
            root: root.to_path_buf(),
            entries,
            total_count,
        })
    }

    /// Stat one child; `None` when it is not a servable file or vanished
    async fn build_file_entry(&self, path: &Path, name: &str) -> Option<FileEntry> {
        let link_metadata = fs::symlink_metadata(path).await.ok()?;

        let metadata = if link_metadata.file_type().is_symlink() {
            if !self.follow_symlinks {
                return None;
            }
            let target = fs::canonicalize(path).await.ok()?;
            if self.validator.escapes_root(&target) {
                tracing::debug!("Skipping {}: link leaves the ROM directory", name);
                return None;
            }
            if !self.validator.exposes(path, &target, name) {
                tracing::debug!("Skipping {}: link target is not servable", name);
                return None;
            }
            fs::metadata(&target).await.ok()?
        } else {
            link_metadata
        };

        if !metadata.is_file() {
            return None;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Some(FileEntry {
            name: name.to_string(),
            size: metadata.len(),
            last_modified: DateTime::<Utc>::from(modified),
            access_path: urlencoding::encode(name).into_owned(),
        })
    }
}

fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.name.cmp(&b.name))
    });
}
