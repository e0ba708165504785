use std::io;
use std::path::{Path, PathBuf};

use docship_core::FileAttributes;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Point-in-time snapshot of one filesystem entry under the selected root.
/// Taken at visit time and not retained after the entry is processed.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub created: Option<OffsetDateTime>,
    pub modified: Option<OffsetDateTime>,
}

impl LocalNode {
    pub async fn snapshot(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let kind = if metadata.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        Ok(Self {
            path: path.to_path_buf(),
            name,
            kind,
            size: if kind == NodeKind::File {
                metadata.len()
            } else {
                0
            },
            created: metadata.created().ok().map(OffsetDateTime::from),
            modified: metadata.modified().ok().map(OffsetDateTime::from),
        })
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes {
            name: self.name.clone(),
            size: self.size,
            created: self.created,
            modified: self.modified,
        }
    }
}

/// Immediate children of a directory, sorted lexicographically by name so a
/// run enumerates the same order on every platform.
pub async fn sorted_children(path: &Path) -> io::Result<Vec<LocalNode>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        children.push(LocalNode::snapshot(&entry.path()).await?);
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}

/// Counts every entry beneath `root` (files and directories alike, the root
/// itself excluded) for the progress denominator.
pub async fn count_entries(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            total += 1;
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(total)
}
