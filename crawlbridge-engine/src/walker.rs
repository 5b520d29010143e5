//! File-tree access behind a trait.
//!
//! Raw filesystem and ACL enumeration is a capability the walk calls
//! into, not something the engine reimplements per platform. The
//! [`FileProvider`] trait is that seam; [`LocalFileProvider`] serves a
//! locally mounted tree. A share-protocol provider plugs in here without
//! the orchestrator changing.

use crate::error::{EngineError, EngineResult};
use crate::resolver::AccessControlEntry;
use async_trait::async_trait;
use crawlbridge_client::Source;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use uuid::Uuid;

/// Raw metadata for one file, before asset conversion.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Full path of the file on the source.
    pub path: String,
    pub size: i64,
    /// Creation time, epoch millis.
    pub created: i64,
    /// Last write time, epoch millis.
    pub last_modified: i64,
    /// Raw access-control entries, unresolved.
    pub aces: Vec<AccessControlEntry>,
}

/// Capability the directory walk consumes: enumeration, metadata + ACL
/// reads, and staging file content to a local temp file.
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Verifies the source's properties and connectivity; returns the
    /// path the walk starts from. Fails fatally on bad configuration.
    async fn connect(&self, source: &Source) -> EngineResult<String>;

    /// Files directly inside `dir` (no recursion).
    async fn list_files(&self, dir: &str) -> EngineResult<Vec<String>>;

    /// Sub-directories directly inside `dir`.
    async fn list_dirs(&self, dir: &str) -> EngineResult<Vec<String>>;

    /// Metadata and raw ACL entries for one file.
    async fn file_entry(&self, path: &str) -> EngineResult<FileEntry>;

    /// Copies the file to an exclusively-owned local temp file and
    /// returns its path; empty string when the content is unavailable.
    async fn stage_file(&self, path: &str) -> EngineResult<String>;
}

/// Serves a locally mounted directory tree.
///
/// ACL enumeration is share-protocol specific, so entries come back
/// empty here; providers for ACL-bearing sources return the raw entries
/// for [`crate::resolver::convert_acls`].
pub struct LocalFileProvider {
    root: PathBuf,
}

impl LocalFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn epoch_millis(time: std::io::Result<std::time::SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn list_entries(dir: &str, want_dirs: bool) -> EngineResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EngineError::file_access(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::file_access(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| EngineError::file_access(entry.path().display().to_string(), e))?;
        if file_type.is_dir() == want_dirs {
            names.push(entry.path().display().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl FileProvider for LocalFileProvider {
    async fn connect(&self, source: &Source) -> EngineResult<String> {
        // Local trees need no share credentials; unknown extra settings
        // ride along in the properties untouched.
        let _ = source.properties()?;
        if !self.root.is_dir() {
            return Err(EngineError::Config(format!(
                "start path is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(self.root.display().to_string())
    }

    async fn list_files(&self, dir: &str) -> EngineResult<Vec<String>> {
        list_entries(dir, false).await
    }

    async fn list_dirs(&self, dir: &str) -> EngineResult<Vec<String>> {
        list_entries(dir, true).await
    }

    async fn file_entry(&self, path: &str) -> EngineResult<FileEntry> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::file_access(path, e))?;
        Ok(FileEntry {
            path: path.to_string(),
            size: meta.len() as i64,
            created: epoch_millis(meta.created()),
            last_modified: epoch_millis(meta.modified()),
            aces: Vec::new(),
        })
    }

    async fn stage_file(&self, path: &str) -> EngineResult<String> {
        let staged = std::env::temp_dir().join(format!("crawlbridge-{}", Uuid::new_v4()));
        match tokio::fs::copy(path, &staged).await {
            Ok(_) => Ok(staged.display().to_string()),
            Err(e) => {
                // Content in use or unreadable: crawl the metadata anyway.
                tracing::debug!("could not stage {path}: {e}");
                if staged.exists() {
                    let _ = tokio::fs::remove_file(&staged).await;
                }
                Ok(String::new())
            }
        }
    }
}
