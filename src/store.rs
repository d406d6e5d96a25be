//! Persistent state storage.
//!
//! The client keeps a single named blob (`msl_data` by default). Stores only
//! move bytes; parsing belongs to the session state.
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Named blob storage.
pub trait Store: Send + Sync {
    /// Read a blob; `Ok(None)` when it was never written.
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a blob. Readers see the old or the new content, never a mix.
    fn store(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Directory-backed store; each blob is one file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Config(format!("Invalid state name '{}'", name)));
        }
        Ok(self.dir.join(name))
    }
}

impl Store for FileStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(name)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        std::fs::create_dir_all(&self.dir)?;

        // Same directory so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| Error::IoError(e.error))?;
        trace!("Stored {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a blob.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(name).cloned()
    }
}

impl Store for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(name).cloned())
    }

    fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        self.blobs.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
