//! Permanent, key-addressed artifact cache
//!
//! Entries never expire. A miss runs the supplied compute function, which
//! writes the artifact to a staging path; the staged file is then renamed
//! into place so concurrent writers on the same key never leave a torn
//! file behind (last writer wins).

use crate::types::{CanopyError, CanopyResult};
use std::path::{Path, PathBuf};

/// Where a cached artifact came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub hit: bool,
}

pub trait ArtifactCache: Send + Sync {
    /// Location of an existing entry, if any
    fn lookup(&self, key: &str) -> Option<PathBuf>;

    /// Run `write` against a staging path and commit the result under `key`
    fn insert_with(
        &self,
        key: &str,
        write: &mut dyn FnMut(&Path) -> CanopyResult<()>,
    ) -> CanopyResult<PathBuf>;

    /// Return the entry for `key`, computing it only on a miss
    fn get_or_compute(
        &self,
        key: &str,
        compute: &mut dyn FnMut(&Path) -> CanopyResult<()>,
    ) -> CanopyResult<CacheEntry> {
        if let Some(path) = self.lookup(key) {
            log::debug!("Cache hit for {}", key);
            return Ok(CacheEntry { path, hit: true });
        }
        let path = self.insert_with(key, compute)?;
        Ok(CacheEntry { path, hit: false })
    }
}

/// Directory-backed cache; file names mirror keys verbatim
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> CanopyResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Drop an entry; missing entries are not an error
    pub fn remove(&self, key: &str) -> CanopyResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CanopyError::Io(e)),
        }
    }
}

impl ArtifactCache for FileCache {
    fn lookup(&self, key: &str) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.exists().then_some(path)
    }

    fn insert_with(
        &self,
        key: &str,
        write: &mut dyn FnMut(&Path) -> CanopyResult<()>,
    ) -> CanopyResult<PathBuf> {
        let target = self.path_for(key);
        let staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&self.dir)?;
        write(staged.path())?;
        staged
            .persist(&target)
            .map_err(|e| CanopyError::Io(e.error))?;
        log::debug!("Committed cache entry {}", target.display());
        Ok(target)
    }
}
