//! Bounded on-disk audio cache.
//!
//! Layout: `{directory}/{fingerprint}.wav`, one file per clip. Eviction
//! removes the files with the oldest modification time. Only `.wav` files
//! are counted or removed, so the directory may be shared.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;

const EXTENSION: &str = "wav";

/// Directory-backed clip store.
#[derive(Debug)]
pub struct FileCache {
    directory: PathBuf,
    max_entries: usize,
}

impl FileCache {
    /// Open a cache rooted at `directory`, creating it if needed.
    ///
    /// Creation failures are logged, not returned; the cache then behaves as
    /// permanently empty until the directory becomes writable.
    pub fn new(directory: impl Into<PathBuf>, max_entries: usize) -> Self {
        let cache = Self {
            directory: directory.into(),
            max_entries,
        };
        cache.ensure_dir();
        cache
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &Fingerprint) -> PathBuf {
        self.directory.join(format!("{}.{EXTENSION}", key.to_hex()))
    }

    fn ensure_dir(&self) -> bool {
        match fs::create_dir_all(&self.directory) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    dir = %self.directory.display(),
                    error = %e,
                    "failed to create audio cache directory"
                );
                false
            }
        }
    }

    /// Read a clip. Missing or unreadable files are a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cached audio");
                None
            }
        }
    }

    /// Write a clip, deleting the oldest files first while the cache is full.
    ///
    /// Failures are logged and swallowed.
    pub fn put(&self, key: &Fingerprint, audio: &[u8]) {
        if self.max_entries == 0 {
            return;
        }
        if let Err(e) = self.try_put(key, audio) {
            warn!(
                key = %key,
                dir = %self.directory.display(),
                error = %e,
                "failed to write cached audio"
            );
        }
    }

    fn try_put(&self, key: &Fingerprint, audio: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path_for(key);

        if !path.exists() {
            let mut files = self.cached_files()?;
            if files.len() >= self.max_entries {
                files.sort_by_key(|(_, modified)| *modified);
                let excess = files.len() + 1 - self.max_entries;
                for (old, _) in files.iter().take(excess) {
                    debug!(path = %old.display(), "evicting cached audio");
                    if let Err(e) = fs::remove_file(old)
                        && e.kind() != io::ErrorKind::NotFound
                    {
                        return Err(e);
                    }
                }
            }
        }

        // Write to a temp file and rename so readers never see a partial clip.
        let tmp = self.directory.join(format!(".{key}.{EXTENSION}.tmp"));
        fs::write(&tmp, audio)?;
        fs::rename(&tmp, &path)
    }

    /// Delete every `.wav` file in the directory.
    pub fn clear(&self) {
        let files = match self.cached_files() {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.directory.display(), error = %e, "failed to list audio cache");
                return;
            }
        };
        for (path, _) in files {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to delete cached audio");
            }
        }
    }

    /// Number of `.wav` files in the directory (0 if it cannot be listed).
    pub fn len(&self) -> usize {
        self.cached_files().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached_files(&self) -> io::Result<Vec<(PathBuf, SystemTime)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }
        Ok(files)
    }
}
