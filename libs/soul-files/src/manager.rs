// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::encryption::Encryption;
use soul_task::{Task, TaskScheduler};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Blob persistence with an optional obfuscation pass.
///
/// Every operation reports its own `io::Result`; callers inspect the error
/// before consuming the payload. JSON documents are treated as opaque UTF-8
/// text.
#[derive(Debug, Default)]
pub struct FileManager {
    encryption: Encryption,
}

impl FileManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose saves/loads run through `encryption`.
    #[must_use]
    pub fn with_encryption(encryption: Encryption) -> Self {
        Self { encryption }
    }

    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    /// Deletes the file. `Ok(false)` when it did not exist.
    ///
    /// # Errors
    ///
    /// Forwards filesystem failures other than not-found.
    pub fn remove(&self, path: impl AsRef<Path>) -> io::Result<bool> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Writes `data` (encrypted when configured) to `path`, truncating.
    ///
    /// # Errors
    ///
    /// Forwards filesystem failures.
    pub fn save(&self, path: impl AsRef<Path>, data: &[u8]) -> io::Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.encryption.encrypt(data))?;
        tracing::trace!(path = %path.display(), bytes = data.len(), "blob saved");
        Ok(())
    }

    /// Reads and decrypts the whole file.
    ///
    /// # Errors
    ///
    /// Forwards filesystem failures.
    pub fn load(&self, path: impl AsRef<Path>) -> io::Result<Vec<u8>> {
        let raw = std::fs::read(path.as_ref())?;
        Ok(self.encryption.decrypt(&raw))
    }

    /// Persists a JSON document as raw text.
    ///
    /// # Errors
    ///
    /// Forwards filesystem failures.
    pub fn save_json(&self, path: impl AsRef<Path>, json: &str) -> io::Result<()> {
        self.save(path, json.as_bytes())
    }

    /// Loads a JSON document back as text.
    ///
    /// # Errors
    ///
    /// Forwards filesystem failures; non-UTF-8 content reports
    /// `InvalidData`.
    pub fn load_json(&self, path: impl AsRef<Path>) -> io::Result<String> {
        String::from_utf8(self.load(path)?)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// Async façade over [`FileManager`]: the blocking I/O runs as jobs on the
/// shared worker pool, keeping callers responsive.
#[derive(Debug)]
pub struct AsyncFileManager {
    files: Arc<FileManager>,
    scheduler: Arc<TaskScheduler>,
}

impl AsyncFileManager {
    #[must_use]
    pub fn new(files: Arc<FileManager>, scheduler: Arc<TaskScheduler>) -> Self {
        Self { files, scheduler }
    }

    pub fn save_async(&self, path: impl Into<PathBuf>, data: Vec<u8>) -> Task<io::Result<()>> {
        let files = Arc::clone(&self.files);
        let path = path.into();
        self.scheduler
            .submit_async(move || files.save(&path, &data))
    }

    pub fn load_async(&self, path: impl Into<PathBuf>) -> Task<io::Result<Vec<u8>>> {
        let files = Arc::clone(&self.files);
        let path = path.into();
        self.scheduler.submit_async(move || files.load(&path))
    }

    pub fn save_json_async(&self, path: impl Into<PathBuf>, json: String) -> Task<io::Result<()>> {
        let files = Arc::clone(&self.files);
        let path = path.into();
        self.scheduler
            .submit_async(move || files.save_json(&path, &json))
    }

    pub fn load_json_async(&self, path: impl Into<PathBuf>) -> Task<io::Result<String>> {
        let files = Arc::clone(&self.files);
        let path = path.into();
        self.scheduler.submit_async(move || files.load_json(&path))
    }
}
