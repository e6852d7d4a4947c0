// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Line-delimited append-only files.
//!
//! Writers serialize on an exclusive advisory lock held on a sidecar
//! `<file>.lock`, so a whole-file rewrite (temp file + rename) never races an
//! append into an unlinked inode. Readers take no lock.

use crate::error::{GuardError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `path` is acquired. Creates the file if needed.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::storage(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| GuardError::storage(path, e))?;
        file.lock_exclusive()
            .map_err(|e| GuardError::storage(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release file lock");
        }
    }
}

/// Replace `path` with `bytes` via a synced temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = sidecar(path, "tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Size-triggered rotation into an archive directory.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub max_bytes: u64,
    pub archive_dir: PathBuf,
    pub compress: bool,
}

/// An append-only file of newline-terminated lines.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    lock_path: PathBuf,
    rotation: Option<Rotation>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sidecar(&path, "lock");
        Self {
            path,
            lock_path,
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the writer lock. Hold it across a read-modify-write.
    pub fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path)
    }

    /// Serialize `entry` as one JSON line and append it durably.
    pub fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let line = serde_json::to_vec(entry).map_err(|e| GuardError::serialization(&self.path, e))?;
        self.append_line(&line)
    }

    /// Append raw bytes as one line.
    pub fn append_line(&self, line: &[u8]) -> Result<()> {
        let _lock = self.lock()?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GuardError::storage(&self.path, e))?;
        file.write_all(&buf)
            .and_then(|_| file.sync_data())
            .map_err(|e| GuardError::storage(&self.path, e))?;

        if let Some(rotation) = &self.rotation {
            self.rotate_if_needed(rotation)?;
        }
        Ok(())
    }

    /// Lazy forward-only iterator over the lines present right now.
    ///
    /// A missing file reads as empty. Each call starts from the beginning.
    pub fn lines(&self) -> Result<Lines> {
        match File::open(&self.path) {
            Ok(file) => {
                let len = file
                    .metadata()
                    .map_err(|e| GuardError::storage(&self.path, e))?
                    .len();
                Ok(Lines {
                    reader: Some(BufReader::new(file.take(len))),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Lines { reader: None }),
            Err(e) => Err(GuardError::storage(&self.path, e)),
        }
    }

    /// Replace the whole file. The caller must hold [`Journal::lock`].
    pub fn rewrite<I>(&self, _lock: &FileLock, lines: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut buf = Vec::new();
        for line in lines {
            buf.extend_from_slice(line.as_ref());
            buf.push(b'\n');
        }
        write_atomic(&self.path, &buf).map_err(|e| GuardError::storage(&self.path, e))
    }

    fn rotate_if_needed(&self, rotation: &Rotation) -> Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size <= rotation.max_bytes {
            return Ok(());
        }

        fs::create_dir_all(&rotation.archive_dir)
            .map_err(|e| GuardError::storage(&rotation.archive_dir, e))?;
        let target = self.archive_name(rotation);
        fs::rename(&self.path, &target).map_err(|e| GuardError::storage(&target, e))?;
        info!(from = %self.path.display(), to = %target.display(), size, "Rotated journal");

        if rotation.compress {
            if let Err(e) = gzip_in_place(&target) {
                // The uncompressed archive is still complete.
                warn!(path = %target.display(), error = %e, "Archive compression failed");
            }
        }
        Ok(())
    }

    fn archive_name(&self, rotation: &Rotation) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "journal".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");

        let mut candidate = rotation.archive_dir.join(format!("{stem}-{stamp}.log"));
        let mut n = 1;
        while candidate.exists() || sidecar(&candidate, "gz").exists() {
            candidate = rotation.archive_dir.join(format!("{stem}-{stamp}-{n}.log"));
            n += 1;
        }
        candidate
    }
}

fn gzip_in_place(path: &Path) -> io::Result<()> {
    let gz_path = sidecar(path, "gz");
    let mut input = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::best());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)?;
    debug!(path = %gz_path.display(), "Compressed archive");
    Ok(())
}

/// Iterator over raw journal lines without their trailing newline.
///
/// Bounded by the file length observed when it was created; blank lines are
/// skipped.
pub struct Lines {
    reader: Option<BufReader<std::io::Take<File>>>,
}

impl Iterator for Lines {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if buf.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    return Some(Ok(buf));
                }
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
