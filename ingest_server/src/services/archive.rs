//! Zip extraction for result bundles and report archives.
//!
//! Stateless: every call takes the archive and its destination explicitly.
//! Entries are written only through [`zip::read::ZipFile::enclosed_name`], so
//! names that escape the destination are skipped.

use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Unpack `archive` into `dest`, creating it if needed. Returns the files written.
pub fn extract_zip<R: Read + Seek>(archive: R, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut zip = zip::ZipArchive::new(archive)?;
    fs::create_dir_all(dest)?;

    let mut written = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry outside destination");
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written.push(target);
    }

    tracing::debug!(dest = %dest.display(), files = written.len(), "Archive extracted");
    Ok(written)
}

/// Unpack in-memory archive bytes into `dest`.
pub fn extract_zip_bytes(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    extract_zip(Cursor::new(bytes), dest)
}

/// Unpack the archive file at `archive` into `dest` on the blocking pool.
pub async fn extract_zip_file(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = fs::File::open(&archive)?;
        extract_zip(io::BufReader::new(file), &dest)
    })
    .await?
}

/// Unpack archive bytes into `dest` on the blocking pool.
pub async fn extract_bytes(bytes: bytes::Bytes, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_bytes(&bytes, &dest)).await?
}
