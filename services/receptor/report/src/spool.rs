//! Scoped temporary spool holding one built multipart stream.
//!
//! The file is removed when the [`Spool`] is dropped, on every exit path.
//! [`Spool::close`] removes it explicitly and reports a failed deletion.

use crate::error::ReportError;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const SPOOL_PREFIX: &str = "multipart-evidence_";
const SPOOL_SUFFIX: &str = ".tmp";

/// Write buffer in front of the spool file
const WRITE_BUFFER: usize = 64 * 1024;

/// Temporary multipart spool
#[derive(Debug)]
pub struct Spool {
    file: NamedTempFile,
}

impl Spool {
    /// Create an empty spool in `dir`, or the system temp directory
    pub fn create(dir: Option<&Path>) -> Result<Self, ReportError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPOOL_PREFIX).suffix(SPOOL_SUFFIX);
        let file = match dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .map_err(|e| ReportError::io(dir, "create spool", e))?,
            None => builder
                .tempfile()
                .map_err(|e| ReportError::io(std::env::temp_dir(), "create spool", e))?,
        };
        debug!(spool = %file.path().display(), "Spool created");
        Ok(Self { file })
    }

    /// Spool location
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Buffered writer over the spool for the builder
    pub fn writer(&mut self) -> BufWriter<&mut File> {
        BufWriter::with_capacity(WRITE_BUFFER, self.file.as_file_mut())
    }

    /// Current length in bytes
    pub fn len(&self) -> Result<u64, ReportError> {
        self.file
            .as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| ReportError::io(self.path(), "stat spool", e))
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> Result<bool, ReportError> {
        Ok(self.len()? == 0)
    }

    /// Move the spool to `dest`, keeping it past this value's lifetime
    pub fn persist(self, dest: impl AsRef<Path>) -> Result<PathBuf, ReportError> {
        let dest = dest.as_ref().to_path_buf();
        match self.file.persist(&dest) {
            Ok(_) => Ok(dest),
            Err(e) => Err(ReportError::io(&dest, "persist spool", e.error)),
        }
    }

    /// Remove the spool now
    pub fn close(self) -> Result<(), ReportError> {
        let path = self.path().to_path_buf();
        self.file
            .close()
            .map_err(|e| ReportError::io(&path, "remove spool", e))?;
        debug!(spool = %path.display(), "Spool removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_spool_naming_and_removal_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let spool = Spool::create(Some(dir.path())).unwrap();
            let name = spool.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with(SPOOL_PREFIX));
            assert!(name.ends_with(SPOOL_SUFFIX));
            spool.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_close_removes_file() {
        let mut spool = Spool::create(None).unwrap();
        {
            let mut writer = spool.writer();
            writer.write_all(b"abc").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(spool.len().unwrap(), 3);
        let path = spool.path().to_path_buf();
        spool.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::create(Some(dir.path())).unwrap();
        assert!(spool.is_empty().unwrap());
        let dest = dir.path().join("kept.multipart");
        let kept = spool.persist(&dest).unwrap();
        assert!(kept.exists());
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = Spool::create(Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, ReportError::Io { op: "create spool", .. }));
    }
}
