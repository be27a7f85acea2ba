//! Per-transfer staging directory tree.
//!
//! ```text
//! <root>/<transfer-id>/
//!     pipe-files/00000000000000000000000000000000.pipe
//!     pipe-files/00000000000000000000000000000000pk.pipe
//!     final-csv/00000000000000000000000000000000.csv
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PipeError, Result};

/// Paths of one transfer's staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDirs {
    /// `<root>/<transfer-id>`
    pub tmp: PathBuf,
    /// Pipe files written by the source side.
    pub pipe_files: PathBuf,
    /// Final files consumed by the target loader.
    pub final_csv: PathBuf,
}

impl StagingDirs {
    /// Compute the paths without touching the file system.
    pub fn new(root: &Path, transfer_id: &str) -> Self {
        let tmp = root.join(transfer_id);
        Self {
            pipe_files: tmp.join("pipe-files"),
            final_csv: tmp.join("final-csv"),
            tmp,
        }
    }

    /// Create the tree.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.pipe_files, &self.final_csv] {
            std::fs::create_dir_all(dir).map_err(|e| PipeError::file(dir, e))?;
        }
        debug!("created staging directories under {}", self.tmp.display());
        Ok(())
    }

    /// Remove the tree unless `keep_files` is set. Failures are logged.
    pub fn cleanup(&self, keep_files: bool) {
        if keep_files {
            debug!("keeping staging files in {}", self.tmp.display());
            return;
        }
        match std::fs::remove_dir_all(&self.tmp) {
            Ok(()) => debug!("removed {}", self.tmp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("error removing {}: {}", self.tmp.display(), e),
        }
    }

    /// Pipe file for `ordinal`.
    pub fn pipe_file(&self, ordinal: u32) -> PathBuf {
        self.pipe_files.join(format!("{:032b}.pipe", ordinal))
    }

    /// Primary-key side file for `ordinal`.
    pub fn pk_file(&self, ordinal: u32) -> PathBuf {
        self.pipe_files.join(format!("{:032b}pk.pipe", ordinal))
    }

    /// Final file for `ordinal`.
    pub fn final_file(&self, ordinal: u32) -> PathBuf {
        self.final_csv.join(format!("{:032b}.csv", ordinal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names_are_binary_ordinals() {
        let dirs = StagingDirs::new(Path::new("/tmp/sqlpipe"), "abc");
        assert_eq!(
            dirs.final_file(5),
            PathBuf::from("/tmp/sqlpipe/abc/final-csv/00000000000000000000000000000101.csv")
        );
        assert!(dirs
            .pk_file(1)
            .ends_with("pipe-files/00000000000000000000000000000001pk.pipe"));
    }

    #[test]
    fn test_create_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let dirs = StagingDirs::new(root.path(), "t1");
        dirs.create().unwrap();
        assert!(dirs.pipe_files.is_dir());
        assert!(dirs.final_csv.is_dir());

        dirs.cleanup(true);
        assert!(dirs.tmp.exists());

        dirs.cleanup(false);
        assert!(!dirs.tmp.exists());
        // Second cleanup is a no-op
        dirs.cleanup(false);
    }
}
