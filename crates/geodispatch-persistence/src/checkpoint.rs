use crate::{atomic::write_atomic, PersistenceError, Result};
use geodispatch_core::RowIndex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable progress marker: a file holding one row index.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CheckpointFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved index; `None` when no checkpoint was ever written
    pub fn load(&self) -> Result<Option<RowIndex>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let line = contents.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(None);
        }

        line.parse::<RowIndex>()
            .map(Some)
            .map_err(|e| PersistenceError::InvalidCheckpoint(format!("{:?}: {}", line, e)))
    }

    /// Replace the saved index
    pub fn save(&self, index: RowIndex) -> Result<()> {
        write_atomic(&self.path, |file| {
            writeln!(file, "{}", index)?;
            Ok(())
        })?;

        debug!("Saved checkpoint {} to {:?}", index, self.path);
        Ok(())
    }
}
