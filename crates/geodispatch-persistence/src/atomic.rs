use crate::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write a file by filling a temporary sibling and renaming it into place.
///
/// Readers never observe a half-written file; a crash mid-write leaves the
/// previous version intact.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    fill(&mut file)?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}
