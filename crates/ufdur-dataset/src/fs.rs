//! Atomic replacement of output tables:
//! - write to a temp file in the destination directory (avoids cross-device renames)
//! - flush + `sync_all`
//! - rename into place with replace semantics

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` returns `Some("")` for bare relative file names like `FY24Q1_combined.csv`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write `dest` through `write_fn`, replacing any existing file only once the new contents
/// are complete. If `write_fn` fails, `dest` is left untouched and the temp file is removed.
pub(crate) fn atomic_write<T, E: From<io::Error>>(
    dest: &Path,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, E> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    let out = write_fn(tmp.as_file_mut())?;

    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| err.error)?;

    // Best-effort: the file is already in place.
    let _ = File::open(dir).and_then(|d| d.sync_all());

    Ok(out)
}
