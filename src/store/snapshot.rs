//! Store directory layout under `db_dir`.
//!
//! Each store instance lives in `<db_dir>/scm-<millis>`. The newest such directory
//! is the last known store and is reopened at startup. A snapshot obtained from the
//! authoritative source is moved into place by rename, never copied row by row.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::container::types::now_ms;

pub const STORE_DIR_PREFIX: &str = "scm-";

fn dir_stamp(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(STORE_DIR_PREFIX)?
        .parse()
        .ok()
}

/// Newest `scm-*` directory, if any.
pub fn latest_store_dir(db_dir: &Path) -> io::Result<Option<PathBuf>> {
    if !db_dir.exists() {
        return Ok(None);
    }

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(db_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(stamp) = dir_stamp(&path)
            && best.as_ref().is_none_or(|(b, _)| stamp > *b)
        {
            best = Some((stamp, path));
        }
    }

    Ok(best.map(|(_, path)| path))
}

/// A fresh, not yet existing directory name newer than every existing one.
pub fn new_store_dir(db_dir: &Path) -> io::Result<PathBuf> {
    let mut stamp = now_ms();
    if let Some(latest) = latest_store_dir(db_dir)?.as_deref().and_then(dir_stamp) {
        stamp = stamp.max(latest + 1);
    }

    loop {
        let candidate = db_dir.join(format!("{}{}", STORE_DIR_PREFIX, stamp));
        if !candidate.exists() {
            return Ok(candidate);
        }
        stamp += 1;
    }
}

/// Moves a downloaded snapshot directory into the store layout.
pub fn stage_snapshot(db_dir: &Path, snapshot: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(db_dir)?;
    let target = new_store_dir(db_dir)?;
    fs::rename(snapshot, &target)?;
    tracing::info!(
        "Staged snapshot {} as {}",
        snapshot.display(),
        target.display()
    );
    Ok(target)
}

pub fn remove_store_dir(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
        tracing::info!("Removed store directory {}", path.display());
    }
    Ok(())
}
