use redb::Database;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::StoreError;
use super::tables::{ALL_TABLES, raw_definition};

/// File name of the database inside a store directory.
pub const DB_FILE: &str = "scm.redb";

/// One embedded database instance, living in its own directory.
///
/// A full resync never migrates rows into an existing instance; it opens a fresh
/// `MetaStore` over the snapshot directory and swaps it in.
pub struct MetaStore {
    db: Database,
    location: PathBuf,
}

impl MetaStore {
    /// Opens (or creates) the database in `dir` and makes sure every table exists,
    /// so reads against a brand-new store see empty tables instead of errors.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let db = Database::create(dir.join(DB_FILE))?;

        let txn = db.begin_write()?;
        for name in ALL_TABLES {
            let _ = txn.open_table(raw_definition(name))?;
        }
        txn.commit()?;

        tracing::debug!("Opened metadata store at {}", dir.display());

        Ok(Self {
            db,
            location: dir.to_path_buf(),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}
