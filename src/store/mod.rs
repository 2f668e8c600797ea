//! Embedded Metadata Store
//!
//! Containers, replica history, nodes, pipelines and counters live in a single
//! redb database. Components never hold the database directly: they go through a
//! [`StoreHandle`], whose pointer is swapped atomically when a full resync installs
//! a new snapshot.
//!
//! ## Submodules
//! - **`codec`**: Order-preserving key encoding and the bincode value codec.
//! - **`tables`**: Table names and the typed accessor used by every manager.
//! - **`db`**: `MetaStore`, one database instance in its own directory.
//! - **`handle`**: `StoreHandle`, the swappable pointer plus the swap barrier.
//! - **`sequence`**: Persisted counters (container id allocation).
//! - **`snapshot`**: Directory layout, last-known lookup and install-by-rename.

pub mod codec;
pub mod db;
pub mod error;
pub mod handle;
pub mod sequence;
pub mod snapshot;
pub mod tables;

pub use db::MetaStore;
pub use error::StoreError;
pub use handle::{PinnedStore, StoreHandle};
pub use sequence::SequenceIdGenerator;

use std::path::Path;

/// Opens the newest store directory under `db_dir`, creating a first one if none exists.
pub fn open_last_known(db_dir: &Path) -> Result<MetaStore, StoreError> {
    let dir = match snapshot::latest_store_dir(db_dir)? {
        Some(dir) => {
            tracing::info!("Reopening last known store {}", dir.display());
            dir
        }
        None => {
            let dir = snapshot::new_store_dir(db_dir)?;
            tracing::info!("No previous store under {}, creating {}", db_dir.display(), dir.display());
            dir
        }
    };
    MetaStore::open(&dir)
}
