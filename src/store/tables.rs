//! Typed accessors over the raw `&[u8] -> &[u8]` redb tables.

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;

use super::codec::{TableKey, decode_value, encode_value};
use super::error::StoreError;
use crate::container::types::{ContainerId, ContainerInfo, ReplicaHistory};
use crate::node::types::{NodeId, NodeRow};
use crate::pipeline::types::{Pipeline, PipelineId};

/// Container metadata keyed by container id.
pub const CONTAINERS: TypedTable<ContainerId, ContainerInfo> = TypedTable::new("containers");
/// First/last seen bookkeeping keyed by (container, node).
pub const REPLICA_HISTORY: TypedTable<(ContainerId, NodeId), ReplicaHistory> =
    TypedTable::new("replica_history");
/// Secondary-local node rows. Not part of an SCM snapshot.
pub const NODES: TypedTable<NodeId, NodeRow> = TypedTable::new("nodes");
pub const PIPELINES: TypedTable<PipelineId, Pipeline> = TypedTable::new("pipelines");
/// Named counters, e.g. the last allocated container id.
pub const SEQUENCE_ID: TypedTable<String, u64> = TypedTable::new("sequence_id");

pub const ALL_TABLES: [&str; 5] = [
    CONTAINERS.name,
    REPLICA_HISTORY.name,
    NODES.name,
    PIPELINES.name,
    SEQUENCE_ID.name,
];

pub(crate) fn raw_definition(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

pub struct TypedTable<K, V> {
    name: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TypedTable<K, V> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Copies every row of this table from `src` into `dst`, overwriting rows with equal keys.
    pub fn copy_into(&self, src: &Database, dst: &Database) -> Result<usize, StoreError> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = {
            let txn = src.begin_read()?;
            let table = txn.open_table(raw_definition(self.name))?;
            let mut rows = Vec::new();
            for entry in table.iter()? {
                let (k, v) = entry?;
                rows.push((k.value().to_vec(), v.value().to_vec()));
            }
            rows
        };

        let txn = dst.begin_write()?;
        {
            let mut table = txn.open_table(raw_definition(self.name))?;
            for (k, v) in &rows {
                table.insert(k.as_slice(), v.as_slice())?;
            }
        }
        txn.commit()?;

        Ok(rows.len())
    }

    pub fn count(&self, db: &Database) -> Result<u64, StoreError> {
        let txn = db.begin_read()?;
        let table = txn.open_table(raw_definition(self.name))?;
        Ok(table.len()?)
    }
}

impl<K, V> TypedTable<K, V>
where
    K: TableKey,
    V: Serialize + DeserializeOwned,
{
    pub fn put(&self, db: &Database, key: &K, value: &V) -> Result<(), StoreError> {
        let key = key.encode_key();
        let value = encode_value(self.name, value)?;

        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(raw_definition(self.name))?;
            table.insert(key.as_slice(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Writes all rows in a single transaction.
    pub fn put_all<'a, I>(&self, db: &Database, rows: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a,
    {
        let mut encoded = Vec::new();
        for (key, value) in rows {
            encoded.push((key.encode_key(), encode_value(self.name, value)?));
        }

        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(raw_definition(self.name))?;
            for (k, v) in &encoded {
                table.insert(k.as_slice(), v.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(encoded.len())
    }

    pub fn get(&self, db: &Database, key: &K) -> Result<Option<V>, StoreError> {
        let key = key.encode_key();
        let txn = db.begin_read()?;
        let table = txn.open_table(raw_definition(self.name))?;
        match table.get(key.as_slice())? {
            Some(guard) => Ok(Some(decode_value(self.name, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, db: &Database, key: &K) -> Result<bool, StoreError> {
        let key = key.encode_key();
        let txn = db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(raw_definition(self.name))?;
            table.remove(key.as_slice())?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All rows, ordered by encoded key.
    pub fn list(&self, db: &Database) -> Result<Vec<(K, V)>, StoreError> {
        let txn = db.begin_read()?;
        let table = txn.open_table(raw_definition(self.name))?;

        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let key = K::decode_key(k.value())
                .ok_or(StoreError::MalformedKey { table: self.name })?;
            rows.push((key, decode_value(self.name, v.value())?));
        }
        Ok(rows)
    }
}
