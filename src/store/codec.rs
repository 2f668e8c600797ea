//! Key and value encoding shared by every table.
//!
//! Keys are order-preserving byte strings (big-endian integers, raw UUID bytes)
//! so that a table scan comes back sorted by identity. Values are bincode.

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::error::StoreError;
use crate::container::types::ContainerId;
use crate::node::types::NodeId;
use crate::pipeline::types::PipelineId;

/// A type usable as the key of a typed table.
pub trait TableKey: Sized {
    fn encode_key(&self) -> Vec<u8>;
    fn decode_key(bytes: &[u8]) -> Option<Self>;
}

impl TableKey for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }
}

impl TableKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }
}

impl TableKey for Uuid {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok()
    }
}

impl TableKey for ContainerId {
    fn encode_key(&self) -> Vec<u8> {
        self.0.encode_key()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        u64::decode_key(bytes).map(ContainerId)
    }
}

impl TableKey for NodeId {
    fn encode_key(&self) -> Vec<u8> {
        self.0.encode_key()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        Uuid::decode_key(bytes).map(NodeId)
    }
}

impl TableKey for PipelineId {
    fn encode_key(&self) -> Vec<u8> {
        self.0.encode_key()
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        Uuid::decode_key(bytes).map(PipelineId)
    }
}

/// Composite key: container first, so all rows of one container are adjacent.
impl TableKey for (ContainerId, NodeId) {
    fn encode_key(&self) -> Vec<u8> {
        let mut out = self.0.encode_key();
        out.extend_from_slice(&self.1.encode_key());
        out
    }

    fn decode_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 + 16 {
            return None;
        }
        let (container, node) = bytes.split_at(8);
        Some((ContainerId::decode_key(container)?, NodeId::decode_key(node)?))
    }
}

pub fn encode_value<V: Serialize>(table: &'static str, value: &V) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|source| StoreError::Codec { table, source })
}

pub fn decode_value<V: DeserializeOwned>(table: &'static str, bytes: &[u8]) -> Result<V, StoreError> {
    bincode::deserialize(bytes).map_err(|source| StoreError::Codec { table, source })
}
