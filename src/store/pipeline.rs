//! Store operations and pipelines

use std::time::Duration;

/// One bounded insertion: write `value` under `value_key` and, when
/// `limit > 0`, record `value_key` in the ordered index `index_key`,
/// evicting the oldest members (and their values) beyond `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedInsert {
    pub value_key: String,
    pub index_key: String,
    pub value: Vec<u8>,
    /// Zero writes the value without expiry.
    pub ttl: Duration,
    /// Zero means no index is maintained.
    pub limit: u64,
}

/// A queued store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Remove a key (value or index).
    Delete { key: String },
    /// Remove `member` from the ordered index `index_key`.
    Deindex { index_key: String, member: String },
    BoundedInsert(BoundedInsert),
}

/// Operations queued for a single [`KvStore::execute`](crate::KvStore::execute) round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePipeline {
    ops: Vec<StoreOp>,
}

impl StorePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::Delete { key: key.into() });
        self
    }

    pub fn deindex(&mut self, index_key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::Deindex {
            index_key: index_key.into(),
            member: member.into(),
        });
        self
    }

    pub fn bounded_insert(&mut self, insert: BoundedInsert) -> &mut Self {
        self.ops.push(StoreOp::BoundedInsert(insert));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}
