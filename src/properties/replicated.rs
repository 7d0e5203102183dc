//! Replicated state: values the client binds to an existing object by replication id.

use crate::config::DEFAULT_REPLICATION_ID_START;
use crate::error::{constants, ProtocolError, Result};
use crate::properties::collection::PropertyCollection;
use bytes::{Buf, BufMut};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out replication ids for one game. Ids increase monotonically and are never
/// reused.
#[derive(Debug)]
pub struct ReplicationIdAllocator {
    next: AtomicU64,
}

impl ReplicationIdAllocator {
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next_id`](Self::next_id) returns
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ReplicationIdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATION_ID_START)
    }
}

/// A [`PropertyCollection`] bound to a replication id.
///
/// Wire layout: `[ReplicationId: u64 LE]` followed by the collection archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedPropertyCollection {
    replication_id: u64,
    properties: PropertyCollection,
}

impl ReplicatedPropertyCollection {
    pub fn new(replication_id: u64) -> Self {
        Self {
            replication_id,
            properties: PropertyCollection::new(),
        }
    }

    /// Create a collection with the next id from `allocator`
    pub fn allocate(allocator: &ReplicationIdAllocator) -> Self {
        Self::new(allocator.next_id())
    }

    #[inline]
    pub fn replication_id(&self) -> u64 {
        self.replication_id
    }

    pub fn into_inner(self) -> PropertyCollection {
        self.properties
    }

    pub fn encoded_len(&self) -> usize {
        8 + self.properties.encoded_len()
    }

    pub fn serialize<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        dst.put_u64_le(self.replication_id);
        self.properties.serialize(dst)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    pub fn deserialize<B: Buf>(src: &mut B) -> Result<Self> {
        if src.remaining() < 8 {
            return Err(ProtocolError::TruncatedInput);
        }
        let replication_id = src.get_u64_le();
        let properties = PropertyCollection::deserialize(src)?;
        Ok(Self {
            replication_id,
            properties,
        })
    }
}

impl Deref for ReplicatedPropertyCollection {
    type Target = PropertyCollection;

    fn deref(&self) -> &Self::Target {
        &self.properties
    }
}

impl DerefMut for ReplicatedPropertyCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.properties
    }
}

/// A string bound to a replication id.
///
/// Wire layout: `[ReplicationId: u64 LE] [Length: u32 LE] [UTF-8 bytes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedString {
    replication_id: u64,
    pub value: String,
}

impl ReplicatedString {
    pub fn new(replication_id: u64, value: impl Into<String>) -> Self {
        Self {
            replication_id,
            value: value.into(),
        }
    }

    #[inline]
    pub fn replication_id(&self) -> u64 {
        self.replication_id
    }

    pub fn serialize<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        let len = u32::try_from(self.value.len())
            .map_err(|_| ProtocolError::OversizedPacket(self.value.len()))?;
        dst.put_u64_le(self.replication_id);
        dst.put_u32_le(len);
        dst.put_slice(self.value.as_bytes());
        Ok(())
    }

    pub fn deserialize<B: Buf>(src: &mut B) -> Result<Self> {
        if src.remaining() < 12 {
            return Err(ProtocolError::TruncatedInput);
        }
        let replication_id = src.get_u64_le();
        let len = src.get_u32_le() as usize;
        if src.remaining() < len {
            return Err(ProtocolError::TruncatedInput);
        }

        let mut bytes = vec![0u8; len];
        src.copy_to_slice(&mut bytes);
        let value = String::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidPacket(constants::ERR_STRING_UTF8))?;

        Ok(Self {
            replication_id,
            value,
        })
    }
}
