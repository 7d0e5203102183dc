//! # Property Collections
//!
//! An ordered map from [`PropertyId`] to [`PropertyValue`] and its archive format:
//!
//! ```text
//! [Count: u32 LE] { [Key: u64 LE of the byte-swapped id] [Value: u64 LE] } * Count
//! ```
//!
//! The key is written byte-reversed so that the enum index, which lives in the high
//! bits, comes first on the wire. Iteration is in ascending id order, so serializing the
//! same collection twice yields the same bytes.

use crate::error::{constants, ProtocolError, Result};
use crate::properties::property_id::PropertyId;
use crate::properties::property_value::PropertyValue;
use bytes::{Buf, BufMut};
use std::collections::btree_map::{self, BTreeMap};

/// Encoded size of one key/value pair
pub const ENTRY_SIZE: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyCollection {
    entries: BTreeMap<PropertyId, PropertyValue>,
}

impl PropertyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PropertyId) -> Option<PropertyValue> {
        self.entries.get(&id).copied()
    }

    /// Value of `id`, or the all-zero value if it is unset
    pub fn get_or_default(&self, id: PropertyId) -> PropertyValue {
        self.get(id).unwrap_or_default()
    }

    /// Set a property, returning the previous value
    pub fn set(&mut self, id: PropertyId, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.entries.insert(id, value.into())
    }

    pub fn remove(&mut self, id: PropertyId) -> Option<PropertyValue> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: PropertyId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, PropertyValue)> + '_ {
        self.entries.iter().map(|(id, value)| (*id, *value))
    }

    /// Entries sharing one enum index, whatever their parameter
    pub fn iter_enum(&self, enum_index: u16) -> impl Iterator<Item = (PropertyId, PropertyValue)> + '_ {
        self.iter().filter(move |(id, _)| id.enum_index() == enum_index)
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.entries.len() * ENTRY_SIZE
    }

    /// Append the archive form to `dst`
    pub fn serialize<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| ProtocolError::OversizedPacket(self.entries.len()))?;

        dst.put_u32_le(count);
        for (id, value) in self.iter() {
            dst.put_u64_le(id.raw().swap_bytes());
            dst.put_u64_le(value.raw());
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Read a collection written by [`serialize`](Self::serialize), consuming it from `src`
    pub fn deserialize<B: Buf>(src: &mut B) -> Result<Self> {
        if src.remaining() < 4 {
            return Err(ProtocolError::TruncatedInput);
        }
        let count = src.get_u32_le() as usize;

        // Checked up front so a hostile count cannot drive a long loop
        if src.remaining() / ENTRY_SIZE < count {
            return Err(ProtocolError::TruncatedInput);
        }

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let id = PropertyId::from_raw(src.get_u64_le().swap_bytes());
            let value = PropertyValue::from_raw(src.get_u64_le());
            if entries.insert(id, value).is_some() {
                return Err(ProtocolError::InvalidPacket(constants::ERR_DUPLICATE_PROPERTY));
            }
        }

        Ok(Self { entries })
    }
}

impl<'a> IntoIterator for &'a PropertyCollection {
    type Item = (&'a PropertyId, &'a PropertyValue);
    type IntoIter = btree_map::Iter<'a, PropertyId, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(PropertyId, PropertyValue)> for PropertyCollection {
    fn from_iter<I: IntoIterator<Item = (PropertyId, PropertyValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
