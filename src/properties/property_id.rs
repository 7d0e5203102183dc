//! Packed property identifiers.
//!
//! ```text
//! bit 63           53 52                       0
//!     [ enum (11) ][ param (numBits) | zero ... ]
//! ```
//!
//! The parameter is left-aligned below the enum field, so its bit width is not stored:
//! recovering it needs the same `num_bits` the schema used to pack it.

use crate::error::{constants, ProtocolError, Result};
use std::fmt;

/// Bits available to the parameter below the enum field
pub const PARAM_BIT_COUNT: u32 = 53;

/// Bits holding the property enum index
pub const ENUM_BIT_COUNT: u32 = 64 - PARAM_BIT_COUNT;

/// Largest enum index that fits the packed layout
pub const MAX_ENUM_INDEX: u16 = (1 << ENUM_BIT_COUNT) - 1;

const PARAM_MASK: u64 = (1 << PARAM_BIT_COUNT) - 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropertyId(u64);

impl PropertyId {
    /// Pack an enum index and a parameter that is `num_bits` wide.
    ///
    /// Inputs that would not survive packing are rejected rather than truncated.
    pub fn pack(enum_index: u16, param: u64, num_bits: u32) -> Result<Self> {
        if enum_index > MAX_ENUM_INDEX {
            return Err(ProtocolError::PropertyOutOfRange(constants::ERR_ENUM_INDEX_RANGE));
        }
        if num_bits > PARAM_BIT_COUNT {
            return Err(ProtocolError::PropertyOutOfRange(constants::ERR_PARAM_BIT_WIDTH));
        }
        if param >> num_bits != 0 {
            return Err(ProtocolError::PropertyOutOfRange(constants::ERR_PARAM_VALUE_RANGE));
        }

        let param_bits = if num_bits == 0 {
            0
        } else {
            param << (PARAM_BIT_COUNT - num_bits)
        };

        Ok(Self(u64::from(enum_index) << PARAM_BIT_COUNT | param_bits))
    }

    /// Identifier of a property with no parameter
    pub fn from_enum(enum_index: u16) -> Result<Self> {
        Self::pack(enum_index, 0, 0)
    }

    /// Wrap a raw identifier, e.g. one read from the wire
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn enum_index(self) -> u16 {
        (self.0 >> PARAM_BIT_COUNT) as u16
    }

    /// Split into the enum index and the raw, still left-aligned, parameter bits
    pub fn unpack(self) -> (u16, u64) {
        (self.enum_index(), self.0 & PARAM_MASK)
    }

    /// Recover the parameter given the width it was packed with. Widths above 53 bits
    /// are clamped.
    pub fn param(self, num_bits: u32) -> u64 {
        let num_bits = num_bits.min(PARAM_BIT_COUNT);
        if num_bits == 0 {
            return 0;
        }
        (self.0 & PARAM_MASK) >> (PARAM_BIT_COUNT - num_bits)
    }

    pub fn has_param(self) -> bool {
        self.0 & PARAM_MASK != 0
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({}, 0x{:X})", self.enum_index(), self.0 & PARAM_MASK)
    }
}

impl From<PropertyId> for u64 {
    fn from(id: PropertyId) -> Self {
        id.0
    }
}
