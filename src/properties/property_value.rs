//! Raw 8-byte property values.
//!
//! A [`PropertyValue`] is a bag of 64 bits. Constructors and accessors reinterpret those
//! bits, they never convert numerically:
//!
//! - integers live in the full 64-bit lane (`i32` is sign-extended)
//! - `f32` lives in the low 32 bits as its IEEE-754 pattern, high bits zero
//! - `bool` is `1` or `0`, and any nonzero value reads back as `true`
//! - durations are whole milliseconds

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyValue(u64);

impl PropertyValue {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Low 32 bits as a signed integer
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0 as u32 as i32
    }

    /// Low 32 bits as an unsigned integer
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    /// Low 32 bits as an IEEE-754 single
    #[inline]
    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    /// Integer lane as milliseconds. Negative values read as zero.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::try_from(self.as_i64()).unwrap_or(0))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self(u64::from(value))
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self(i64::from(value) as u64)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self(value as u64)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        Self(u64::from(value.to_bits()))
    }
}

impl From<Duration> for PropertyValue {
    /// Stored as whole milliseconds, saturating at `i64::MAX`
    fn from(value: Duration) -> Self {
        Self::from(i64::try_from(value.as_millis()).unwrap_or(i64::MAX))
    }
}
