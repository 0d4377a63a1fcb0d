//! BGZF virtual file offsets.

use crate::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// A position inside a BGZF stream: the file offset of a compressed block
/// (`coffset`) and an offset into that block once inflated (`uoffset`).
///
/// The derived ordering compares `coffset` first, then `uoffset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VirtualOffset {
    pub coffset: u64,
    pub uoffset: u32,
}

impl VirtualOffset {
    pub fn new(coffset: u64, uoffset: u32) -> Self {
        Self { coffset, uoffset }
    }

    /// Decode the 8-byte little-endian form used in BAI files: the low 16
    /// bits are the in-block offset, the high 48 the block offset.
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::UnexpectedEof {
                offset: 0,
                needed: 8usize.saturating_sub(bytes.len()),
            })?;
        Ok(Self::from_raw(u64::from_le_bytes(raw)))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            coffset: raw >> 16,
            uoffset: (raw & 0xffff) as u32,
        }
    }

    pub fn to_raw(self) -> u64 {
        (self.coffset << 16) | u64::from(self.uoffset & 0xffff)
    }

    pub fn compare_to(&self, other: &VirtualOffset) -> Ordering {
        self.cmp(other)
    }

    pub fn is_less_than(&self, other: &VirtualOffset) -> bool {
        self < other
    }

    pub fn is_less_than_or_equal(&self, other: &VirtualOffset) -> bool {
        self <= other
    }

    pub fn is_equal(&self, other: &VirtualOffset) -> bool {
        self == other
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.coffset, self.uoffset)
    }
}
