//! Binary codecs for genomic file formats.
//!
//! Each codec is split into pure parsing functions over byte slices and a
//! small async reader type that fetches bytes through a
//! [`RangeFile`](crate::storage::RangeFile).
//!
//! # Supported Formats
//!
//! - [`bam`] - BAM alignments (header, records, windowed chunk reads)
//! - [`bai`] - BAI index resolution (bins, linear index, chunk merging)
//! - [`bgzf`] - BGZF block splitting and inflation
//! - [`bigbed`] - UCSC bigBed indexed feature tables
//! - [`twobit`] - UCSC 2bit packed reference sequence
//! - [`vcf`] - Plain-text VCF variant lines

pub mod bai;
pub mod bam;
pub mod bgzf;
pub mod bigbed;
pub mod sam_read;
pub mod twobit;
pub mod vcf;

pub use bai::{BaiFile, Chunk, IndexChunks};
pub use bam::{BamFile, BamHeader};
pub use bigbed::{BedRow, BigBed, FeatureBlock};
pub use sam_read::SamRead;
pub use twobit::TwoBit;
pub use vcf::{Variant, VcfFile};

use crate::storage::RangeFile;
use crate::{Error, Result};
use bytes::Bytes;
use tracing::debug;

/// Little-endian cursor over a byte slice.
///
/// Every read checks bounds and fails with [`Error::UnexpectedEof`] instead
/// of panicking, so callers can tell "need more bytes" apart from corrupt data.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Bytes up to (not including) the next NUL; the NUL is consumed.
    pub fn c_str(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0).ok_or(Error::UnexpectedEof {
            offset: self.buf.len(),
            needed: 1,
        })?;
        let out = self.take(len)?;
        self.pos += 1;
        Ok(out)
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// A non-negative `i32` count, as used for lengths in BAM and BAI.
    pub fn count(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| Error::Format(format!("negative count: {}", n)))
    }
}

/// Fetch `[start, start + size)` and parse it, doubling `size` each time the
/// parser runs out of bytes, until `limit` bytes have been tried or the file
/// has nothing more to give.
pub(crate) async fn read_growing<T>(
    file: &RangeFile,
    start: u64,
    initial: u64,
    limit: u64,
    parse: impl Fn(&Bytes) -> Result<T>,
) -> Result<T> {
    let mut size = initial;
    loop {
        let bytes = file.get_bytes(start, size).await?;
        match parse(&bytes) {
            Err(Error::UnexpectedEof { .. }) if (bytes.len() as u64) == size && size < limit => {
                debug!(
                    location = file.location(),
                    start,
                    size,
                    "short read, retrying with a larger window"
                );
                size = (size * 2).min(limit);
            }
            Err(Error::UnexpectedEof { .. }) => {
                return Err(Error::Format(format!(
                    "{} is truncated or corrupt: nothing complete within {} bytes of offset {}",
                    file.location(),
                    bytes.len(),
                    start
                )));
            }
            other => return other,
        }
    }
}
