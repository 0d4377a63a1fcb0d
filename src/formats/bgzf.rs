//! BGZF block handling.
//!
//! A BGZF file is a series of gzip members, each at most 64 KiB, whose gzip
//! header carries a `BC` extra subfield holding the total block size minus
//! one. Inflation itself is done by `flate2`; this module only finds block
//! boundaries and keeps track of where each inflated byte came from, so that
//! positions can be translated to and from [`VirtualOffset`]s.
//!
//! Block layout:
//! - Bytes 0-1: gzip magic (31, 139)
//! - Byte 3: FLG, with FEXTRA (0x04) set
//! - Bytes 10-11: XLEN
//! - Bytes 12+: extra subfields; `SI1=66 SI2=67 SLEN=2 BSIZE`

use crate::virtual_offset::VirtualOffset;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use std::io::{Read, Write};

/// Upper bound on the compressed size of a single block.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// The empty block that terminates every well-formed BGZF file.
pub const EOF_BLOCK: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, 66, 67, 2, 0, 27, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

const HEADER_LEN: usize = 18;

#[derive(Debug, Clone)]
pub struct InflatedBlock {
    /// File offset of the compressed block
    pub offset: u64,
    pub compressed_length: usize,
    pub data: Bytes,
}

/// Total compressed size of the block starting at `buf[0]`, or `None` when
/// `buf` is too short to hold its header.
fn block_size(buf: &[u8], offset: u64) -> Result<Option<usize>> {
    if buf.len() < 12 {
        return Ok(None);
    }
    if buf[0] != 31 || buf[1] != 139 {
        return Err(Error::Format(format!(
            "invalid BGZF magic at offset {}: [{}, {}]",
            offset, buf[0], buf[1]
        )));
    }
    if buf[3] & 0x04 == 0 {
        return Err(Error::Format(format!(
            "gzip member at offset {} has no extra field; not BGZF",
            offset
        )));
    }
    let xlen = u16::from_le_bytes([buf[10], buf[11]]) as usize;
    let extra_end = 12 + xlen;
    if buf.len() < extra_end {
        return Ok(None);
    }

    let mut pos = 12;
    while pos + 4 <= extra_end {
        let slen = u16::from_le_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
        if buf[pos] == 66 && buf[pos + 1] == 67 && slen == 2 && pos + 6 <= extra_end {
            let bsize = u16::from_le_bytes([buf[pos + 4], buf[pos + 5]]) as usize;
            return Ok(Some(bsize + 1));
        }
        pos += 4 + slen;
    }
    Err(Error::Format(format!(
        "gzip member at offset {} has no BSIZE subfield",
        offset
    )))
}

fn inflate_block(raw: &[u8], offset: u64) -> Result<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| Error::Format(format!("failed to inflate block at {}: {}", offset, e)))?;
    Ok(Bytes::from(out))
}

/// Inflate every complete block in `buf`, which begins with a block header
/// located at file offset `base`. A trailing partial block is ignored.
pub fn inflate_concatenated(buf: &[u8], base: u64) -> Result<Vec<InflatedBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let offset = base + pos as u64;
        let size = match block_size(&buf[pos..], offset)? {
            Some(size) if pos + size <= buf.len() => size,
            _ => break,
        };
        if size < HEADER_LEN {
            return Err(Error::Format(format!("BGZF block at {} is too small", offset)));
        }
        blocks.push(InflatedBlock {
            offset,
            compressed_length: size,
            data: inflate_block(&buf[pos..pos + size], offset)?,
        });
        pos += size;
    }
    Ok(blocks)
}

/// Inflate a buffer made entirely of complete blocks, e.g. a whole file.
pub fn inflate(buf: &[u8]) -> Result<Bytes> {
    let run = InflatedRun::new(inflate_concatenated(buf, 0)?);
    if run.end_offset() as usize != buf.len() {
        return Err(Error::Format(format!(
            "trailing partial BGZF block after {} bytes",
            run.end_offset()
        )));
    }
    Ok(run.data)
}

/// Compress `data` (at most 64 KiB) into a single BGZF block.
pub fn compress_block(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_BLOCK_SIZE {
        return Err(Error::InvalidInput(format!(
            "{} bytes do not fit in one BGZF block",
            data.len()
        )));
    }
    let mut encoder = flate2::GzBuilder::new()
        .extra(vec![66, 67, 2, 0, 0, 0])
        .write(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    let mut block = encoder.finish()?;

    let bsize = u16::try_from(block.len() - 1)
        .map_err(|_| Error::Internal("compressed block exceeds 64 KiB".to_string()))?;
    block[16..18].copy_from_slice(&bsize.to_le_bytes());
    Ok(block)
}

/// A contiguous run of inflated blocks, concatenated into one buffer.
#[derive(Debug, Clone)]
pub struct InflatedRun {
    blocks: Vec<InflatedBlock>,
    /// Position in `data` where each block's bytes begin
    starts: Vec<usize>,
    pub data: Bytes,
}

impl InflatedRun {
    pub fn new(blocks: Vec<InflatedBlock>) -> Self {
        let mut starts = Vec::with_capacity(blocks.len());
        let mut data = BytesMut::new();
        for block in &blocks {
            starts.push(data.len());
            data.extend_from_slice(&block.data);
        }
        Self {
            blocks,
            starts,
            data: data.freeze(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// File offset just past the last block.
    pub fn end_offset(&self) -> u64 {
        self.blocks
            .last()
            .map_or(0, |b| b.offset + b.compressed_length as u64)
    }

    /// The virtual offset of byte `pos` of the inflated data. The position
    /// one past the end maps to the start of the following block.
    pub fn virtual_offset(&self, pos: usize) -> VirtualOffset {
        if pos >= self.data.len() {
            return VirtualOffset::new(self.end_offset(), 0);
        }
        let idx = self.starts.partition_point(|&s| s <= pos) - 1;
        VirtualOffset::new(self.blocks[idx].offset, (pos - self.starts[idx]) as u32)
    }

    /// Position in the inflated data of a virtual offset, if it falls inside
    /// this run.
    pub fn position_of(&self, vo: VirtualOffset) -> Option<usize> {
        if vo.coffset == self.end_offset() && vo.uoffset == 0 {
            return Some(self.data.len());
        }
        let idx = self.blocks.iter().position(|b| b.offset == vo.coffset)?;
        let uoffset = vo.uoffset as usize;
        if uoffset > self.blocks[idx].data.len() {
            return None;
        }
        Some(self.starts[idx] + uoffset)
    }
}
