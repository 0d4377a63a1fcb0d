//! UCSC 2bit packed reference sequence.
//!
//! See <http://genome.ucsc.edu/FAQ/FAQformat.html#format7>. Only the
//! little-endian layout is supported.

use super::{ByteReader, read_growing};
use crate::contig_interval::alt_contig_name;
use crate::storage::RangeFile;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

pub const TWOBIT_MAGIC: u32 = 0x1A41_2743;

const BASES: [u8; 4] = *b"TCAG";

const FIRST_HEADER_FETCH: u64 = 16 * 1024;
const FIRST_RECORD_FETCH: u64 = 4 * 1024 - 1;
const MAX_FETCH: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIndexEntry {
    pub name: String,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwoBitHeader {
    pub sequence_count: u32,
    pub sequences: Vec<FileIndexEntry>,
}

impl TwoBitHeader {
    /// Exact name first, then the alternate `chr` spelling.
    pub fn find_sequence(&self, name: &str) -> Option<&FileIndexEntry> {
        let find = |wanted: &str| self.sequences.iter().find(|s| s.name == wanted);
        find(name).or_else(|| find(&alt_contig_name(name)))
    }
}

/// Per-sequence metadata preceding the packed bases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRecord {
    pub num_bases: u32,
    /// 0-based
    pub unknown_block_starts: Vec<u32>,
    pub unknown_block_lengths: Vec<u32>,
    pub num_mask_blocks: u32,
    /// Bytes from `file_offset` to the packed DNA
    pub dna_offset: u64,
    pub file_offset: u64,
}

pub fn parse_header(buf: &[u8]) -> Result<TwoBitHeader> {
    let mut r = ByteReader::new(buf);
    let magic = r.u32()?;
    if magic != TWOBIT_MAGIC {
        return Err(Error::BadMagic {
            expected: TWOBIT_MAGIC,
            found: magic,
        });
    }
    let version = r.u32()?;
    if version != 0 {
        return Err(Error::UnsupportedVersion(version));
    }
    let sequence_count = r.u32()?;
    r.skip(4)?;

    let mut sequences = Vec::with_capacity((sequence_count as usize).min(1 << 16));
    for _ in 0..sequence_count {
        let name_size = r.u8()? as usize;
        let name = String::from_utf8_lossy(r.take(name_size)?).into_owned();
        let offset = r.u32()?;
        sequences.push(FileIndexEntry { name, offset });
    }
    Ok(TwoBitHeader {
        sequence_count,
        sequences,
    })
}

/// Parse the sequence record at the start of `buf`, which was read from
/// `file_offset`. Mask blocks are skipped, not decoded.
pub fn parse_sequence_record(buf: &[u8], file_offset: u64) -> Result<SequenceRecord> {
    let mut r = ByteReader::new(buf);
    let num_bases = r.u32()?;
    let n_block_count = r.u32()? as usize;
    let unknown_block_starts = (0..n_block_count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
    let unknown_block_lengths = (0..n_block_count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
    let num_mask_blocks = r.u32()?;
    let dna_offset = r.position() as u64 + 8 * u64::from(num_mask_blocks) + 4;

    Ok(SequenceRecord {
        num_bases,
        unknown_block_starts,
        unknown_block_lengths,
        num_mask_blocks,
        dna_offset,
        file_offset,
    })
}

/// Unpack `num_bases` bases from 2-bit codes, most significant bits first,
/// skipping the first `start_base` (0-3) bases of the first byte.
pub fn unpack_dna(buf: &[u8], start_base: usize, num_bases: usize) -> Result<Vec<u8>> {
    let needed = (start_base + num_bases).div_ceil(4);
    if buf.len() < needed {
        return Err(Error::UnexpectedEof {
            offset: buf.len(),
            needed: needed - buf.len(),
        });
    }
    Ok((start_base..start_base + num_bases)
        .map(|i| BASES[((buf[i / 4] >> (6 - 2 * (i % 4))) & 3) as usize])
        .collect())
}

/// Overwrite with `N` every base inside one of `record`'s unknown blocks.
/// `bases[0]` is at 0-based position `range_start`.
pub fn mark_unknown(bases: &mut [u8], range_start: i64, record: &SequenceRecord) {
    let range_stop = range_start + bases.len() as i64 - 1;
    let blocks = record.unknown_block_starts.iter().zip(&record.unknown_block_lengths);
    for (&n_start, &n_length) in blocks {
        let n_start = i64::from(n_start);
        let n_stop = n_start + i64::from(n_length) - 1;
        let lo = n_start.max(range_start);
        let hi = n_stop.min(range_stop);
        for pos in lo..=hi {
            bases[(pos - range_start) as usize] = b'N';
        }
    }
}

pub struct TwoBit {
    file: Arc<RangeFile>,
    header: OnceCell<TwoBitHeader>,
    records: Mutex<HashMap<String, Arc<SequenceRecord>>>,
}

impl TwoBit {
    pub fn new(file: Arc<RangeFile>) -> Self {
        Self {
            file,
            header: OnceCell::new(),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn location(&self) -> &str {
        self.file.location()
    }

    pub async fn header(&self) -> Result<&TwoBitHeader> {
        self.header
            .get_or_try_init(|| async {
                read_growing(&self.file, 0, FIRST_HEADER_FETCH, MAX_FETCH, |buf| {
                    parse_header(buf)
                })
                .await
            })
            .await
    }

    pub async fn contig_list(&self) -> Result<Vec<String>> {
        Ok(self.header().await?.sequences.iter().map(|s| s.name.clone()).collect())
    }

    /// The header entry for `contig`, trying the alternate `chr` spelling.
    pub async fn find_sequence(&self, contig: &str) -> Result<&FileIndexEntry> {
        self.header()
            .await?
            .find_sequence(contig)
            .ok_or_else(|| Error::UnknownContig(format!("{} (not in {})", contig, self.location())))
    }

    pub async fn sequence_record(&self, contig: &str) -> Result<Arc<SequenceRecord>> {
        let entry = self.find_sequence(contig).await?;
        if let Some(record) = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry.name)
        {
            return Ok(Arc::clone(record));
        }

        let offset = u64::from(entry.offset);
        let record = read_growing(&self.file, offset, FIRST_RECORD_FETCH, MAX_FETCH, |buf| {
            parse_sequence_record(buf, offset)
        })
        .await?;
        debug!(
            contig = %entry.name,
            bases = record.num_bases,
            unknown_blocks = record.unknown_block_starts.len(),
            "loaded 2bit sequence record"
        );

        let record = Arc::new(record);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.name.clone(), Arc::clone(&record));
        Ok(record)
    }

    /// Bases of `contig` between 1-based inclusive positions `start` and
    /// `stop`. The stop is clamped to the end of the sequence.
    pub async fn get_features_in_range(
        &self,
        contig: &str,
        start: i64,
        stop: i64,
    ) -> Result<String> {
        if start > stop || start < 1 {
            return Err(Error::InvalidRange(format!(
                "requested 2bit range {}:{}-{} is invalid",
                contig, start, stop
            )));
        }
        let record = self.sequence_record(contig).await?;

        let start = start - 1;
        let stop = (stop - 1).min(i64::from(record.num_bases) - 1);
        if stop < start {
            return Ok(String::new());
        }
        let num_bases = (stop - start + 1) as usize;
        let first_byte = record.file_offset + record.dna_offset + (start / 4) as u64;
        let byte_length = num_bases.div_ceil(4) as u64 + 1;

        let buf = self.file.get_bytes(first_byte, byte_length).await?;
        let mut bases = unpack_dna(&buf, (start % 4) as usize, num_bases)?;
        mark_unknown(&mut bases, start, &record);
        String::from_utf8(bases).map_err(|e| Error::Internal(e.to_string()))
    }
}
