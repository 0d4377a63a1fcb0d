//! BAM header and alignment decoding, and indexed range queries.
//!
//! See <https://samtools.github.io/hts-specs/SAMv1.pdf>, section 4.2.

use super::bai::{BaiFile, Chunk};
use super::bgzf::{InflatedRun, MAX_BLOCK_SIZE, inflate_concatenated};
use super::sam_read::SamRead;
use super::{ByteReader, read_growing};
use crate::contig_interval::{ContigInterval, alt_contig_name};
use crate::storage::RangeFile;
use crate::virtual_offset::VirtualOffset;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const BAM_MAGIC: [u8; 4] = *b"BAM\x01";

/// Never fetch more than this many compressed bytes in one request.
pub const MAX_FETCH: u64 = 2 * 65536;

/// Header fetch size used when no index says where the header ends.
const DEFAULT_HEADER_FETCH: u64 = 2 * 65535;
const HEADER_FETCH_LIMIT: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub name: String,
    pub length: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BamHeader {
    pub text: String,
    pub references: Vec<Reference>,
}

impl BamHeader {
    /// Find a reference by name, trying the exact name first and then the
    /// alternate `chr` spelling. Returns its id and canonical name.
    pub fn contig_index(&self, name: &str) -> Option<(usize, &str)> {
        let find = |wanted: &str| {
            self.references
                .iter()
                .position(|r| r.name == wanted)
                .map(|i| (i, self.references[i].name.as_str()))
        };
        find(name).or_else(|| find(&alt_contig_name(name)))
    }

    pub fn reference_name(&self, ref_id: i32) -> Option<&str> {
        usize::try_from(ref_id)
            .ok()
            .and_then(|i| self.references.get(i))
            .map(|r| r.name.as_str())
    }
}

fn read_header(r: &mut ByteReader<'_>) -> Result<BamHeader> {
    let magic = r.array::<4>()?;
    if magic != BAM_MAGIC {
        return Err(Error::BadMagic {
            expected: u32::from_le_bytes(BAM_MAGIC),
            found: u32::from_le_bytes(magic),
        });
    }
    let l_text = r.count()?;
    let text = String::from_utf8_lossy(r.take(l_text)?)
        .trim_end_matches('\0')
        .to_string();
    let n_ref = r.count()?;
    let mut references = Vec::with_capacity(n_ref.min(1 << 16));
    for _ in 0..n_ref {
        let l_name = r.count()?;
        let name = String::from_utf8_lossy(r.take(l_name)?)
            .trim_end_matches('\0')
            .to_string();
        let length = r.i32()?;
        references.push(Reference { name, length });
    }
    Ok(BamHeader { text, references })
}

/// Parse the header at the start of an inflated BAM stream.
pub fn parse_header(buf: &[u8]) -> Result<BamHeader> {
    read_header(&mut ByteReader::new(buf))
}

/// Alignments decoded from one buffer.
#[derive(Debug)]
pub struct DecodedAlignments {
    pub reads: Vec<SamRead>,
    /// Position just past the last complete record
    pub next: usize,
}

/// Decode length-prefixed records from `data[start..]`.
///
/// With `stop`, every record starting before `stop` must be complete, and a
/// truncated one is an error. Without it, decoding ends quietly at the first
/// record that runs off the end of `data`. `offset_of` maps a buffer position
/// to the record's virtual offset; `ref_names` resolves reference ids.
pub fn decode_alignments(
    data: &Bytes,
    start: usize,
    stop: Option<usize>,
    offset_of: impl Fn(usize) -> VirtualOffset,
    ref_names: &[Arc<str>],
) -> Result<DecodedAlignments> {
    let limit = stop.unwrap_or(data.len());
    let mut reads = Vec::new();
    let mut pos = start;
    while pos < limit {
        let block_size = data
            .get(pos..pos + 4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        let body_end = match block_size {
            Some(n) if n >= 0 && pos + 4 + n as usize <= data.len() => pos + 4 + n as usize,
            Some(n) if n < 0 => {
                let at = offset_of(pos);
                return Err(Error::Format(format!("negative block_size {} at {}", n, at)));
            }
            _ if stop.is_some() => {
                return Err(Error::TruncatedRecord(format!(
                    "record at {} runs past the end of its chunk",
                    offset_of(pos)
                )));
            }
            _ => break,
        };

        let offset = offset_of(pos);
        let body = data.slice(pos + 4..body_end);
        let mut read = SamRead::new(body, offset, None)?;
        read.ref_name = usize::try_from(read.ref_id).ok().and_then(|i| ref_names.get(i)).cloned();
        reads.push(read);
        pos = body_end;
    }
    Ok(DecodedAlignments { reads, next: pos })
}

/// Keep alignments overlapping (or, with `contained`, inside) `range`.
///
/// An alignment spans `[pos, pos + l_seq - 1]`; see [`SamRead::span`].
pub fn filter_alignments(
    reads: Vec<SamRead>,
    range: &ContigInterval<i32>,
    contained: bool,
) -> Vec<SamRead> {
    reads
        .into_iter()
        .filter(|read| {
            let span = read.span();
            if contained {
                range.contains_interval(&span)
            } else {
                span.intersects(range)
            }
        })
        .collect()
}

/// Once a record starts past the range, later records in file order can't
/// overlap it.
fn starts_after(read: &SamRead, range: &ContigInterval<i32>) -> bool {
    read.ref_id > range.contig
        || (read.ref_id == range.contig && i64::from(read.pos) > range.stop())
}

fn reference_names(header: &BamHeader) -> Vec<Arc<str>> {
    header.references.iter().map(|r| Arc::from(r.name.as_str())).collect()
}

#[derive(Debug)]
struct LoadedHeader {
    header: BamHeader,
    names: Vec<Arc<str>>,
}

/// A BAM file, optionally with its BAI index.
pub struct BamFile {
    file: Arc<RangeFile>,
    index: Option<BaiFile>,
    header: OnceCell<LoadedHeader>,
    max_fetch: u64,
}

impl BamFile {
    pub fn new(file: Arc<RangeFile>, index: Option<BaiFile>) -> Self {
        Self {
            file,
            index,
            header: OnceCell::new(),
            max_fetch: MAX_FETCH,
        }
    }

    /// Cap on compressed bytes fetched per request while scanning chunks.
    pub fn with_max_fetch(mut self, bytes: u64) -> Self {
        self.max_fetch = bytes.max(1);
        self
    }

    pub fn location(&self) -> &str {
        self.file.location()
    }

    async fn loaded_header(&self) -> Result<&LoadedHeader> {
        self.header
            .get_or_try_init(|| async {
                let initial = match &self.index {
                    Some(index) => index.header_size().await?.filter(|&n| n > 0),
                    None => None,
                }
                .unwrap_or(DEFAULT_HEADER_FETCH);
                info!(location = self.location(), bytes = initial, "fetching BAM header");

                let limit = initial.max(HEADER_FETCH_LIMIT);
                let header = read_growing(&self.file, 0, initial, limit, |buf| {
                    let run = InflatedRun::new(inflate_concatenated(buf, 0)?);
                    parse_header(&run.data)
                })
                .await?;
                let names = reference_names(&header);
                Ok(LoadedHeader { header, names })
            })
            .await
    }

    pub async fn header(&self) -> Result<&BamHeader> {
        Ok(&self.loaded_header().await?.header)
    }

    /// Map a contig name to its reference id and canonical name.
    pub async fn contig_index(&self, name: &str) -> Result<(usize, String)> {
        self.header()
            .await?
            .contig_index(name)
            .map(|(i, canonical)| (i, canonical.to_string()))
            .ok_or_else(|| Error::UnknownContig(name.to_string()))
    }

    /// Fetch all alignments overlapping `range` (or contained in it, with
    /// `contained`). Requires an index.
    pub async fn get_alignments_in_range(
        &self,
        range: &ContigInterval<String>,
        contained: bool,
    ) -> Result<Vec<SamRead>> {
        let index = self.index.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("range queries on {} need a BAI index", self.location()))
        })?;
        let (idx, _) = self.contig_index(&range.contig).await?;
        let ref_id = i32::try_from(idx)
            .map_err(|_| Error::Internal(format!("reference id {} overflows", idx)))?;
        let idx_range = ContigInterval::new(ref_id, range.start(), range.stop());

        let chunks = index.chunks_for_range(&idx_range).await?;
        debug!(range = %range, chunks = chunks.len(), "fetching alignments");

        let names = &self.loaded_header().await?.names;
        let mut reads = Vec::new();
        for chunk in &chunks {
            if self.scan_chunk(chunk, names, Some(&idx_range), &mut reads).await? {
                break;
            }
        }
        Ok(filter_alignments(reads, &idx_range, contained))
    }

    /// Every alignment in one chunk.
    pub async fn read_chunk(&self, chunk: &Chunk) -> Result<Vec<SamRead>> {
        let names = &self.loaded_header().await?.names;
        let mut reads = Vec::new();
        self.scan_chunk(chunk, names, None, &mut reads).await?;
        Ok(reads)
    }

    /// The single alignment starting at `offset`.
    pub async fn read_at_offset(&self, offset: VirtualOffset) -> Result<SamRead> {
        let names = &self.loaded_header().await?.names;
        let length = self.max_fetch.max(2 * MAX_BLOCK_SIZE as u64);
        let buf = self.file.get_bytes(offset.coffset, length).await?;
        let run = InflatedRun::new(inflate_concatenated(&buf, offset.coffset)?);
        let start = run.position_of(offset).ok_or_else(|| {
            Error::InvalidInput(format!("no BGZF block at {} in {}", offset, self.location()))
        })?;
        decode_alignments(&run.data, start, None, |p| run.virtual_offset(p), names)?
            .reads
            .into_iter()
            .next()
            .ok_or_else(|| {
                let location = self.location();
                Error::Format(format!("unable to read alignment at {} in {}", offset, location))
            })
    }

    /// Read and decode the entire file. Only sensible for small files.
    pub async fn read_all(&self) -> Result<(BamHeader, Vec<SamRead>)> {
        let buf = self.file.get_all().await?;
        let run = InflatedRun::new(inflate_concatenated(&buf, 0)?);
        let mut r = ByteReader::new(&run.data);
        let header = read_header(&mut r)?;
        let names = reference_names(&header);
        let decoded = decode_alignments(
            &run.data,
            r.position(),
            Some(run.data.len()),
            |p| run.virtual_offset(p),
            &names,
        )?;
        Ok((header, decoded.reads))
    }

    /// Decode the records of `chunk` in windows of at most `max_fetch`
    /// compressed bytes, appending them to `reads`. Returns true once a
    /// record starting past `range` has been seen.
    async fn scan_chunk(
        &self,
        chunk: &Chunk,
        names: &[Arc<str>],
        range: Option<&ContigInterval<i32>>,
        reads: &mut Vec<SamRead>,
    ) -> Result<bool> {
        let full_span = |begin: VirtualOffset| {
            (chunk.end.coffset + MAX_BLOCK_SIZE as u64).saturating_sub(begin.coffset).max(1)
        };
        let mut begin = chunk.begin;
        let mut window = self.max_fetch.min(full_span(begin));

        while begin < chunk.end {
            let buf = self.file.get_bytes(begin.coffset, window).await?;
            let at_eof = (buf.len() as u64) < window;
            let run = InflatedRun::new(inflate_concatenated(&buf, begin.coffset)?);

            let Some(start) = run.position_of(begin) else {
                if at_eof {
                    break;
                }
                // The first block didn't fit in the window.
                window *= 2;
                continue;
            };
            let stop = run.position_of(chunk.end);
            let decoded =
                decode_alignments(&run.data, start, stop, |p| run.virtual_offset(p), names)?;
            let next = run.virtual_offset(decoded.next);

            let abort =
                range.is_some_and(|r| decoded.reads.iter().any(|read| starts_after(read, r)));
            reads.extend(decoded.reads);
            if abort {
                return Ok(true);
            }
            if stop.is_some() {
                break;
            }
            if next > begin {
                begin = next;
                window = self.max_fetch.min(full_span(begin));
            } else if at_eof {
                break;
            } else {
                // A single record larger than the window.
                window *= 2;
            }
        }
        Ok(false)
    }
}
