//! BAI index resolution.
//!
//! A BAI index is a multi-level binning index. Each alignment is filed in the
//! smallest bin that contains it, so a locus is covered by one bin per level:
//!
//! - 512 Mbp (bin 0)
//! - 64 Mbp (bins 1-8)
//! - 8 Mbp (bins 9-72)
//! - 1 Mbp (bins 73-584)
//! - 128 kbp (bins 585-4680)
//! - 16 kbp (bins 4681-37448)
//!
//! Each bin lists chunks of the BAM file as virtual-offset ranges. A linear
//! index of 16 kbp windows records the earliest offset of any alignment
//! overlapping each window, which lets us discard chunks from the large bins
//! that end before anything of interest.
//!
//! Per-contig sections are parsed lazily and memoized on the [`BaiFile`].

use crate::contig_interval::ContigInterval;
use crate::formats::ByteReader;
use crate::storage::RangeFile;
use crate::virtual_offset::VirtualOffset;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

pub const BAI_MAGIC: [u8; 4] = *b"BAI\x01";

/// Bin id holding per-reference metadata rather than chunks.
pub const PSEUDO_BIN: u32 = 37450;

const LINEAR_WINDOW_SHIFT: u32 = 14;

/// Positions beyond this are outside the binning scheme.
const MAX_POSITION: i64 = 1 << 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Chunk {
    pub begin: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(begin: VirtualOffset, end: VirtualOffset) -> Self {
        Self { begin, end }
    }
}

/// Byte spans of each contig's section inside a BAI file, supplied up front
/// so that only the sections actually queried need to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChunks {
    /// `[start, stop)` byte offsets of each reference's section
    pub chunks: Vec<[u64; 2]>,
    /// File offset of the first alignment block in the BAM file
    #[serde(rename = "minBlockIndex")]
    pub min_block_index: u64,
}

/// Bin containing the alignment `[beg, end)` (zero-based, half-open).
pub fn reg2bin(beg: i64, end: i64) -> u32 {
    let end = end - 1;
    if beg >> 14 == end >> 14 {
        return (((1 << 15) - 1) / 7 + (beg >> 14)) as u32;
    }
    if beg >> 17 == end >> 17 {
        return (((1 << 12) - 1) / 7 + (beg >> 17)) as u32;
    }
    if beg >> 20 == end >> 20 {
        return (((1 << 9) - 1) / 7 + (beg >> 20)) as u32;
    }
    if beg >> 23 == end >> 23 {
        return (((1 << 6) - 1) / 7 + (beg >> 23)) as u32;
    }
    if beg >> 26 == end >> 26 {
        return (((1 << 3) - 1) / 7 + (beg >> 26)) as u32;
    }
    0
}

/// Every bin that may overlap the region `[beg, end)` (zero-based, half-open).
pub fn reg2bins(beg: i64, end: i64) -> Vec<u32> {
    let beg = beg.clamp(0, MAX_POSITION - 1);
    let end = (end - 1).clamp(beg, MAX_POSITION - 1);
    let mut bins = vec![0];
    for (offset, shift) in [(1, 26), (9, 23), (73, 20), (585, 17), (4681, 14)] {
        bins.extend((offset + (beg >> shift))..=(offset + (end >> shift)));
    }
    bins.into_iter().map(|b| b as u32).collect()
}

/// Drop chunks ending before `minimum_offset`, then sort and merge chunks
/// that overlap or touch.
pub fn optimize_chunk_list(mut chunks: Vec<Chunk>, minimum_offset: VirtualOffset) -> Vec<Chunk> {
    chunks.retain(|c| c.end >= minimum_offset);
    chunks.sort();

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.begin <= last.end => last.end = last.end.max(chunk.end),
            _ => merged.push(chunk),
        }
    }
    merged
}

/// One reference's section of the index.
#[derive(Debug, Clone, Default)]
pub struct ContigIndex {
    pub bins: HashMap<u32, Vec<Chunk>>,
    pub linear_index: Vec<VirtualOffset>,
}

impl ContigIndex {
    /// Parse a section starting at its `n_bin` field.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let n_bin = r.count()?;
        let mut bins = HashMap::with_capacity(n_bin);
        for _ in 0..n_bin {
            let bin = r.u32()?;
            let n_chunk = r.count()?;
            let mut chunks = Vec::with_capacity(n_chunk);
            for _ in 0..n_chunk {
                let begin = VirtualOffset::from_raw(r.u64()?);
                let end = VirtualOffset::from_raw(r.u64()?);
                chunks.push(Chunk::new(begin, end));
            }
            if bin != PSEUDO_BIN {
                bins.insert(bin, chunks);
            }
        }
        let n_intv = r.count()?;
        let linear_index = (0..n_intv)
            .map(|_| r.u64().map(VirtualOffset::from_raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bins, linear_index })
    }

    /// The linear-index lower bound for alignments overlapping `start`.
    pub fn minimum_offset(&self, start: i64) -> VirtualOffset {
        let window = (start.max(0) >> LINEAR_WINDOW_SHIFT) as usize;
        match self.linear_index.len() {
            0 => VirtualOffset::default(),
            n => self.linear_index[window.min(n - 1)],
        }
    }

    /// Chunks that may contain alignments overlapping `[start, stop]`.
    pub fn chunks_for_interval(&self, start: i64, stop: i64) -> Vec<Chunk> {
        let candidates: Vec<Chunk> = reg2bins(start, stop.saturating_add(1))
            .into_iter()
            .filter_map(|bin| self.bins.get(&bin))
            .flatten()
            .copied()
            .collect();
        let count = candidates.len();
        let chunks = optimize_chunk_list(candidates, self.minimum_offset(start));
        debug!(candidates = count, merged = chunks.len(), "resolved index chunks");
        chunks
    }
}

/// Where each contig's section sits in the index file.
#[derive(Debug, Clone)]
struct IndexLayout {
    spans: Vec<(u64, u64)>,
    min_block_index: Option<u64>,
    n_no_coor: Option<u64>,
}

impl IndexLayout {
    /// A quick pass over a whole index that records section boundaries
    /// without building any bins.
    fn scan(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let magic = r.array::<4>()?;
        if magic != BAI_MAGIC {
            return Err(Error::BadMagic {
                expected: u32::from_le_bytes(BAI_MAGIC),
                found: u32::from_le_bytes(magic),
            });
        }
        let n_ref = r.count()?;
        let mut spans = Vec::with_capacity(n_ref);
        let mut min_block_index: Option<u64> = None;
        for _ in 0..n_ref {
            let start = r.position() as u64;
            let n_bin = r.count()?;
            for _ in 0..n_bin {
                let bin = r.u32()?;
                let n_chunk = r.count()?;
                if bin == PSEUDO_BIN {
                    r.skip(n_chunk * 16)?;
                    continue;
                }
                for _ in 0..n_chunk {
                    let begin = VirtualOffset::from_raw(r.u64()?);
                    r.skip(8)?;
                    let first = min_block_index.map_or(begin.coffset, |m| m.min(begin.coffset));
                    min_block_index = Some(first);
                }
            }
            let n_intv = r.count()?;
            r.skip(n_intv * 8)?;
            spans.push((start, r.position() as u64));
        }
        let n_no_coor = if r.remaining() >= 8 { Some(r.u64()?) } else { None };
        Ok(Self {
            spans,
            min_block_index,
            n_no_coor,
        })
    }

    fn from_index_chunks(chunks: &IndexChunks) -> Self {
        Self {
            spans: chunks.chunks.iter().map(|[start, stop]| (*start, *stop)).collect(),
            min_block_index: Some(chunks.min_block_index),
            n_no_coor: None,
        }
    }
}

fn corrupt(err: Error) -> Error {
    match err {
        Error::UnexpectedEof { .. } | Error::Format(_) => Error::CorruptIndex(err.to_string()),
        other => other,
    }
}

/// A BAI index read through a [`RangeFile`].
pub struct BaiFile {
    file: Arc<RangeFile>,
    index_chunks: Option<IndexChunks>,
    layout: OnceCell<IndexLayout>,
    contigs: Mutex<HashMap<usize, Arc<ContigIndex>>>,
}

impl BaiFile {
    /// Index without precomputed section spans; the whole file is fetched on
    /// first use.
    pub fn new(file: Arc<RangeFile>) -> Self {
        Self {
            file,
            index_chunks: None,
            layout: OnceCell::new(),
            contigs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_index_chunks(file: Arc<RangeFile>, index_chunks: IndexChunks) -> Self {
        Self {
            index_chunks: Some(index_chunks),
            ..Self::new(file)
        }
    }

    async fn layout(&self) -> Result<&IndexLayout> {
        self.layout
            .get_or_try_init(|| async {
                if let Some(chunks) = &self.index_chunks {
                    return Ok(IndexLayout::from_index_chunks(chunks));
                }
                debug!(location = self.file.location(), "fetching BAM index");
                let buf = self.file.get_all().await?;
                IndexLayout::scan(&buf).map_err(corrupt)
            })
            .await
    }

    pub async fn num_references(&self) -> Result<usize> {
        Ok(self.layout().await?.spans.len())
    }

    /// Unplaced reads recorded at the end of the index, when present.
    pub async fn num_unplaced(&self) -> Result<Option<u64>> {
        Ok(self.layout().await?.n_no_coor)
    }

    /// Number of leading BAM bytes that hold the header: the offset of the
    /// first alignment block, if the index records any.
    pub async fn header_size(&self) -> Result<Option<u64>> {
        Ok(self.layout().await?.min_block_index)
    }

    async fn index_for_contig(&self, contig: usize) -> Result<Arc<ContigIndex>> {
        if let Some(index) = self.lock().get(&contig) {
            return Ok(index.clone());
        }

        let layout = self.layout().await?;
        let (start, stop) = layout.spans[contig];
        if stop < start {
            return Err(Error::CorruptIndex(format!(
                "section for reference {} ends before it starts",
                contig
            )));
        }
        let buf = self.file.get_bytes(start, stop - start).await?;
        let index = Arc::new(ContigIndex::parse(&buf).map_err(corrupt)?);

        Ok(self.lock().entry(contig).or_insert(index).clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Arc<ContigIndex>>> {
        self.contigs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merged chunks of the BAM file that may hold alignments overlapping
    /// `range`, in file order.
    pub async fn chunks_for_range(&self, range: &ContigInterval<i32>) -> Result<Vec<Chunk>> {
        let n_ref = self.num_references().await?;
        let contig = usize::try_from(range.contig)
            .ok()
            .filter(|&c| c < n_ref)
            .ok_or_else(|| {
                Error::InvalidContig(format!("reference id {} of {}", range.contig, n_ref))
            })?;

        let index = self.index_for_contig(contig).await?;
        Ok(index.chunks_for_interval(range.start(), range.stop()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn vo(coffset: u64, uoffset: u32) -> VirtualOffset {
        VirtualOffset::new(coffset, uoffset)
    }

    fn chunk(begin: u64, end: u64) -> Chunk {
        Chunk::new(vo(begin, 0), vo(end, 0))
    }

    pub(crate) type Reference = (Vec<(u32, Vec<Chunk>)>, Vec<VirtualOffset>);

    pub(crate) fn encode_index(references: &[Reference]) -> Vec<u8> {
        let mut buf = BAI_MAGIC.to_vec();
        buf.extend((references.len() as i32).to_le_bytes());
        for (bins, linear) in references {
            buf.extend((bins.len() as i32).to_le_bytes());
            for (bin, chunks) in bins {
                buf.extend(bin.to_le_bytes());
                buf.extend((chunks.len() as i32).to_le_bytes());
                for c in chunks {
                    buf.extend(c.begin.to_raw().to_le_bytes());
                    buf.extend(c.end.to_raw().to_le_bytes());
                }
            }
            buf.extend((linear.len() as i32).to_le_bytes());
            for v in linear {
                buf.extend(v.to_raw().to_le_bytes());
            }
        }
        buf.extend(7u64.to_le_bytes());
        buf
    }

    fn index_file(buf: Vec<u8>) -> Arc<RangeFile> {
        Arc::new(RangeFile::new(Arc::new(MemoryStorage::new("test.bai", buf))))
    }

    #[test]
    fn test_reg2bins_first_base() {
        assert_eq!(reg2bins(0, 1), vec![0, 1, 9, 73, 585, 4681]);
    }

    #[test]
    fn test_reg2bins_spans_two_windows() {
        let bins = reg2bins(16000, 17000);
        let level5: Vec<u32> = bins.into_iter().filter(|&b| b >= 4681).collect();
        assert_eq!(level5, vec![4681, 4682]);
    }

    #[test]
    fn test_reg2bin() {
        assert_eq!(reg2bin(0, 1), 4681);
        assert_eq!(reg2bin(16000, 17000), 585);
        assert_eq!(reg2bin(0, 1 << 29), 0);
    }

    #[test]
    fn test_merge_overlapping_chunks() {
        let merged = optimize_chunk_list(vec![chunk(40, 80), chunk(10, 50)], vo(0, 0));
        assert_eq!(merged, vec![chunk(10, 80)]);
    }

    #[test]
    fn test_merge_adjacent_and_disjoint_chunks() {
        let merged = optimize_chunk_list(
            vec![chunk(100, 200), chunk(10, 50), chunk(50, 60), chunk(20, 30)],
            vo(0, 0),
        );
        assert_eq!(merged, vec![chunk(10, 60), chunk(100, 200)]);
    }

    #[test]
    fn test_linear_index_drops_early_chunks() {
        let merged = optimize_chunk_list(vec![chunk(10, 50), chunk(60, 80)], vo(55, 0));
        assert_eq!(merged, vec![chunk(60, 80)]);

        // A chunk ending exactly at the minimum offset is kept.
        let merged = optimize_chunk_list(vec![chunk(10, 55)], vo(55, 0));
        assert_eq!(merged, vec![chunk(10, 55)]);
    }

    #[test]
    fn test_contig_index_minimum_offset() {
        let index = ContigIndex {
            bins: HashMap::new(),
            linear_index: vec![vo(10, 0), vo(20, 0), vo(30, 0)],
        };
        assert_eq!(index.minimum_offset(0), vo(10, 0));
        assert_eq!(index.minimum_offset(16384), vo(20, 0));
        assert_eq!(index.minimum_offset(10 * 16384), vo(30, 0));
        assert_eq!(ContigIndex::default().minimum_offset(5000), vo(0, 0));
    }

    #[tokio::test]
    async fn test_chunks_for_range() {
        let buf = encode_index(&[
            (
                vec![
                    (4681, vec![chunk(100, 200)]),
                    (4682, vec![chunk(300, 400)]),
                    (0, vec![chunk(150, 350)]),
                    (PSEUDO_BIN, vec![chunk(100, 400), Chunk::new(vo(0, 5), vo(0, 0))]),
                ],
                vec![vo(100, 0), vo(300, 0)],
            ),
            (vec![(4681, vec![chunk(500, 600)])], vec![vo(500, 0)]),
        ]);
        let bai = BaiFile::new(index_file(buf));

        assert_eq!(bai.num_references().await.unwrap(), 2);
        assert_eq!(bai.num_unplaced().await.unwrap(), Some(7));
        assert_eq!(bai.header_size().await.unwrap(), Some(100));

        let chunks = bai.chunks_for_range(&ContigInterval::new(0, 0, 100)).await.unwrap();
        assert_eq!(chunks, vec![chunk(100, 350)]);

        let chunks = bai.chunks_for_range(&ContigInterval::new(0, 16384, 16500)).await.unwrap();
        assert_eq!(chunks, vec![chunk(150, 400)]);

        let chunks = bai.chunks_for_range(&ContigInterval::new(1, 0, 10)).await.unwrap();
        assert_eq!(chunks, vec![chunk(500, 600)]);
    }

    #[tokio::test]
    async fn test_invalid_contig() {
        let buf = encode_index(&[(vec![], vec![])]);
        let bai = BaiFile::new(index_file(buf));
        for contig in [-1, 1, 5] {
            let err = bai
                .chunks_for_range(&ContigInterval::new(contig, 0, 10))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidContig(_)), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_bad_magic_and_corrupt_index() {
        let bai = BaiFile::new(index_file(b"BAM\x01\x00\x00\x00\x00".to_vec()));
        assert!(matches!(
            bai.num_references().await,
            Err(Error::BadMagic { .. })
        ));

        let mut buf = encode_index(&[(vec![(4681, vec![chunk(1, 2)])], vec![])]);
        buf.truncate(20);
        let bai = BaiFile::new(index_file(buf));
        assert!(matches!(
            bai.num_references().await,
            Err(Error::CorruptIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_index_chunks_fetch_only_one_section() {
        let buf = encode_index(&[
            (vec![(4681, vec![chunk(100, 200)])], vec![vo(100, 0)]),
            (vec![(4681, vec![chunk(500, 600)])], vec![vo(500, 0)]),
        ]);
        let full = IndexLayout::scan(&buf).unwrap();
        let index_chunks = IndexChunks {
            chunks: full.spans.iter().map(|&(a, b)| [a, b]).collect(),
            min_block_index: 100,
        };
        let file = index_file(buf);
        let bai = BaiFile::with_index_chunks(file.clone(), index_chunks);

        let chunks = bai.chunks_for_range(&ContigInterval::new(1, 0, 10)).await.unwrap();
        assert_eq!(chunks, vec![chunk(500, 600)]);
        assert_eq!(file.num_network_requests(), 1);

        // Memoized: a second query on the same contig costs nothing.
        bai.chunks_for_range(&ContigInterval::new(1, 5, 20)).await.unwrap();
        assert_eq!(file.num_network_requests(), 1);
    }

    #[test]
    fn test_index_chunks_json() {
        let parsed: IndexChunks =
            serde_json::from_str(r#"{"chunks": [[8, 100], [100, 164]], "minBlockIndex": 1234}"#)
                .unwrap();
        assert_eq!(parsed.chunks, vec![[8, 100], [100, 164]]);
        assert_eq!(parsed.min_block_index, 1234);
    }
}
