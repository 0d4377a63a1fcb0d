//! UCSC bigBed indexed feature tables.
//!
//! See <https://genome.ucsc.edu/goldenPath/help/bigBed.html>. The header,
//! chromosome B+ tree and R-tree index are read once; feature blocks are
//! fetched on demand, inflated when the file is compressed, and split into
//! BED rows. Only the little-endian layout is supported, and zoom levels are
//! parsed but never read.

use super::{ByteReader, read_growing};
use crate::contig_interval::{ContigInterval, alt_contig_name};
use crate::storage::RangeFile;
use crate::{Error, Result};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const BIGBED_MAGIC: u32 = 0x8789_F2EB;
pub const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;
pub const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;

const HEADER_LEN: usize = 64;
const CHROM_TREE_HEADER_LEN: u64 = 32;
const CIR_TREE_HEADER_LEN: u64 = 48;

const FIRST_HEADER_FETCH: u64 = 1024;
const FIRST_TREE_FETCH: u64 = 4 * 1024;
const MAX_FETCH: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoomHeader {
    pub reduction_level: u32,
    pub data_offset: u64,
    pub index_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BigBedHeader {
    pub version: u16,
    pub chromosome_tree_offset: u64,
    pub unzoomed_data_offset: u64,
    pub unzoomed_index_offset: u64,
    pub field_count: u16,
    pub defined_field_count: u16,
    pub auto_sql_offset: u64,
    pub total_summary_offset: u64,
    /// 0 if the data blocks are stored uncompressed
    pub uncompress_buf_size: u32,
    pub extension_offset: u64,
    pub zoom_headers: Vec<ZoomHeader>,
}

impl BigBedHeader {
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromInfo {
    pub name: String,
    pub id: u32,
    pub size: u32,
}

/// A leaf of the R-tree index: one data block and the span it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexBlock {
    pub start_chrom_ix: u32,
    pub start_base: u32,
    pub end_chrom_ix: u32,
    /// Exclusive
    pub end_base: u32,
    pub offset: u64,
    pub size: u64,
}

impl IndexBlock {
    /// Whether the block may hold features in the closed range
    /// `[start, stop]` of chromosome `chrom_id`.
    pub fn overlaps(&self, chrom_id: u32, start: i64, stop: i64) -> bool {
        let block_start = (self.start_chrom_ix, i64::from(self.start_base));
        let block_end = (self.end_chrom_ix, i64::from(self.end_base));
        block_start <= (chrom_id, stop) && (chrom_id, start) < block_end
    }
}

/// A BED row as stored in a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedEntry {
    pub chrom_id: u32,
    pub start: u32,
    /// Exclusive
    pub end: u32,
    /// Tab-separated fields after the third column
    pub rest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BedRow {
    pub contig: String,
    pub start: i64,
    /// Exclusive, as in the file
    pub stop: i64,
    pub rest: String,
}

impl BedRow {
    /// The row as a closed interval. Zero-length rows cover their start.
    pub fn interval(&self) -> ContigInterval<String> {
        let stop = (self.stop - 1).max(self.start);
        ContigInterval::new(self.contig.clone(), self.start, stop)
    }
}

/// Every row of one data block, with the closed range the block covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureBlock {
    pub range: ContigInterval<String>,
    pub rows: Vec<BedRow>,
}

pub fn parse_header(buf: &[u8]) -> Result<BigBedHeader> {
    let mut r = ByteReader::new(buf);
    let magic = r.u32()?;
    if magic != BIGBED_MAGIC {
        return Err(Error::BadMagic {
            expected: BIGBED_MAGIC,
            found: magic,
        });
    }
    let version = r.u16()?;
    let zoom_levels = r.u16()?;
    let chromosome_tree_offset = r.u64()?;
    let unzoomed_data_offset = r.u64()?;
    let unzoomed_index_offset = r.u64()?;
    let field_count = r.u16()?;
    let defined_field_count = r.u16()?;
    let auto_sql_offset = r.u64()?;
    let total_summary_offset = r.u64()?;
    let uncompress_buf_size = r.u32()?;
    let extension_offset = r.u64()?;
    debug_assert_eq!(r.position(), HEADER_LEN);

    let zoom_headers = (0..zoom_levels)
        .map(|_| {
            let reduction_level = r.u32()?;
            r.skip(4)?;
            Ok(ZoomHeader {
                reduction_level,
                data_offset: r.u64()?,
                index_offset: r.u64()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BigBedHeader {
        version,
        chromosome_tree_offset,
        unzoomed_data_offset,
        unzoomed_index_offset,
        field_count,
        defined_field_count,
        auto_sql_offset,
        total_summary_offset,
        uncompress_buf_size,
        extension_offset,
        zoom_headers,
    })
}

/// Walk a B+ tree or R-tree stored in `buf`, which was read from file offset
/// `base`, depth first from the node at `root`.
///
/// `entry` reads one entry of a node (the flag says whether it is a leaf) and
/// returns the file offset of the child for a non-leaf entry. Children must
/// lie after their parent.
fn walk_tree(
    buf: &[u8],
    base: u64,
    root: u64,
    mut entry: impl FnMut(&mut ByteReader<'_>, bool) -> Result<Option<u64>>,
) -> Result<()> {
    let mut budget = buf.len() / 4 + 1;
    let mut stack = vec![root];
    while let Some(node_offset) = stack.pop() {
        budget = budget
            .checked_sub(1)
            .ok_or_else(|| Error::CorruptIndex("tree revisits its nodes".to_string()))?;
        let start = node_offset
            .checked_sub(base)
            .and_then(|s| usize::try_from(s).ok())
            .ok_or_else(|| Error::CorruptIndex(format!("tree node at {}", node_offset)))?;
        let node = buf.get(start..).ok_or(Error::UnexpectedEof {
            offset: buf.len(),
            needed: start - buf.len(),
        })?;

        let mut r = ByteReader::new(node);
        let is_leaf = r.u8()? != 0;
        r.skip(1)?;
        let count = r.u16()?;
        let mut children = Vec::new();
        for _ in 0..count {
            if let Some(child) = entry(&mut r, is_leaf)? {
                if child <= node_offset {
                    return Err(Error::CorruptIndex(format!(
                        "tree node at {} points back to {}",
                        node_offset, child
                    )));
                }
                children.push(child);
            }
        }
        stack.extend(children.into_iter().rev());
    }
    Ok(())
}

/// Parse the chromosome B+ tree at the start of `buf`, which was read from
/// `base`. Chromosomes come back ordered by id.
pub fn parse_chrom_tree(buf: &[u8], base: u64) -> Result<Vec<ChromInfo>> {
    let mut r = ByteReader::new(buf);
    let magic = r.u32()?;
    if magic != CHROM_TREE_MAGIC {
        return Err(Error::BadMagic {
            expected: CHROM_TREE_MAGIC,
            found: magic,
        });
    }
    let _block_size = r.u32()?;
    let key_size = r.u32()? as usize;
    let val_size = r.u32()? as usize;
    if val_size < 8 {
        return Err(Error::CorruptIndex(format!(
            "chromosome tree values are {} bytes; need at least 8",
            val_size
        )));
    }
    let item_count = r.u64()?;

    let mut chroms = Vec::with_capacity((item_count as usize).min(1 << 16));
    walk_tree(buf, base, base + CHROM_TREE_HEADER_LEN, |r, is_leaf| {
        let key = r.take(key_size)?;
        if !is_leaf {
            return Ok(Some(r.u64()?));
        }
        let name_len = key.iter().position(|&b| b == 0).unwrap_or(key.len());
        let name = String::from_utf8_lossy(&key[..name_len]).into_owned();
        let id = r.u32()?;
        let size = r.u32()?;
        r.skip(val_size - 8)?;
        chroms.push(ChromInfo { name, id, size });
        Ok(None)
    })?;
    chroms.sort_by_key(|c| c.id);
    Ok(chroms)
}

/// Parse the R-tree index at the start of `buf`, which was read from `base`,
/// and return its leaves in file order.
pub fn parse_cir_tree(buf: &[u8], base: u64) -> Result<Vec<IndexBlock>> {
    let mut r = ByteReader::new(buf);
    let magic = r.u32()?;
    if magic != CIR_TREE_MAGIC {
        return Err(Error::BadMagic {
            expected: CIR_TREE_MAGIC,
            found: magic,
        });
    }
    let _block_size = r.u32()?;
    let item_count = r.u64()?;

    let mut blocks = Vec::with_capacity((item_count as usize).min(1 << 16));
    walk_tree(buf, base, base + CIR_TREE_HEADER_LEN, |r, is_leaf| {
        let start_chrom_ix = r.u32()?;
        let start_base = r.u32()?;
        let end_chrom_ix = r.u32()?;
        let end_base = r.u32()?;
        let offset = r.u64()?;
        if !is_leaf {
            return Ok(Some(offset));
        }
        blocks.push(IndexBlock {
            start_chrom_ix,
            start_base,
            end_chrom_ix,
            end_base,
            offset,
            size: r.u64()?,
        });
        Ok(None)
    })?;
    blocks.sort_by_key(|b| b.offset);
    Ok(blocks)
}

/// Split an inflated data block into rows.
pub fn parse_bed_block(buf: &[u8]) -> Result<Vec<BedEntry>> {
    let mut r = ByteReader::new(buf);
    let mut entries = Vec::new();
    while r.remaining() > 0 {
        entries.push(BedEntry {
            chrom_id: r.u32()?,
            start: r.u32()?,
            end: r.u32()?,
            rest: String::from_utf8_lossy(r.c_str()?).into_owned(),
        });
    }
    Ok(entries)
}

fn inflate_block(raw: &[u8], offset: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(raw).read_to_end(&mut out).map_err(|e| {
        Error::Format(format!("failed to inflate bigBed block at {}: {}", offset, e))
    })?;
    Ok(out)
}

/// Everything needed to locate features: read once per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BigBedIndex {
    pub header: BigBedHeader,
    pub chroms: Vec<ChromInfo>,
    pub blocks: Vec<IndexBlock>,
}

impl BigBedIndex {
    /// Exact name first, then the alternate `chr` spelling.
    pub fn find_chrom(&self, name: &str) -> Option<&ChromInfo> {
        let find = |wanted: &str| self.chroms.iter().find(|c| c.name == wanted);
        find(name).or_else(|| find(&alt_contig_name(name)))
    }

    pub fn chrom_name(&self, id: u32) -> Result<&str> {
        self.chroms
            .binary_search_by_key(&id, |c| c.id)
            .map(|i| self.chroms[i].name.as_str())
            .map_err(|_| Error::CorruptIndex(format!("no chromosome with id {}", id)))
    }

    pub fn overlapping_blocks(&self, chrom_id: u32, start: i64, stop: i64) -> Vec<&IndexBlock> {
        self.blocks
            .iter()
            .filter(|b| b.overlaps(chrom_id, start, stop))
            .collect()
    }
}

pub struct BigBed {
    file: Arc<RangeFile>,
    index: OnceCell<BigBedIndex>,
}

impl BigBed {
    pub fn new(file: Arc<RangeFile>) -> Self {
        Self {
            file,
            index: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &str {
        self.file.location()
    }

    pub async fn index(&self) -> Result<&BigBedIndex> {
        self.index.get_or_try_init(|| self.load_index()).await
    }

    async fn load_index(&self) -> Result<BigBedIndex> {
        let header = read_growing(&self.file, 0, FIRST_HEADER_FETCH, MAX_FETCH, |buf| {
            parse_header(buf)
        })
        .await?;

        let offset = header.chromosome_tree_offset;
        let chroms = read_growing(&self.file, offset, FIRST_TREE_FETCH, MAX_FETCH, |buf| {
            parse_chrom_tree(buf, offset)
        })
        .await?;

        // The index runs up to the first zoom level's data, when there is one.
        let offset = header.unzoomed_index_offset;
        let first_fetch = header
            .zoom_headers
            .first()
            .and_then(|z| z.data_offset.checked_sub(offset))
            .filter(|&len| len > CIR_TREE_HEADER_LEN)
            .map_or(FIRST_TREE_FETCH, |len| len.min(MAX_FETCH));
        let blocks = read_growing(&self.file, offset, first_fetch, MAX_FETCH, |buf| {
            parse_cir_tree(buf, offset)
        })
        .await?;

        info!(
            location = self.location(),
            chroms = chroms.len(),
            blocks = blocks.len(),
            compressed = header.is_compressed(),
            "loaded bigBed index"
        );
        Ok(BigBedIndex {
            header,
            chroms,
            blocks,
        })
    }

    pub async fn contig_list(&self) -> Result<Vec<String>> {
        Ok(self.index().await?.chroms.iter().map(|c| c.name.clone()).collect())
    }

    /// The chromosome entry for `contig`, trying the alternate `chr` spelling.
    pub async fn find_chrom(&self, contig: &str) -> Result<&ChromInfo> {
        self.index()
            .await?
            .find_chrom(contig)
            .ok_or_else(|| Error::UnknownContig(format!("{} (not in {})", contig, self.location())))
    }

    /// Every row of every block that may overlap `range`.
    ///
    /// Blocks are decoded whole, so rows outside `range` are included; the
    /// block ranges say which bases are then fully known.
    pub async fn get_feature_blocks_overlapping(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<Vec<FeatureBlock>> {
        let index = self.index().await?;
        let chrom = self.find_chrom(&range.contig).await?;
        let blocks = index.overlapping_blocks(chrom.id, range.start(), range.stop());
        let (Some(first), Some(end)) = (
            blocks.iter().map(|b| b.offset).min(),
            blocks.iter().map(|b| b.offset.saturating_add(b.size)).max(),
        ) else {
            return Ok(Vec::new());
        };

        debug!(
            range = %range,
            blocks = blocks.len(),
            bytes = end - first,
            "fetching bigBed blocks"
        );
        let bytes = self.file.get_bytes(first, end - first).await?;

        blocks
            .iter()
            .map(|block| {
                if block.start_chrom_ix != block.end_chrom_ix {
                    return Err(Error::CorruptIndex(format!(
                        "block at {} spans chromosomes {} to {}",
                        block.offset, block.start_chrom_ix, block.end_chrom_ix
                    )));
                }
                let lo = (block.offset - first) as usize;
                let raw = usize::try_from(block.size)
                    .ok()
                    .and_then(|size| bytes.get(lo..lo.checked_add(size)?));
                let raw = raw.ok_or_else(|| {
                    Error::Format(format!(
                        "{} is truncated: block at {} needs {} bytes",
                        self.location(),
                        block.offset,
                        block.size
                    ))
                })?;
                let entries = if index.header.is_compressed() {
                    parse_bed_block(&inflate_block(raw, block.offset)?)?
                } else {
                    parse_bed_block(raw)?
                };
                let rows = entries
                    .into_iter()
                    .map(|e| {
                        Ok(BedRow {
                            contig: index.chrom_name(e.chrom_id)?.to_string(),
                            start: i64::from(e.start),
                            stop: i64::from(e.end),
                            rest: e.rest,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                let start = i64::from(block.start_base);
                let stop = (i64::from(block.end_base) - 1).max(start);
                let contig = index.chrom_name(block.start_chrom_ix)?.to_string();
                Ok(FeatureBlock {
                    range: ContigInterval::new(contig, start, stop),
                    rows,
                })
            })
            .collect()
    }

    /// Rows overlapping `range`.
    pub async fn get_features_in_range(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<Vec<BedRow>> {
        Ok(self
            .get_feature_blocks_overlapping(range)
            .await?
            .into_iter()
            .flat_map(|block| block.rows)
            .filter(|row| row.interval().chr_intersects(range))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    /// Children per non-leaf node in the trees `encode_bigbed` writes.
    const FAN_OUT: usize = 2;

    pub(crate) struct Row<'a> {
        pub chrom_id: u32,
        pub start: u32,
        pub end: u32,
        pub rest: &'a str,
    }

    pub(crate) fn row(chrom_id: u32, start: u32, end: u32, rest: &str) -> Row<'_> {
        Row {
            chrom_id,
            start,
            end,
            rest,
        }
    }

    /// Lay out `nodes` (each a list of encoded entries) after a single root
    /// node holding `entry(child_offset, i)` for each; a lone node becomes
    /// the root itself.
    fn two_level(
        start: usize,
        entries: &[Vec<u8>],
        entry_len: usize,
        parent_entry: impl Fn(usize, u64) -> Vec<u8>,
    ) -> Vec<u8> {
        let leaves: Vec<&[Vec<u8>]> = entries.chunks(FAN_OUT).collect();
        let node = |is_leaf: bool, entries: &[Vec<u8>]| {
            let mut buf = vec![u8::from(is_leaf), 0];
            buf.extend((entries.len() as u16).to_le_bytes());
            entries.iter().for_each(|e| buf.extend(e));
            buf
        };
        if leaves.len() <= 1 {
            return node(true, entries);
        }
        let root_len = 4 + leaves.len() * entry_len;
        let mut children = Vec::new();
        let mut parents = Vec::new();
        for (i, leaf) in leaves.iter().enumerate() {
            let offset = (start + root_len + children.len()) as u64;
            parents.push(parent_entry(i * FAN_OUT, offset));
            children.extend(node(true, *leaf));
        }
        let mut out = node(false, parents.as_slice());
        out.extend(children);
        out
    }

    /// Encode a bigBed file with at most `rows_per_block` rows to a data
    /// block. Rows must be sorted; blocks are split at chromosome changes.
    pub(crate) fn encode_bigbed(
        chroms: &[(&str, u32)],
        rows: &[Row<'_>],
        rows_per_block: usize,
        compressed: bool,
    ) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];

        // Chromosome tree
        let chrom_tree_offset = out.len();
        let key_size = chroms.iter().map(|(n, _)| n.len()).max().unwrap_or(1);
        let key = |name: &str| {
            let mut k = name.as_bytes().to_vec();
            k.resize(key_size, 0);
            k
        };
        let leaf_entries: Vec<Vec<u8>> = chroms
            .iter()
            .enumerate()
            .map(|(id, (name, size))| {
                let mut e = key(name);
                e.extend((id as u32).to_le_bytes());
                e.extend(size.to_le_bytes());
                e
            })
            .collect();
        out.extend(CHROM_TREE_MAGIC.to_le_bytes());
        out.extend((FAN_OUT as u32).to_le_bytes());
        out.extend((key_size as u32).to_le_bytes());
        out.extend(8u32.to_le_bytes());
        out.extend((chroms.len() as u64).to_le_bytes());
        out.extend([0u8; 8]);
        let nodes_start = out.len();
        out.extend(two_level(nodes_start, &leaf_entries, key_size + 8, |i, offset| {
            let mut e = key(chroms[i].0);
            e.extend(offset.to_le_bytes());
            e
        }));

        // Data blocks
        let data_offset = out.len();
        out.extend((rows.len() as u64).to_le_bytes());
        let mut uncompress_buf_size = 0;
        let mut leaves = Vec::new();
        let blocks = rows
            .chunk_by(|a, b| a.chrom_id == b.chrom_id)
            .flat_map(|chrom| chrom.chunks(rows_per_block));
        for block in blocks {
            let mut data = Vec::new();
            for r in block {
                data.extend(r.chrom_id.to_le_bytes());
                data.extend(r.start.to_le_bytes());
                data.extend(r.end.to_le_bytes());
                data.extend(r.rest.as_bytes());
                data.push(0);
            }
            uncompress_buf_size = uncompress_buf_size.max(data.len());
            if compressed {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&data).unwrap();
                data = encoder.finish().unwrap();
            }
            let first = &block[0];
            let mut e = Vec::new();
            e.extend(first.chrom_id.to_le_bytes());
            e.extend(first.start.to_le_bytes());
            e.extend(block[block.len() - 1].chrom_id.to_le_bytes());
            e.extend(block.iter().map(|r| r.end).max().unwrap().to_le_bytes());
            e.extend((out.len() as u64).to_le_bytes());
            e.extend((data.len() as u64).to_le_bytes());
            leaves.push(e);
            out.extend(data);
        }

        // R-tree index
        let index_offset = out.len();
        out.extend(CIR_TREE_MAGIC.to_le_bytes());
        out.extend((FAN_OUT as u32).to_le_bytes());
        out.extend((leaves.len() as u64).to_le_bytes());
        out.extend([0u8; 16]);
        out.extend((index_offset as u64).to_le_bytes());
        out.extend((rows_per_block as u32).to_le_bytes());
        out.extend([0u8; 4]);
        let nodes_start = out.len();
        let tree = two_level(nodes_start, &leaves, 24, |i, offset| {
            let mut e = leaves[i][..8].to_vec();
            let last = &leaves[(i + FAN_OUT).min(leaves.len()) - 1];
            e.extend(&last[8..16]);
            e.extend(offset.to_le_bytes());
            e
        });
        out.extend(tree);

        let mut header = Vec::new();
        header.extend(BIGBED_MAGIC.to_le_bytes());
        header.extend(4u16.to_le_bytes());
        header.extend(0u16.to_le_bytes());
        header.extend((chrom_tree_offset as u64).to_le_bytes());
        header.extend((data_offset as u64).to_le_bytes());
        header.extend((index_offset as u64).to_le_bytes());
        header.extend(12u16.to_le_bytes());
        header.extend(12u16.to_le_bytes());
        header.extend(0u64.to_le_bytes());
        header.extend(0u64.to_le_bytes());
        let buf_size = if compressed { uncompress_buf_size as u32 } else { 0 };
        header.extend(buf_size.to_le_bytes());
        header.extend(0u64.to_le_bytes());
        out[..HEADER_LEN].copy_from_slice(&header);
        out
    }

    pub(crate) const GENE_A: &str = "txA\t900\t+\t120\t180\t0\t2\t20,30,\t0,70,\tgeneA\tALPHA";
    pub(crate) const GENE_B: &str = "txB\t500\t-\t300\t300\t0\t1\t50,\t0,\tgeneB\tBETA";

    pub(crate) fn sample_bigbed(compressed: bool) -> Vec<u8> {
        encode_bigbed(
            &[("chr1", 10_000), ("chr2", 5_000), ("chrX", 2_000)],
            &[
                row(0, 100, 200, GENE_A),
                row(0, 300, 350, GENE_B),
                row(0, 1000, 1100, "txC"),
                row(0, 5000, 5010, ""),
                row(1, 40, 60, "txD\t10\t."),
                row(2, 0, 10, "txE"),
            ],
            2,
            compressed,
        )
    }

    fn bigbed(bytes: Vec<u8>) -> BigBed {
        BigBed::new(Arc::new(RangeFile::new(Arc::new(MemoryStorage::new("test.bb", bytes)))))
    }

    fn range(contig: &str, start: i64, stop: i64) -> ContigInterval<String> {
        ContigInterval::new(contig.to_string(), start, stop)
    }

    #[test]
    fn test_parse_header() {
        let bytes = sample_bigbed(true);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.version, 4);
        assert_eq!(header.chromosome_tree_offset, 64);
        assert_eq!(header.field_count, 12);
        assert!(header.is_compressed());
        assert!(header.zoom_headers.is_empty());
        assert!(!parse_header(&sample_bigbed(false)).unwrap().is_compressed());

        let mut bad = bytes.clone();
        bad[0] = 0;
        assert!(matches!(parse_header(&bad), Err(Error::BadMagic { .. })));
        assert!(matches!(parse_header(&bytes[..40]), Err(Error::UnexpectedEof { .. })));
    }

    #[test]
    fn test_parse_chrom_tree() {
        let bytes = sample_bigbed(false);
        let chroms = parse_chrom_tree(&bytes[64..], 64).unwrap();
        let names: Vec<&str> = chroms.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["chr1", "chr2", "chrX"]);
        assert_eq!(chroms[1].id, 1);
        assert_eq!(chroms[1].size, 5_000);
    }

    #[test]
    fn test_parse_cir_tree() {
        let bytes = sample_bigbed(false);
        let header = parse_header(&bytes).unwrap();
        let offset = header.unzoomed_index_offset;
        let blocks = parse_cir_tree(&bytes[offset as usize..], offset).unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!((blocks[0].start_base, blocks[0].end_base), (100, 350));
        assert_eq!((blocks[1].start_chrom_ix, blocks[1].end_chrom_ix), (0, 0));
        assert_eq!((blocks[2].start_chrom_ix, blocks[2].start_base), (1, 40));
        assert_eq!((blocks[3].start_chrom_ix, blocks[3].end_base), (2, 10));

        // Cut off before the second leaf node
        let cut = &bytes[offset as usize..bytes.len() - 10];
        assert!(matches!(parse_cir_tree(cut, offset), Err(Error::UnexpectedEof { .. })));
    }

    #[test]
    fn test_tree_pointing_backwards() {
        let mut buf = CIR_TREE_MAGIC.to_le_bytes().to_vec();
        buf.extend([0u8; 44]);
        buf.extend([0, 0, 1, 0]);
        buf.extend([0u8; 16]);
        buf.extend(48u64.to_le_bytes());
        assert!(matches!(parse_cir_tree(&buf, 0), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_block_overlap() {
        let block = IndexBlock {
            start_chrom_ix: 0,
            start_base: 100,
            end_chrom_ix: 0,
            end_base: 350,
            offset: 0,
            size: 0,
        };
        assert!(block.overlaps(0, 0, 100));
        assert!(block.overlaps(0, 349, 400));
        assert!(!block.overlaps(0, 350, 400));
        assert!(!block.overlaps(0, 0, 99));
        assert!(!block.overlaps(1, 0, 1000));
    }

    #[test]
    fn test_parse_bed_block() {
        let mut buf = Vec::new();
        for v in [2u32, 10, 20] {
            buf.extend(v.to_le_bytes());
        }
        buf.extend(b"name\t0\0");
        let entries = parse_bed_block(&buf).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chrom_id, 2);
        assert_eq!((entries[0].start, entries[0].end), (10, 20));
        assert_eq!(entries[0].rest, "name\t0");

        buf.extend(7u32.to_le_bytes());
        assert!(matches!(parse_bed_block(&buf), Err(Error::UnexpectedEof { .. })));
    }

    #[tokio::test]
    async fn test_get_features_in_range() {
        for compressed in [true, false] {
            let bb = bigbed(sample_bigbed(compressed));
            assert_eq!(bb.contig_list().await.unwrap(), vec!["chr1", "chr2", "chrX"]);

            let rows = bb.get_features_in_range(&range("chr1", 150, 320)).await.unwrap();
            let starts: Vec<i64> = rows.iter().map(|r| r.start).collect();
            assert_eq!(starts, vec![100, 300]);
            assert_eq!(rows[0].rest, GENE_A);
            assert_eq!(rows[0].contig, "chr1");

            // BED ends are exclusive.
            assert!(bb.get_features_in_range(&range("1", 200, 299)).await.unwrap().is_empty());

            let rows = bb.get_features_in_range(&range("2", 0, 100)).await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].contig, "chr2");
        }
    }

    #[tokio::test]
    async fn test_feature_blocks_cover_whole_blocks() {
        let bb = bigbed(sample_bigbed(true));
        let blocks = bb
            .get_feature_blocks_overlapping(&range("chr1", 320, 330))
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].range, range("chr1", 100, 349));
        assert_eq!(blocks[0].rows.len(), 2);

        let blocks = bb
            .get_feature_blocks_overlapping(&range("chr1", 0, 10_000))
            .await
            .unwrap();
        let ranges: Vec<_> = blocks.iter().map(|b| b.range.clone()).collect();
        assert_eq!(ranges, vec![range("chr1", 100, 349), range("chr1", 1000, 5009)]);

        assert!(bb
            .get_feature_blocks_overlapping(&range("chr1", 6000, 7000))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_index_is_read_once() {
        let bb = bigbed(sample_bigbed(true));
        bb.get_features_in_range(&range("chr1", 0, 50)).await.unwrap();
        bb.file.clear_cache();
        let before = bb.file.num_network_requests();

        // Only the block itself is read again.
        let rows = bb.get_features_in_range(&range("chr2", 0, 50)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(bb.file.num_network_requests(), before + 1);
    }

    #[tokio::test]
    async fn test_unknown_contig() {
        let bb = bigbed(sample_bigbed(true));
        let err = bb.get_features_in_range(&range("chr9", 0, 10)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownContig(_)));
    }

    #[tokio::test]
    async fn test_corrupt_block() {
        let mut bytes = sample_bigbed(true);
        let header = parse_header(&bytes).unwrap();
        // First block starts after the 8-byte item count.
        let first_block = header.unzoomed_data_offset as usize + 8;
        bytes[first_block..first_block + 4].copy_from_slice(&[0xff; 4]);
        let bb = bigbed(bytes);
        let err = bb.get_features_in_range(&range("chr1", 100, 120)).await.unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
