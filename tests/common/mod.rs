//! Small 2bit, BAM + BAI, VCF and bigBed files written to a temporary
//! directory.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use pileup::formats::bgzf::{EOF_BLOCK, compress_block};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

pub const NUM_READS: usize = 40;
pub const READ_SPACING: i32 = 50;
pub const READ_SEQ: &str = "ACGTACGTACGTACGTACGT";
pub const READS_PER_BLOCK: usize = 8;

pub const VCF: &str = "\
##fileformat=VCFv4.2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE1
chr1\t150\trs1\tA\tG\t50\tPASS\tAF=0.25\tGT\t0/1
chr1\t120\trs2\tC\tT\t50\tPASS\tAF=0.5\tGT\t1/1
chr1\t5000\trs3\tG\tA\t50\tPASS\t.\tGT\t0/1
chr2\t42\trs4\tT\tC\t50\tPASS\t.\tGT\t0/1
";

/// (chromosome id, start, end, remaining columns)
pub const GENES: &[(u32, u32, u32, &str)] = &[
    (0, 100, 300, "tx1\t0\t+\t120\t280\t0\t2\t50,60,\t0,140,\tgene1\tTP53"),
    (0, 1500, 1600, "tx2\t500\t-"),
    (1, 10, 20, "tx3"),
];

pub struct Fixture {
    pub dir: TempDir,
    pub reference: PathBuf,
    pub bam: PathBuf,
    pub bai: PathBuf,
    pub vcf: PathBuf,
    pub bigbed: PathBuf,
}

/// `ACGT` repeated, with positions 100-109 of chr1 unknown.
pub fn chr1_sequence() -> String {
    let mut seq: Vec<u8> = b"ACGT".iter().copied().cycle().take(2000).collect();
    seq[100..110].fill(b'N');
    String::from_utf8(seq).unwrap()
}

pub fn encode_twobit(sequences: &[(&str, &str)]) -> Vec<u8> {
    const CODES: &[u8; 4] = b"TCAG";
    let index_len: usize = 16 + sequences.iter().map(|(name, _)| 1 + name.len() + 4).sum::<usize>();
    let mut header = Vec::new();
    header.extend(0x1A41_2743u32.to_le_bytes());
    header.extend(0u32.to_le_bytes());
    header.extend((sequences.len() as u32).to_le_bytes());
    header.extend(0u32.to_le_bytes());

    let mut body = Vec::new();
    for (name, seq) in sequences {
        header.push(name.len() as u8);
        header.extend(name.as_bytes());
        header.extend(((index_len + body.len()) as u32).to_le_bytes());

        let bytes = seq.as_bytes();
        let mut blocks: Vec<(u32, u32)> = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'N' {
                match blocks.last_mut() {
                    Some((start, len)) if (*start + *len) as usize == i => *len += 1,
                    _ => blocks.push((i as u32, 1)),
                }
            }
        }
        body.extend((bytes.len() as u32).to_le_bytes());
        body.extend((blocks.len() as u32).to_le_bytes());
        body.extend(blocks.iter().flat_map(|(s, _)| s.to_le_bytes()));
        body.extend(blocks.iter().flat_map(|(_, l)| l.to_le_bytes()));
        body.extend(0u32.to_le_bytes());
        body.extend(0u32.to_le_bytes());
        for group in bytes.chunks(4) {
            let mut packed = 0u8;
            for (i, b) in group.iter().enumerate() {
                let code = CODES.iter().position(|c| c == b).unwrap_or(0) as u8;
                packed |= code << (6 - 2 * i);
            }
            body.push(packed);
        }
    }
    header.extend(body);
    header
}

fn bam_header() -> Vec<u8> {
    let text = b"@HD\tVN:1.6\tSO:coordinate\n";
    let mut buf = b"BAM\x01".to_vec();
    buf.extend((text.len() as i32).to_le_bytes());
    buf.extend(text);
    buf.extend(2i32.to_le_bytes());
    for (name, len) in [("chr1", 2000i32), ("chr2", 500)] {
        buf.extend((name.len() as i32 + 1).to_le_bytes());
        buf.extend(name.as_bytes());
        buf.push(0);
        buf.extend(len.to_le_bytes());
    }
    buf
}

/// One length-prefixed record: 20M, all qualities 30, tag `NM:C:<i % 3>`.
fn bam_record(i: usize) -> Vec<u8> {
    const SEQ_CODES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";
    let name = format!("read{}", i);
    let pos = i as i32 * READ_SPACING;

    let mut body = Vec::new();
    body.extend(0i32.to_le_bytes());
    body.extend(pos.to_le_bytes());
    body.push(name.len() as u8 + 1);
    body.push(60);
    body.extend(4681u16.to_le_bytes());
    body.extend(1u16.to_le_bytes());
    let flag: u16 = if i % 2 == 0 { 0 } else { 0x10 };
    body.extend(flag.to_le_bytes());
    body.extend((READ_SEQ.len() as i32).to_le_bytes());
    body.extend((-1i32).to_le_bytes());
    body.extend((-1i32).to_le_bytes());
    body.extend(0i32.to_le_bytes());
    body.extend(name.as_bytes());
    body.push(0);
    body.extend(((READ_SEQ.len() as u32) << 4).to_le_bytes());
    let codes: Vec<u8> = READ_SEQ
        .bytes()
        .map(|b| SEQ_CODES.iter().position(|&c| c == b).unwrap() as u8)
        .collect();
    for pair in codes.chunks(2) {
        body.push(pair[0] << 4 | pair.get(1).copied().unwrap_or(0));
    }
    body.extend(std::iter::repeat_n(30u8, READ_SEQ.len()));
    body.extend(b"NMC");
    body.push((i % 3) as u8);

    let mut record = (body.len() as i32).to_le_bytes().to_vec();
    record.extend(body);
    record
}

fn raw_offset(coffset: usize, uoffset: usize) -> u64 {
    ((coffset as u64) << 16) | uoffset as u64
}

/// A BAM file and a BAI whose chr1 reads all fall in bin 4681.
pub fn encode_bam_and_index() -> (Vec<u8>, Vec<u8>) {
    let mut bam = compress_block(&bam_header()).unwrap();
    let first = raw_offset(bam.len(), 0);
    for group in (0..NUM_READS).collect::<Vec<_>>().chunks(READS_PER_BLOCK) {
        let data: Vec<u8> = group.iter().flat_map(|&i| bam_record(i)).collect();
        bam.extend(compress_block(&data).unwrap());
    }
    let end = raw_offset(bam.len(), 0);
    bam.extend(EOF_BLOCK);

    let mut bai = b"BAI\x01".to_vec();
    bai.extend(2i32.to_le_bytes());
    // chr1: one bin, one chunk, one linear-index window
    bai.extend(1i32.to_le_bytes());
    bai.extend(4681u32.to_le_bytes());
    bai.extend(1i32.to_le_bytes());
    bai.extend(first.to_le_bytes());
    bai.extend(end.to_le_bytes());
    bai.extend(1i32.to_le_bytes());
    bai.extend(first.to_le_bytes());
    // chr2: empty
    bai.extend(0i32.to_le_bytes());
    bai.extend(0i32.to_le_bytes());
    (bam, bai)
}

/// A compressed bigBed file with one data block per chromosome and
/// single-node trees.
pub fn encode_bigbed(chroms: &[(&str, u32)], genes: &[(u32, u32, u32, &str)]) -> Vec<u8> {
    let mut out = vec![0u8; 64];

    let chrom_tree = out.len() as u64;
    let key_size = chroms.iter().map(|(n, _)| n.len()).max().unwrap();
    out.extend(0x78CA_8C91u32.to_le_bytes());
    out.extend((chroms.len() as u32).to_le_bytes());
    out.extend((key_size as u32).to_le_bytes());
    out.extend(8u32.to_le_bytes());
    out.extend((chroms.len() as u64).to_le_bytes());
    out.extend([0u8; 8]);
    out.extend([1, 0]);
    out.extend((chroms.len() as u16).to_le_bytes());
    for (id, (name, size)) in chroms.iter().enumerate() {
        let mut key = name.as_bytes().to_vec();
        key.resize(key_size, 0);
        out.extend(key);
        out.extend((id as u32).to_le_bytes());
        out.extend(size.to_le_bytes());
    }

    let data = out.len() as u64;
    out.extend((genes.len() as u64).to_le_bytes());
    let mut leaves = Vec::new();
    let mut max_block = 0;
    for block in genes.chunk_by(|a, b| a.0 == b.0) {
        let mut raw = Vec::new();
        for (chrom, start, end, rest) in block {
            raw.extend(chrom.to_le_bytes());
            raw.extend(start.to_le_bytes());
            raw.extend(end.to_le_bytes());
            raw.extend(rest.as_bytes());
            raw.push(0);
        }
        max_block = max_block.max(raw.len());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        let end = block.iter().map(|g| g.2).max().unwrap();
        for v in [block[0].0, block[0].1, block[0].0, end] {
            leaves.extend(v.to_le_bytes());
        }
        leaves.extend((out.len() as u64).to_le_bytes());
        leaves.extend((compressed.len() as u64).to_le_bytes());
        out.extend(compressed);
    }

    let index = out.len() as u64;
    let block_count = leaves.len() / 32;
    out.extend(0x2468_ACE0u32.to_le_bytes());
    out.extend((block_count as u32).to_le_bytes());
    out.extend((block_count as u64).to_le_bytes());
    out.extend([0u8; 16]);
    out.extend(index.to_le_bytes());
    out.extend(512u32.to_le_bytes());
    out.extend([0u8; 4]);
    out.extend([1, 0]);
    out.extend((block_count as u16).to_le_bytes());
    out.extend(leaves);

    let mut header = 0x8789_F2EBu32.to_le_bytes().to_vec();
    header.extend(4u16.to_le_bytes());
    header.extend(0u16.to_le_bytes());
    for offset in [chrom_tree, data, index] {
        header.extend(offset.to_le_bytes());
    }
    header.extend(12u16.to_le_bytes());
    header.extend(12u16.to_le_bytes());
    header.extend([0u8; 16]);
    header.extend((max_block as u32).to_le_bytes());
    header.extend([0u8; 8]);
    out[..64].copy_from_slice(&header);
    out
}

pub fn write_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let reference = dir.path().join("ref.2bit");
    let bam = dir.path().join("reads.bam");
    let bai = dir.path().join("reads.bam.bai");
    let vcf = dir.path().join("calls.vcf");
    let bigbed = dir.path().join("genes.bb");

    let chr1 = chr1_sequence();
    let twobit = encode_twobit(&[("chr1", chr1.as_str()), ("chr2", "GATTACA")]);
    std::fs::write(&reference, twobit).unwrap();
    let (bam_bytes, bai_bytes) = encode_bam_and_index();
    std::fs::write(&bam, bam_bytes).unwrap();
    std::fs::write(&bai, bai_bytes).unwrap();
    std::fs::write(&vcf, VCF).unwrap();
    let genes = encode_bigbed(&[("chr1", 2000), ("chr2", 500)], GENES);
    std::fs::write(&bigbed, genes).unwrap();

    Fixture {
        dir,
        reference,
        bam,
        bai,
        vcf,
        bigbed,
    }
}
