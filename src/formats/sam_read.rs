//! A single BAM alignment record.
//!
//! Cheap fixed fields (reference, position, name, CIGAR) are decoded when the
//! record is created. The sequence and the auxiliary tag block are decoded on
//! first access and memoized, since most consumers only look at a few reads
//! closely.
//!
//! Record body layout (after the `block_size` prefix):
//!
//! | offset | field |
//! |---|---|
//! | 0 | refID (i32) |
//! | 4 | pos (i32) |
//! | 8 | l_read_name (u8) |
//! | 9 | MAPQ (u8) |
//! | 10 | bin (u16) |
//! | 12 | n_cigar_op (u16) |
//! | 14 | FLAG (u16) |
//! | 16 | l_seq (i32) |
//! | 20 | next_refID (i32) |
//! | 24 | next_pos (i32) |
//! | 28 | tlen (i32) |
//! | 32 | read_name, cigar, seq, qual, tags |

use crate::contig_interval::ContigInterval;
use crate::formats::ByteReader;
use crate::virtual_offset::VirtualOffset;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};

const FIXED_LEN: usize = 32;

const SEQUENCE_VALUES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// SAM FLAG bits.
pub mod flags {
    pub const READ_PAIRED: u16 = 0x1;
    pub const PROPER_PAIR: u16 = 0x2;
    pub const READ_UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const READ_STRAND: u16 = 0x10;
    pub const MATE_STRAND: u16 = 0x20;
    pub const FIRST_OF_PAIR: u16 = 0x40;
    pub const SECOND_OF_PAIR: u16 = 0x80;
    pub const NOT_PRIMARY_ALIGNMENT: u16 = 0x100;
    pub const FAILS_VENDOR_QUALITY_CHECK: u16 = 0x200;
    pub const DUPLICATE_READ: u16 = 0x400;
    pub const SUPPLEMENTARY_ALIGNMENT: u16 = 0x800;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CigarKind {
    #[serde(rename = "M")]
    Match,
    #[serde(rename = "I")]
    Insertion,
    #[serde(rename = "D")]
    Deletion,
    #[serde(rename = "N")]
    Skip,
    #[serde(rename = "S")]
    SoftClip,
    #[serde(rename = "H")]
    HardClip,
    #[serde(rename = "P")]
    Pad,
    #[serde(rename = "=")]
    SequenceMatch,
    #[serde(rename = "X")]
    SequenceMismatch,
}

impl CigarKind {
    const ALL: [CigarKind; 9] = [
        CigarKind::Match,
        CigarKind::Insertion,
        CigarKind::Deletion,
        CigarKind::Skip,
        CigarKind::SoftClip,
        CigarKind::HardClip,
        CigarKind::Pad,
        CigarKind::SequenceMatch,
        CigarKind::SequenceMismatch,
    ];

    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| Error::Format(format!("invalid CIGAR op code {}", code)))
    }

    pub fn as_char(self) -> char {
        b"MIDNSHP=X"[self as usize] as char
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Deletion
                | CigarKind::Skip
                | CigarKind::SequenceMatch
                | CigarKind::SequenceMismatch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CigarOp {
    pub op: CigarKind,
    pub length: u32,
}

impl CigarOp {
    /// Decode the packed form: length in the high 28 bits, op in the low 4.
    pub fn from_packed(v: u32) -> Result<Self> {
        Ok(Self {
            op: CigarKind::from_code(v & 0xf)?,
            length: v >> 4,
        })
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length, self.op.as_char())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuxArray {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuxValue {
    Char(char),
    Int(i64),
    Float(f32),
    String(String),
    Hex(String),
    Array(AuxArray),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuxField {
    pub tag: String,
    pub value: AuxValue,
}

fn read_array<T>(
    r: &mut ByteReader<'_>,
    n: usize,
    read: impl Fn(&mut ByteReader<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    (0..n).map(|_| read(r)).collect()
}

fn parse_aux_value(r: &mut ByteReader<'_>, val_type: u8) -> Result<AuxValue> {
    let value = match val_type {
        b'A' => AuxValue::Char(r.u8()? as char),
        b'c' => AuxValue::Int(r.i8()?.into()),
        b'C' => AuxValue::Int(r.u8()?.into()),
        b's' => AuxValue::Int(r.i16()?.into()),
        b'S' => AuxValue::Int(r.u16()?.into()),
        b'i' => AuxValue::Int(r.i32()?.into()),
        b'I' => AuxValue::Int(r.u32()?.into()),
        b'f' => AuxValue::Float(r.f32()?),
        b'Z' => AuxValue::String(String::from_utf8_lossy(r.c_str()?).into_owned()),
        b'H' => AuxValue::Hex(String::from_utf8_lossy(r.c_str()?).into_owned()),
        b'B' => {
            let subtype = r.u8()?;
            let n = r.count()?;
            AuxValue::Array(match subtype {
                b'c' => AuxArray::Int8(read_array(r, n, |r| r.i8())?),
                b'C' => AuxArray::UInt8(read_array(r, n, |r| r.u8())?),
                b's' => AuxArray::Int16(read_array(r, n, |r| r.i16())?),
                b'S' => AuxArray::UInt16(read_array(r, n, |r| r.u16())?),
                b'i' => AuxArray::Int32(read_array(r, n, |r| r.i32())?),
                b'I' => AuxArray::UInt32(read_array(r, n, |r| r.u32())?),
                b'f' => AuxArray::Float(read_array(r, n, |r| r.f32())?),
                other => {
                    return Err(Error::Format(format!(
                        "invalid aux array subtype '{}'",
                        other as char
                    )));
                }
            })
        }
        other => {
            return Err(Error::Format(format!("invalid aux type '{}'", other as char)));
        }
    };
    Ok(value)
}

/// Decode an auxiliary block, which runs to the end of the record.
pub fn parse_aux(buf: &[u8]) -> Result<Vec<AuxField>> {
    let mut r = ByteReader::new(buf);
    let mut fields = Vec::new();
    while r.remaining() > 0 {
        let tag = r.array::<2>()?;
        let val_type = r.u8()?;
        fields.push(AuxField {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            value: parse_aux_value(&mut r, val_type)?,
        });
    }
    Ok(fields)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

impl Strand {
    fn from_bit(set: bool) -> Self {
        if set { Strand::Reverse } else { Strand::Forward }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MateProperties {
    /// Only known when the mate is on the same reference as the read.
    pub ref_name: Option<String>,
    pub pos: i32,
    pub strand: Strand,
}

#[derive(Debug, Clone)]
pub struct SamRead {
    buffer: Bytes,
    /// Where this record starts in the BAM file; unique within the file.
    pub offset: VirtualOffset,
    pub ref_name: Option<Arc<str>>,
    pub ref_id: i32,
    pub pos: i32,
    pub l_seq: i32,
    pub name: String,
    pub cigar: Vec<CigarOp>,
    seq: OnceLock<String>,
    tags: OnceLock<std::result::Result<Vec<AuxField>, String>>,
}

impl SamRead {
    /// Wrap the body of one record (without its `block_size` prefix).
    pub fn new(buffer: Bytes, offset: VirtualOffset, ref_name: Option<Arc<str>>) -> Result<Self> {
        let mut r = ByteReader::new(&buffer);
        let ref_id = r.i32()?;
        let pos = r.i32()?;
        let l_read_name = r.u8()? as usize;
        r.skip(3)?;
        let n_cigar = r.u16()? as usize;
        r.skip(2)?;
        let l_seq = r.i32()?;
        if l_read_name == 0 || l_seq < 0 {
            return Err(Error::Format(format!(
                "malformed alignment at {}: l_read_name={}, l_seq={}",
                offset, l_read_name, l_seq
            )));
        }
        r.skip(FIXED_LEN - 20)?;

        let name = String::from_utf8_lossy(&r.take(l_read_name)?[..l_read_name - 1]).into_owned();
        let cigar = (0..n_cigar)
            .map(|_| r.u32().and_then(CigarOp::from_packed))
            .collect::<Result<Vec<_>>>()?;
        let seq_len = l_seq as usize;
        r.skip(seq_len.div_ceil(2) + seq_len)?;

        Ok(Self {
            buffer,
            offset,
            ref_name,
            ref_id,
            pos,
            l_seq,
            name,
            cigar,
            seq: OnceLock::new(),
            tags: OnceLock::new(),
        })
    }

    fn u16_at(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.buffer[at], self.buffer[at + 1]])
    }

    fn i32_at(&self, at: usize) -> i32 {
        i32::from_le_bytes([
            self.buffer[at],
            self.buffer[at + 1],
            self.buffer[at + 2],
            self.buffer[at + 3],
        ])
    }

    fn seq_start(&self) -> usize {
        FIXED_LEN + self.buffer[8] as usize + 4 * self.cigar.len()
    }

    fn qual_start(&self) -> usize {
        self.seq_start() + (self.l_seq as usize).div_ceil(2)
    }

    fn aux_start(&self) -> usize {
        self.qual_start() + self.l_seq as usize
    }

    /// Unique identity of the record within its file.
    pub fn key(&self) -> VirtualOffset {
        self.offset
    }

    pub fn mapq(&self) -> u8 {
        self.buffer[9]
    }

    pub fn bin(&self) -> u16 {
        self.u16_at(10)
    }

    pub fn flag(&self) -> u16 {
        self.u16_at(14)
    }

    pub fn next_ref_id(&self) -> i32 {
        self.i32_at(20)
    }

    pub fn next_pos(&self) -> i32 {
        self.i32_at(24)
    }

    pub fn tlen(&self) -> i32 {
        self.i32_at(28)
    }

    pub fn strand(&self) -> Strand {
        Strand::from_bit(self.flag() & flags::READ_STRAND != 0)
    }

    pub fn mate_properties(&self) -> Option<MateProperties> {
        let flag = self.flag();
        if flag & flags::READ_PAIRED == 0 {
            return None;
        }
        let next_ref_id = self.next_ref_id();
        Some(MateProperties {
            ref_name: if next_ref_id == self.ref_id {
                self.ref_name.as_deref().map(str::to_string)
            } else {
                None
            },
            pos: self.next_pos(),
            strand: Strand::from_bit(flag & flags::MATE_STRAND != 0),
        })
    }

    /// Read bases, decoded from the 4-bit encoding (high nybble first).
    pub fn sequence(&self) -> &str {
        self.seq.get_or_init(|| {
            let start = self.seq_start();
            let n = self.l_seq as usize;
            let packed = &self.buffer[start..start + n.div_ceil(2)];
            (0..n)
                .map(|i| {
                    let b = packed[i / 2];
                    let code = if i % 2 == 0 { b >> 4 } else { b & 0xf };
                    SEQUENCE_VALUES[code as usize] as char
                })
                .collect()
        })
    }

    /// Per-base quality scores; 255 means unknown.
    pub fn quality_scores(&self) -> &[u8] {
        let start = self.qual_start();
        &self.buffer[start..start + self.l_seq as usize]
    }

    /// Qualities as a printable Phred+33 string, or `*` when all are unknown.
    pub fn qual_phred(&self) -> String {
        let quals = self.quality_scores();
        if quals.is_empty() {
            return String::new();
        }
        if quals.iter().all(|&q| q == 0xff) {
            return "*".to_string();
        }
        quals.iter().map(|&q| (33u8.saturating_add(q)) as char).collect()
    }

    /// Auxiliary fields, decoded on first call.
    pub fn tags(&self) -> Result<&[AuxField]> {
        self.tags
            .get_or_init(|| parse_aux(&self.buffer[self.aux_start()..]).map_err(|e| e.to_string()))
            .as_deref()
            .map_err(|msg| Error::Format(msg.clone()))
    }

    pub fn tag(&self, tag: &str) -> Result<Option<&AuxValue>> {
        Ok(self.tags()?.iter().find(|f| f.tag == tag).map(|f| &f.value))
    }

    pub fn cigar_string(&self) -> String {
        self.cigar.iter().map(|op| op.to_string()).collect()
    }

    /// Bases of the reference covered by the alignment, from the CIGAR.
    pub fn reference_length(&self) -> i64 {
        self.cigar
            .iter()
            .filter(|op| op.op.consumes_reference())
            .map(|op| i64::from(op.length))
            .sum()
    }

    /// `[pos, pos + l_seq - 1]` on the numeric reference. This uses the read
    /// length rather than the CIGAR, so it is approximate for reads with
    /// clipping, insertions or deletions.
    pub fn span(&self) -> ContigInterval<i32> {
        ContigInterval::new(
            self.ref_id,
            i64::from(self.pos),
            i64::from(self.pos) + i64::from(self.l_seq) - 1,
        )
    }

    /// Reference interval covered by the alignment, using the CIGAR.
    pub fn interval(&self) -> ContigInterval<String> {
        let pos = i64::from(self.pos);
        ContigInterval::new(self.contig_name(), pos, pos + self.reference_length() - 1)
    }

    pub fn intersects(&self, range: &ContigInterval<String>) -> bool {
        range.intersects(&self.interval())
    }

    fn contig_name(&self) -> String {
        match &self.ref_name {
            Some(name) => name.to_string(),
            None => self.ref_id.to_string(),
        }
    }

    pub fn debug_string(&self) -> String {
        let tags = match self.tags() {
            Ok(tags) => tags
                .iter()
                .map(|f| format!("{}:{:?}", f.tag, f.value))
                .collect::<Vec<_>>()
                .join(" "),
            Err(e) => e.to_string(),
        };
        format!(
            "Name: {}\nFLAG: {}\nPosition: {}\nCIGAR: {}\nSequence: {}\nQuality:  {}\nTags: {}\n",
            self.name,
            self.flag(),
            self.interval(),
            self.cigar_string(),
            self.sequence(),
            self.qual_phred(),
            tags
        )
    }
}

impl fmt::Display for SamRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}",
            self.contig_name(),
            i64::from(self.pos) + 1,
            i64::from(self.pos) + i64::from(self.l_seq)
        )
    }
}
