use crate::contig_interval::ContigInterval;
use crate::formats::sam_read::{AuxField, MateProperties, Strand};
use crate::formats::{SamRead, Variant};
use crate::sources::Gene;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Query parameters shared by the range endpoints: a 0-based closed range.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub contig: String,
    pub start: i64,
    pub stop: i64,
}

impl RangeQuery {
    pub fn to_range(&self) -> Result<ContigInterval<String>> {
        if self.contig.is_empty() {
            return Err(Error::InvalidInput("contig must not be empty".to_string()));
        }
        if self.start < 0 || self.stop < self.start {
            return Err(Error::InvalidRange(format!(
                "{}:{}-{}",
                self.contig, self.start, self.stop
            )));
        }
        Ok(ContigInterval::new(self.contig.clone(), self.start, self.stop))
    }
}

/// Locations of the configured tracks
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tracks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub tracks: Tracks,
}

#[derive(Debug, Serialize)]
pub struct ContigsResponse {
    pub contigs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SequenceResponse {
    pub range: ContigInterval<String>,
    pub sequence: String,
}

#[derive(Debug, Serialize)]
pub struct Alignment {
    pub name: String,
    pub contig: Option<String>,
    /// 0-based
    pub position: i32,
    pub flag: u16,
    pub mapq: u8,
    pub strand: Strand,
    pub cigar: String,
    pub sequence: String,
    pub quality: String,
    pub tags: Vec<AuxField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate: Option<MateProperties>,
    /// Virtual offset of the record in the BAM file
    pub offset: String,
}

impl Alignment {
    pub fn from_read(read: &SamRead) -> Result<Self> {
        Ok(Self {
            name: read.name.clone(),
            contig: read.ref_name.as_deref().map(str::to_string),
            position: read.pos,
            flag: read.flag(),
            mapq: read.mapq(),
            strand: read.strand(),
            cigar: read.cigar_string(),
            sequence: read.sequence().to_string(),
            quality: read.qual_phred(),
            tags: read.tags()?.to_vec(),
            mate: read.mate_properties(),
            offset: read.offset.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReadsResponse {
    pub range: ContigInterval<String>,
    pub alignments: Vec<Alignment>,
}

#[derive(Debug, Serialize)]
pub struct VariantsResponse {
    pub range: ContigInterval<String>,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Serialize)]
pub struct FeaturesResponse {
    pub range: ContigInterval<String>,
    pub features: Vec<Gene>,
}
