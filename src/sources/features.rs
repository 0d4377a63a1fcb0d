use super::{CachedRecord, DataEvent, RangeCache, RangeFetcher};
use crate::contig_interval::ContigInterval;
use crate::formats::sam_read::Strand;
use crate::formats::{BedRow, BigBed};
use crate::interval::Interval;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Features are fetched in multiples of this many bases.
pub const FEATURE_GRANULARITY: i64 = 1000;

const DEFAULT_SCORE: i64 = 1000;

/// A gene or transcript decoded from a BED row. All intervals are closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gene {
    pub position: ContigInterval<String>,
    pub id: String,
    pub score: i64,
    /// `None` when the row gives `.` or no strand
    pub strand: Option<Strand>,
    /// Empty for non-coding features
    pub coding_region: Interval,
    pub gene_id: String,
    pub name: String,
    pub exons: Vec<Interval>,
}

fn parse_number(field: &str, what: &str, row: &BedRow) -> Result<i64> {
    field
        .parse()
        .map_err(|_| Error::Format(format!("bad BED {} {:?} at {}", what, field, row.interval())))
}

/// Comma-separated numbers, as in the block columns; trailing commas are
/// allowed.
fn parse_list(field: &str, what: &str, row: &BedRow) -> Result<Vec<i64>> {
    field
        .trim_end_matches(',')
        .split(',')
        .map(|n| parse_number(n, what, row))
        .collect()
}

impl Gene {
    /// Decode the optional BED columns after chromEnd: name, score, strand,
    /// thickStart, thickEnd, itemRgb, blockCount, blockSizes, blockStarts,
    /// then gene id and gene name. Missing or empty columns take defaults.
    pub fn from_bed_row(row: &BedRow) -> Result<Self> {
        let fields: Vec<&str> = row.rest.split('\t').collect();
        let field = |i: usize| fields.get(i).copied().filter(|f| !f.is_empty());
        let position = row.interval();

        let id = field(0).map_or_else(|| position.to_string(), str::to_string);
        let score = field(1)
            .map(|s| parse_number(s, "score", row))
            .transpose()?
            .unwrap_or(DEFAULT_SCORE);
        let strand = match field(2) {
            Some("+") => Some(Strand::Forward),
            Some("-") => Some(Strand::Reverse),
            _ => None,
        };
        let coding_region = match (field(3), field(4)) {
            (Some(start), Some(end)) => {
                let start = parse_number(start, "thickStart", row)?;
                Interval::new(start, parse_number(end, "thickEnd", row)? - 1)
            }
            _ => position.interval,
        };

        let exons = match (field(7), field(8)) {
            (Some(sizes), Some(starts)) => {
                let sizes = parse_list(sizes, "blockSizes", row)?;
                let starts = parse_list(starts, "blockStarts", row)?;
                starts
                    .iter()
                    .zip(&sizes)
                    .map(|(&offset, &size)| {
                        let start = row.start + offset;
                        Interval::new(start, start + size - 1)
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        Ok(Gene {
            gene_id: field(9).map_or_else(|| id.clone(), str::to_string),
            name: field(10).unwrap_or_default().to_string(),
            position,
            id,
            score,
            strand,
            coding_region,
            exons,
        })
    }
}

impl CachedRecord for Gene {
    type Key = String;

    /// The first feature seen with an id wins.
    fn key(&self) -> String {
        self.id.clone()
    }

    fn overlaps(&self, range: &ContigInterval<String>) -> bool {
        self.position.chr_intersects(range)
    }
}

pub struct BigBedFetcher {
    bigbed: BigBed,
}

#[async_trait]
impl RangeFetcher for BigBedFetcher {
    type Record = Gene;

    async fn canonical_contig(&self, contig: &str) -> Result<String> {
        Ok(self.bigbed.find_chrom(contig).await?.name.clone())
    }

    /// Every feature in the blocks overlapping `range`, not only those
    /// inside it: whole blocks are decoded anyway.
    async fn fetch(&self, range: &ContigInterval<String>) -> Result<Vec<Gene>> {
        self.bigbed
            .get_feature_blocks_overlapping(range)
            .await?
            .iter()
            .flat_map(|block| &block.rows)
            .map(Gene::from_bed_row)
            .collect()
    }
}

/// Cached genes from a bigBed file.
pub struct FeatureDataSource {
    cache: RangeCache<BigBedFetcher>,
}

impl FeatureDataSource {
    pub fn new(bigbed: BigBed) -> Self {
        Self {
            cache: RangeCache::new(BigBedFetcher { bigbed }, FEATURE_GRANULARITY),
        }
    }

    pub fn with_granularity(self, granularity: i64) -> Self {
        Self {
            cache: self.cache.with_granularity(granularity),
        }
    }

    pub fn bigbed(&self) -> &BigBed {
        &self.cache.fetcher().bigbed
    }

    pub fn cache(&self) -> &RangeCache<BigBedFetcher> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.cache.subscribe()
    }

    pub async fn range_changed(&self, range: &ContigInterval<String>) -> Result<()> {
        self.cache.range_changed(range).await
    }

    pub fn get_features_in_range(&self, range: Option<&ContigInterval<String>>) -> Vec<Arc<Gene>> {
        self.cache.query_in_range(range)
    }

    pub async fn fetch_features(&self, range: &ContigInterval<String>) -> Result<Vec<Arc<Gene>>> {
        self.range_changed(range).await?;
        Ok(self.get_features_in_range(Some(range)))
    }
}
