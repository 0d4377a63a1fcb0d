use super::{CachedRecord, DataEvent, RangeCache, RangeFetcher};
use crate::Result;
use crate::contig_interval::ContigInterval;
use crate::formats::{BamFile, SamRead};
use crate::virtual_offset::VirtualOffset;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Alignments are fetched in multiples of this many bases.
pub const ALIGNMENT_GRANULARITY: i64 = 100;

impl CachedRecord for SamRead {
    type Key = VirtualOffset;

    fn key(&self) -> VirtualOffset {
        self.offset
    }

    fn overlaps(&self, range: &ContigInterval<String>) -> bool {
        let Some(name) = &self.ref_name else {
            return false;
        };
        let span = self.span();
        range.chr_intersects(&ContigInterval::new(name.to_string(), span.start(), span.stop()))
    }
}

pub struct BamFetcher {
    bam: BamFile,
}

#[async_trait]
impl RangeFetcher for BamFetcher {
    type Record = SamRead;

    async fn canonical_contig(&self, contig: &str) -> Result<String> {
        Ok(self.bam.contig_index(contig).await?.1)
    }

    async fn fetch(&self, range: &ContigInterval<String>) -> Result<Vec<SamRead>> {
        self.bam.get_alignments_in_range(range, false).await
    }
}

/// Cached alignments from an indexed BAM file.
pub struct AlignmentDataSource {
    cache: RangeCache<BamFetcher>,
}

impl AlignmentDataSource {
    pub fn new(bam: BamFile) -> Self {
        Self {
            cache: RangeCache::new(BamFetcher { bam }, ALIGNMENT_GRANULARITY),
        }
    }

    pub fn with_granularity(self, granularity: i64) -> Self {
        Self {
            cache: self.cache.with_granularity(granularity),
        }
    }

    pub fn bam(&self) -> &BamFile {
        &self.cache.fetcher().bam
    }

    pub fn cache(&self) -> &RangeCache<BamFetcher> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.cache.subscribe()
    }

    pub async fn range_changed(&self, range: &ContigInterval<String>) -> Result<()> {
        self.cache.range_changed(range).await
    }

    /// Loaded alignments overlapping `range`, in file order.
    pub fn get_alignments_in_range(
        &self,
        range: Option<&ContigInterval<String>>,
    ) -> Vec<Arc<SamRead>> {
        self.cache.query_in_range(range)
    }

    /// Load and return the alignments overlapping `range`.
    pub async fn fetch_alignments(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<Vec<Arc<SamRead>>> {
        self.range_changed(range).await?;
        Ok(self.get_alignments_in_range(Some(range)))
    }
}
