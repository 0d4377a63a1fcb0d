use super::{CachedRecord, DataEvent, RangeCache, RangeFetcher};
use crate::Result;
use crate::contig_interval::ContigInterval;
use crate::formats::{Variant, VcfFile};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const VARIANT_GRANULARITY: i64 = 100;

impl CachedRecord for Variant {
    type Key = (String, i64);

    fn key(&self) -> Self::Key {
        (self.contig.clone(), self.position)
    }

    fn overlaps(&self, range: &ContigInterval<String>) -> bool {
        range.chr_contains_locus(&self.contig, self.position)
    }
}

pub struct VcfFetcher {
    vcf: VcfFile,
}

#[async_trait]
impl RangeFetcher for VcfFetcher {
    type Record = Variant;

    /// Contigs with no variants keep their name; fetching them yields nothing.
    async fn canonical_contig(&self, contig: &str) -> Result<String> {
        Ok(self
            .vcf
            .canonical_contig(contig)
            .await?
            .unwrap_or_else(|| contig.to_string()))
    }

    async fn fetch(&self, range: &ContigInterval<String>) -> Result<Vec<Variant>> {
        self.vcf.get_features_in_range(range).await
    }
}

/// Cached variants from a VCF file.
pub struct VariantDataSource {
    cache: RangeCache<VcfFetcher>,
}

impl VariantDataSource {
    pub fn new(vcf: VcfFile) -> Self {
        Self {
            cache: RangeCache::new(VcfFetcher { vcf }, VARIANT_GRANULARITY),
        }
    }

    pub fn with_granularity(self, granularity: i64) -> Self {
        Self {
            cache: self.cache.with_granularity(granularity),
        }
    }

    pub fn vcf(&self) -> &VcfFile {
        &self.cache.fetcher().vcf
    }

    pub fn cache(&self) -> &RangeCache<VcfFetcher> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.cache.subscribe()
    }

    pub async fn range_changed(&self, range: &ContigInterval<String>) -> Result<()> {
        self.cache.range_changed(range).await
    }

    pub fn get_features_in_range(
        &self,
        range: Option<&ContigInterval<String>>,
    ) -> Vec<Arc<Variant>> {
        self.cache.query_in_range(range)
    }

    pub async fn fetch_variants(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<Vec<Arc<Variant>>> {
        self.range_changed(range).await?;
        Ok(self.get_features_in_range(Some(range)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::vcf::tests::VCF;
    use crate::storage::{MemoryStorage, RangeFile};

    fn source() -> VariantDataSource {
        let file = RangeFile::new(Arc::new(MemoryStorage::new("calls.vcf", VCF)));
        VariantDataSource::new(VcfFile::new(Arc::new(file)))
    }

    #[tokio::test]
    async fn test_fetch_variants() {
        let source = source();
        let variants = source
            .fetch_variants(&ContigInterval::new("chr20".to_string(), 14000, 15000))
            .await
            .unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].id, "rs6054257");
        assert_eq!(variants[0].position, 14369);

        let covered = source.cache().covered_ranges();
        assert_eq!(covered, vec![ContigInterval::new("20".to_string(), 14000, 15000)]);
    }

    #[tokio::test]
    async fn test_unknown_contig_has_no_variants() {
        let source = source();
        let variants = source
            .fetch_variants(&ContigInterval::new("chr9".to_string(), 0, 100))
            .await
            .unwrap();
        assert!(variants.is_empty());
        assert_eq!(source.cache().fetch_count(), 1);
    }
}
