use super::{CachedRecord, DataEvent, RangeCache, RangeFetcher};
use crate::{Error, Result};
use crate::contig_interval::ContigInterval;
use crate::formats::TwoBit;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

pub const SEQUENCE_GRANULARITY: i64 = 10_000;

/// Requests longer than this are refused rather than fetched.
pub const MAX_SEQUENCE_SPAN: i64 = 100_000;

/// A fetched stretch of reference bases starting at 0-based `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRun {
    pub contig: String,
    pub start: i64,
    pub bases: String,
}

impl SequenceRun {
    pub fn interval(&self) -> ContigInterval<String> {
        let stop = self.start + self.bases.len() as i64 - 1;
        ContigInterval::new(self.contig.clone(), self.start, stop)
    }
}

impl CachedRecord for SequenceRun {
    type Key = (String, i64);

    fn key(&self) -> Self::Key {
        (self.contig.clone(), self.start)
    }

    fn overlaps(&self, range: &ContigInterval<String>) -> bool {
        range.chr_intersects(&self.interval())
    }
}

pub struct TwoBitFetcher {
    twobit: TwoBit,
}

#[async_trait]
impl RangeFetcher for TwoBitFetcher {
    type Record = SequenceRun;

    async fn canonical_contig(&self, contig: &str) -> Result<String> {
        Ok(self.twobit.find_sequence(contig).await?.name.clone())
    }

    async fn fetch(&self, range: &ContigInterval<String>) -> Result<Vec<SequenceRun>> {
        let bases = self
            .twobit
            .get_features_in_range(
                &range.contig,
                range.start().saturating_add(1),
                range.stop().saturating_add(1),
            )
            .await?;
        if bases.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![SequenceRun {
            contig: range.contig.clone(),
            start: range.start(),
            bases,
        }])
    }
}

/// Cached reference sequence from a 2bit file. Ranges are 0-based and closed.
pub struct TwoBitDataSource {
    cache: RangeCache<TwoBitFetcher>,
}

impl TwoBitDataSource {
    pub fn new(twobit: TwoBit) -> Self {
        Self {
            cache: RangeCache::new(TwoBitFetcher { twobit }, SEQUENCE_GRANULARITY)
                .with_max_span(MAX_SEQUENCE_SPAN),
        }
    }

    pub fn with_granularity(self, granularity: i64) -> Self {
        Self {
            cache: self.cache.with_granularity(granularity),
        }
    }

    pub fn twobit(&self) -> &TwoBit {
        &self.cache.fetcher().twobit
    }

    pub fn cache(&self) -> &RangeCache<TwoBitFetcher> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.cache.subscribe()
    }

    pub async fn range_changed(&self, range: &ContigInterval<String>) -> Result<()> {
        self.cache.range_changed(range).await
    }

    pub async fn contig_list(&self) -> Result<Vec<String>> {
        self.twobit().contig_list().await
    }

    /// `range` on the contig name the 2bit file uses.
    pub async fn normalize_range(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<ContigInterval<String>> {
        let contig = self.cache.fetcher().canonical_contig(&range.contig).await?;
        Ok(range.with_contig(contig))
    }

    /// Loaded bases for `range`, with `.` wherever nothing is loaded.
    ///
    /// Ranges longer than the maximum span are never loaded and yield an
    /// empty string.
    pub fn get_range_as_string(&self, range: &ContigInterval<String>) -> String {
        let length = range.length();
        if length <= 0 || self.cache.exceeds_max_span(range) {
            return String::new();
        }
        let mut out = vec![b'.'; length as usize];
        for run in self.cache.query_in_range(Some(range)) {
            for (i, base) in run.bases.bytes().enumerate() {
                let pos = run.start + i as i64;
                if range.interval.contains(pos) {
                    out[(pos - range.start()) as usize] = base;
                }
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Loaded bases keyed by `contig:position`, `None` where nothing is loaded.
    pub fn get_range(&self, range: &ContigInterval<String>) -> BTreeMap<String, Option<char>> {
        self.get_range_as_string(range)
            .chars()
            .zip(range.start()..)
            .map(|(base, pos)| (format!("{}:{}", range.contig, pos), (base != '.').then_some(base)))
            .collect()
    }

    /// Load `range` and return its bases.
    ///
    /// Fails with [`Error::InvalidRange`] when the range is longer than the
    /// maximum span.
    pub async fn fetch_range_as_string(&self, range: &ContigInterval<String>) -> Result<String> {
        if self.cache.exceeds_max_span(range) {
            return Err(Error::InvalidRange(format!(
                "{} spans {} bases; at most {} can be fetched at once",
                range,
                range.length(),
                self.cache.max_span().unwrap_or(MAX_SEQUENCE_SPAN)
            )));
        }
        let range = self.normalize_range(range).await?;
        self.range_changed(&range).await?;
        Ok(self.get_range_as_string(&range))
    }
}
