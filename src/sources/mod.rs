//! Range-cache data sources.
//!
//! A [`RangeCache`] turns a stream of possibly overlapping range requests
//! into the smallest set of new fetches. It remembers which genomic ranges
//! are already fully loaded, reserves the gaps it is about to fetch so that
//! concurrent requests never fetch the same bases twice, and announces newly
//! loaded ranges on a broadcast channel.
//!
//! The format-specific part is a [`RangeFetcher`]; this module provides the
//! four used by the server:
//!
//! - [`AlignmentDataSource`] - BAM + BAI
//! - [`TwoBitDataSource`] - 2bit reference sequence
//! - [`VariantDataSource`] - VCF
//! - [`FeatureDataSource`] - bigBed genes

pub mod alignments;
pub mod features;
pub mod sequence;
pub mod variants;

pub use alignments::AlignmentDataSource;
pub use features::{FeatureDataSource, Gene};
pub use sequence::{SequenceRun, TwoBitDataSource};
pub use variants::VariantDataSource;

use crate::Result;
use crate::contig_interval::{ContigInterval, expand_range};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    /// Records for this range are now in the store
    NewData(ContigInterval<String>),
    /// The range was too large to fetch
    NewDataRefused(ContigInterval<String>),
}

/// A record held by a [`RangeCache`].
pub trait CachedRecord: Send + Sync + 'static {
    /// Stable identity; inserting a record whose key is already present is
    /// a no-op.
    type Key: Ord + Clone + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn overlaps(&self, range: &ContigInterval<String>) -> bool;
}

#[async_trait]
pub trait RangeFetcher: Send + Sync + 'static {
    type Record: CachedRecord;

    /// The contig name the underlying file uses for `contig`.
    async fn canonical_contig(&self, contig: &str) -> Result<String>;

    /// Fetch and decode every record overlapping `range`.
    async fn fetch(&self, range: &ContigInterval<String>) -> Result<Vec<Self::Record>>;
}

struct CacheState<R: CachedRecord> {
    /// Sorted and coalesced
    covered: Vec<ContigInterval<String>>,
    /// Gaps currently being fetched
    pending: Vec<ContigInterval<String>>,
    records: BTreeMap<R::Key, Arc<R>>,
}

impl<R: CachedRecord> CacheState<R> {
    fn known(&self) -> Vec<ContigInterval<String>> {
        let mut all = self.covered.clone();
        all.extend(self.pending.iter().cloned());
        ContigInterval::coalesce(&all)
    }

    fn release(&mut self, gap: &ContigInterval<String>) {
        if let Some(i) = self.pending.iter().position(|p| p == gap) {
            self.pending.swap_remove(i);
        }
    }
}

fn lock_state<R: CachedRecord>(state: &Mutex<CacheState<R>>) -> MutexGuard<'_, CacheState<R>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Gaps reserved by one `range_changed` call.
///
/// Any gap still held when the guard drops is released, whether its fetch
/// failed or the caller's future was dropped mid-fetch, so a later request
/// fetches it again.
struct Reservation<'a, R: CachedRecord> {
    state: &'a Mutex<CacheState<R>>,
    gaps: Vec<ContigInterval<String>>,
}

impl<R: CachedRecord> Reservation<'_, R> {
    /// Store the records fetched for `gap` and mark it covered.
    fn complete(&mut self, gap: &ContigInterval<String>, records: Vec<R>) {
        let mut state = lock_state(self.state);
        for record in records {
            state.records.entry(record.key()).or_insert_with(|| Arc::new(record));
        }
        state.release(gap);
        state.covered.push(gap.clone());
        state.covered = ContigInterval::coalesce(&state.covered);
        self.gaps.retain(|g| g != gap);
    }
}

impl<R: CachedRecord> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.gaps.is_empty() {
            return;
        }
        debug!(gaps = self.gaps.len(), "releasing unfetched ranges");
        let mut state = lock_state(self.state);
        for gap in &self.gaps {
            state.release(gap);
        }
    }
}

pub struct RangeCache<F: RangeFetcher> {
    fetcher: F,
    granularity: i64,
    max_span: Option<i64>,
    state: Mutex<CacheState<F::Record>>,
    events: broadcast::Sender<DataEvent>,
    fetches: AtomicUsize,
}

impl<F: RangeFetcher> RangeCache<F> {
    pub fn new(fetcher: F, granularity: i64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            fetcher,
            granularity: granularity.max(1),
            max_span: None,
            state: Mutex::new(CacheState {
                covered: Vec::new(),
                pending: Vec::new(),
                records: BTreeMap::new(),
            }),
            events,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Refuse ranges longer than `bases` instead of fetching them.
    pub fn with_max_span(mut self, bases: i64) -> Self {
        self.max_span = Some(bases);
        self
    }

    pub fn with_granularity(mut self, granularity: i64) -> Self {
        self.granularity = granularity.max(1);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn granularity(&self) -> i64 {
        self.granularity
    }

    pub fn max_span(&self) -> Option<i64> {
        self.max_span
    }

    /// Is `range` longer than this cache is willing to fetch?
    pub fn exceeds_max_span(&self, range: &ContigInterval<String>) -> bool {
        self.max_span.is_some_and(|max| range.length() > max)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.events.subscribe()
    }

    /// Number of gap fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn covered_ranges(&self) -> Vec<ContigInterval<String>> {
        lock_state(&self.state).covered.clone()
    }

    fn notify(&self, event: DataEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Make sure every record overlapping `range` is loaded.
    ///
    /// Does nothing when the range is already covered. Otherwise the range is
    /// widened to the fetch granularity and each missing piece is fetched.
    /// If a fetch fails, or the returned future is dropped before it
    /// completes, every piece not yet loaded is released so a future call can
    /// retry it.
    pub async fn range_changed(&self, range: &ContigInterval<String>) -> Result<()> {
        let contig = self.fetcher.canonical_contig(&range.contig).await?;
        let range = range.with_contig(contig);

        if self.exceeds_max_span(&range) {
            debug!(range = %range, max = self.max_span, "refusing oversized range");
            self.notify(DataEvent::NewDataRefused(range));
            return Ok(());
        }

        let gaps = {
            let mut state = lock_state(&self.state);
            let known = state.known();
            if range.is_covered_by(&known) {
                return Ok(());
            }
            let gaps = expand_range(&range, self.granularity).complement_intervals(&known);
            state.pending.extend(gaps.iter().cloned());
            gaps
        };
        debug!(range = %range, gaps = gaps.len(), "fetching uncovered ranges");

        let mut reservation = Reservation {
            state: &self.state,
            gaps: gaps.clone(),
        };
        for gap in &gaps {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let records = self.fetcher.fetch(gap).await?;
            reservation.complete(gap, records);
            self.notify(DataEvent::NewData(gap.clone()));
        }
        Ok(())
    }

    /// Loaded records overlapping `range`, in key order.
    pub fn query_in_range(&self, range: Option<&ContigInterval<String>>) -> Vec<Arc<F::Record>> {
        let Some(range) = range else {
            return Vec::new();
        };
        let state = lock_state(&self.state);
        state
            .records
            .values()
            .filter(|r| r.overlaps(range))
            .cloned()
            .collect()
    }

    pub fn num_records(&self) -> usize {
        lock_state(&self.state).records.len()
    }
}
