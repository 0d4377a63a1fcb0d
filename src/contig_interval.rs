//! Genomic intervals: an [`Interval`] qualified by a contig.
//!
//! The contig is either a name (`ContigInterval<String>`) or a numeric
//! reference id (`ContigInterval<i32>`, as used by BAM and BAI). Every
//! comparison between two contig intervals checks the contig first.

use crate::interval::Interval;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed interval on one contig.
///
/// Ordering is by contig, then start, then stop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContigInterval<T> {
    pub contig: T,
    pub interval: Interval,
}

impl<T: Clone + Eq + Ord> ContigInterval<T> {
    pub fn new(contig: T, start: i64, stop: i64) -> Self {
        Self {
            contig,
            interval: Interval::new(start, stop),
        }
    }

    pub fn start(&self) -> i64 {
        self.interval.start
    }

    pub fn stop(&self) -> i64 {
        self.interval.stop
    }

    pub fn length(&self) -> i64 {
        self.interval.length()
    }

    pub fn intersects(&self, other: &ContigInterval<T>) -> bool {
        self.contig == other.contig && self.interval.intersects(&other.interval)
    }

    /// The overlap with `other`, or `None` if they lie on different contigs
    /// or do not overlap.
    pub fn intersection(&self, other: &ContigInterval<T>) -> Option<ContigInterval<T>> {
        if !self.intersects(other) {
            return None;
        }
        Some(ContigInterval {
            contig: self.contig.clone(),
            interval: self.interval.intersection(&other.interval),
        })
    }

    pub fn contains_interval(&self, other: &ContigInterval<T>) -> bool {
        self.contig == other.contig && self.interval.contains_interval(&other.interval)
    }

    pub fn contains_locus(&self, contig: &T, position: i64) -> bool {
        self.contig == *contig && self.interval.contains(position)
    }

    pub fn is_adjacent_to(&self, other: &ContigInterval<T>) -> bool {
        self.contig == other.contig && self.interval.is_adjacent_to(&other.interval)
    }

    /// Is this interval covered by the union of `intervals`? Intervals on
    /// other contigs are ignored. Those on this contig must be sorted by start.
    pub fn is_covered_by(&self, intervals: &[ContigInterval<T>]) -> bool {
        let same: Vec<Interval> = intervals
            .iter()
            .filter(|ci| ci.contig == self.contig)
            .map(|ci| ci.interval)
            .collect();
        self.interval.is_covered_by(&same)
    }

    /// The parts of this interval not covered by any same-contig interval in
    /// the list.
    pub fn complement_intervals(&self, intervals: &[ContigInterval<T>]) -> Vec<ContigInterval<T>> {
        let same: Vec<Interval> = intervals
            .iter()
            .filter(|ci| ci.contig == self.contig)
            .map(|ci| ci.interval)
            .collect();
        self.interval
            .complement_intervals(&same)
            .into_iter()
            .map(|interval| ContigInterval {
                contig: self.contig.clone(),
                interval,
            })
            .collect()
    }

    /// Sort and merge overlapping or adjacent intervals, contig by contig.
    pub fn coalesce(intervals: &[ContigInterval<T>]) -> Vec<ContigInterval<T>> {
        let mut sorted: Vec<ContigInterval<T>> = intervals
            .iter()
            .filter(|ci| !ci.interval.is_empty())
            .cloned()
            .collect();
        sorted.sort();

        let mut merged: Vec<ContigInterval<T>> = Vec::with_capacity(sorted.len());
        for ci in sorted {
            match merged.last_mut() {
                Some(last) if last.contig == ci.contig && ci.start() <= last.stop() + 1 => {
                    last.interval.stop = last.stop().max(ci.stop());
                }
                _ => merged.push(ci),
            }
        }
        merged
    }

    pub fn bounding_interval(intervals: &[ContigInterval<T>]) -> Result<ContigInterval<T>> {
        let contig = Self::common_contig(intervals, "tried to bound zero intervals")?;
        let ivs: Vec<Interval> = intervals.iter().map(|ci| ci.interval).collect();
        Ok(ContigInterval {
            contig,
            interval: Interval::bounding_interval(&ivs)?,
        })
    }

    pub fn intersect_all(intervals: &[ContigInterval<T>]) -> Result<ContigInterval<T>> {
        let contig = Self::common_contig(intervals, "tried to intersect zero intervals")?;
        let ivs: Vec<Interval> = intervals.iter().map(|ci| ci.interval).collect();
        Ok(ContigInterval {
            contig,
            interval: Interval::intersect_all(&ivs)?,
        })
    }

    fn common_contig(intervals: &[ContigInterval<T>], empty: &'static str) -> Result<T> {
        let first = intervals.first().ok_or(Error::EmptyInput(empty))?;
        if intervals.iter().any(|ci| ci.contig != first.contig) {
            return Err(Error::InvalidContig(
                "intervals span more than one contig".to_string(),
            ));
        }
        Ok(first.contig.clone())
    }
}

impl ContigInterval<String> {
    /// Does this interval lie on `contig`, allowing `chr17` vs `17` mismatches?
    pub fn chr_on_contig(&self, contig: &str) -> bool {
        self.contig == contig || alt_contig_name(&self.contig) == contig
    }

    /// Like [`ContigInterval::intersects`], tolerating a `chr` prefix mismatch.
    pub fn chr_intersects(&self, other: &ContigInterval<String>) -> bool {
        self.chr_on_contig(&other.contig) && self.interval.intersects(&other.interval)
    }

    pub fn chr_contains_locus(&self, contig: &str, position: i64) -> bool {
        self.chr_on_contig(contig) && self.interval.contains(position)
    }

    pub fn with_contig(&self, contig: impl Into<String>) -> ContigInterval<String> {
        ContigInterval {
            contig: contig.into(),
            interval: self.interval,
        }
    }
}

impl<T: fmt::Display> fmt::Display for ContigInterval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.contig, self.interval.start, self.interval.stop)
    }
}

/// The other common spelling of a contig name: `chr17` <-> `17`.
pub fn alt_contig_name(name: &str) -> String {
    match name.strip_prefix("chr") {
        Some(stripped) => stripped.to_string(),
        None => format!("chr{}", name),
    }
}

/// Round `range` outward so both ends fall on multiples of `granularity`.
///
/// The start is rounded down and clamped at zero; the stop is rounded up.
/// A stop too close to `i64::MAX` to round up is left at `i64::MAX`.
pub fn expand_range<T: Clone + Eq + Ord>(
    range: &ContigInterval<T>,
    granularity: i64,
) -> ContigInterval<T> {
    let g = granularity.max(1);
    let round_down = |x: i64| x.div_euclid(g) * g;
    let start = round_down(range.start()).max(0);
    let stop = range.stop().checked_add(g - 1).map_or(i64::MAX, round_down);
    ContigInterval::new(range.contig.clone(), start, stop.max(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci(contig: &str, start: i64, stop: i64) -> ContigInterval<String> {
        ContigInterval::new(contig.to_string(), start, stop)
    }

    #[test]
    fn test_intersects_requires_same_contig() {
        assert!(ci("chr1", 0, 10).intersects(&ci("chr1", 5, 15)));
        assert!(!ci("chr1", 0, 10).intersects(&ci("chr2", 5, 15)));
        assert_eq!(
            ci("chr1", 0, 10).intersection(&ci("chr1", 5, 15)),
            Some(ci("chr1", 5, 10))
        );
        assert_eq!(ci("chr1", 0, 10).intersection(&ci("chr2", 5, 15)), None);
        assert_eq!(ci("chr1", 0, 10).intersection(&ci("chr1", 11, 15)), None);
    }

    #[test]
    fn test_numeric_contigs() {
        let a = ContigInterval::new(0, 100, 200);
        let b = ContigInterval::new(1, 100, 200);
        assert!(!a.intersects(&b));
        assert!(a < b);
        assert_eq!(a.to_string(), "0:100-200");
    }

    #[test]
    fn test_ordering() {
        let mut ivs = vec![
            ci("chr2", 0, 5),
            ci("chr1", 10, 20),
            ci("chr1", 10, 15),
            ci("chr1", 0, 100),
        ];
        ivs.sort();
        assert_eq!(
            ivs,
            vec![ci("chr1", 0, 100), ci("chr1", 10, 15), ci("chr1", 10, 20), ci("chr2", 0, 5)]
        );
    }

    #[test]
    fn test_contains() {
        let r = ci("chr1", 10, 20);
        assert!(r.contains_locus(&"chr1".to_string(), 15));
        assert!(!r.contains_locus(&"chr2".to_string(), 15));
        assert!(r.contains_interval(&ci("chr1", 12, 20)));
        assert!(!r.contains_interval(&ci("chr2", 12, 20)));
    }

    #[test]
    fn test_is_adjacent_to() {
        assert!(ci("chr1", 0, 9).is_adjacent_to(&ci("chr1", 10, 20)));
        assert!(!ci("chr1", 0, 9).is_adjacent_to(&ci("chr2", 10, 20)));
    }

    #[test]
    fn test_is_covered_by_ignores_other_contigs() {
        let r = ci("chr1", 10, 20);
        assert!(r.is_covered_by(&[ci("chr1", 0, 15), ci("chr2", 0, 100), ci("chr1", 16, 30)]));
        assert!(!r.is_covered_by(&[ci("chr2", 0, 100)]));
    }

    #[test]
    fn test_complement_intervals() {
        let r = ci("chr1", 0, 100);
        assert_eq!(
            r.complement_intervals(&[ci("chr1", 10, 20), ci("chr2", 0, 100)]),
            vec![ci("chr1", 0, 9), ci("chr1", 21, 100)]
        );
    }

    #[test]
    fn test_coalesce() {
        let merged = ContigInterval::coalesce(&[
            ci("chr1", 20, 30),
            ci("chr2", 0, 10),
            ci("chr1", 0, 10),
            ci("chr1", 11, 19),
            ci("chr2", 11, 20),
            ci("chr1", 40, 50),
        ]);
        assert_eq!(
            merged,
            vec![ci("chr1", 0, 30), ci("chr1", 40, 50), ci("chr2", 0, 20)]
        );
        assert_eq!(ContigInterval::coalesce(&merged), merged);
    }

    #[test]
    fn test_bounding_interval() {
        let b = ContigInterval::bounding_interval(&[ci("chr1", 5, 10), ci("chr1", 0, 7)]).unwrap();
        assert_eq!(b, ci("chr1", 0, 10));
        assert!(matches!(
            ContigInterval::<String>::bounding_interval(&[]),
            Err(Error::EmptyInput(_))
        ));
        assert!(matches!(
            ContigInterval::bounding_interval(&[ci("chr1", 5, 10), ci("chr2", 0, 7)]),
            Err(Error::InvalidContig(_))
        ));
    }

    #[test]
    fn test_intersect_all() {
        let r = ContigInterval::intersect_all(&[ci("chr1", 5, 10), ci("chr1", 0, 7)]).unwrap();
        assert_eq!(r, ci("chr1", 5, 7));
    }

    #[test]
    fn test_chr_aliases() {
        assert_eq!(alt_contig_name("chr17"), "17");
        assert_eq!(alt_contig_name("17"), "chr17");
        let r = ci("17", 0, 10);
        assert!(r.chr_on_contig("chr17"));
        assert!(r.chr_intersects(&ci("chr17", 5, 6)));
        assert!(r.chr_contains_locus("chr17", 3));
        assert!(!r.chr_on_contig("chr1"));
    }

    #[test]
    fn test_expand_range() {
        assert_eq!(expand_range(&ci("chr1", 100, 110), 10), ci("chr1", 100, 110));
        assert_eq!(expand_range(&ci("chr1", 105, 115), 10), ci("chr1", 100, 120));
        assert_eq!(expand_range(&ci("chr1", 5, 150), 100), ci("chr1", 0, 200));
        assert_eq!(expand_range(&ci("chr1", -20, 3), 10), ci("chr1", 0, 10));
    }

    #[test]
    fn test_expand_range_near_max() {
        let huge = ci("chr1", 95, i64::MAX);
        assert_eq!(huge.length(), i64::MAX - 95 + 1);
        assert_eq!(expand_range(&huge, 10), ci("chr1", 90, i64::MAX));
        assert_eq!(
            expand_range(&ci("chr1", 0, i64::MAX - 5), 10),
            ci("chr1", 0, i64::MAX)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ci("chr1", 100, 200).to_string(), "chr1:100-200");
    }
}
