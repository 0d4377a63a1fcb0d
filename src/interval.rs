//! Closed numeric intervals.
//!
//! An [`Interval`] represents `[start, stop]` with both ends inclusive. An
//! interval whose `stop` is less than its `start` is empty; empty intervals
//! are legal values and have length zero.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub stop: i64,
}

impl Interval {
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// Saturates at `i64::MAX` for intervals spanning the whole number line.
    pub fn length(&self) -> i64 {
        self.stop.saturating_sub(self.start).saturating_add(1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.stop < self.start
    }

    /// The overlap of two intervals. Disjoint inputs produce an empty interval.
    pub fn intersection(&self, other: &Interval) -> Interval {
        Interval::new(self.start.max(other.start), self.stop.min(other.stop))
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start <= other.stop
            && other.start <= self.stop
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.start && value <= self.stop
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        self.contains(other.start) && self.contains(other.stop)
    }

    /// True if the two intervals touch end to end without overlapping.
    pub fn is_adjacent_to(&self, other: &Interval) -> bool {
        other.stop.checked_add(1) == Some(self.start)
            || self.stop.checked_add(1) == Some(other.start)
    }

    /// Is this interval entirely covered by the union of `ranges`?
    ///
    /// # Panics
    ///
    /// `ranges` must be sorted by start. Passing an unsorted list is a
    /// programming error and panics.
    pub fn is_covered_by(&self, ranges: &[Interval]) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut remaining_start = self.start;
        for (i, r) in ranges.iter().enumerate() {
            assert!(
                i == 0 || r.start >= ranges[i - 1].start,
                "is_covered_by requires ranges sorted by start"
            );
            if r.is_empty() || r.stop < remaining_start {
                continue;
            }
            if r.start > remaining_start {
                return false;
            }
            if r.stop >= self.stop {
                return true;
            }
            remaining_start = remaining_start.max(r.stop + 1);
        }
        false
    }

    /// The parts of this interval not in `other`: zero, one or two intervals.
    pub fn subtract(&self, other: &Interval) -> Vec<Interval> {
        if !self.intersects(other) {
            return if self.is_empty() { vec![] } else { vec![*self] };
        }
        let mut parts = Vec::with_capacity(2);
        if other.start > self.start {
            parts.push(Interval::new(self.start, other.start - 1));
        }
        if other.stop < self.stop {
            parts.push(Interval::new(other.stop + 1, self.stop));
        }
        parts
    }

    /// The sorted, disjoint sub-intervals of `self` not covered by any of
    /// `ranges`. The ranges need not be sorted or disjoint.
    pub fn complement_intervals(&self, ranges: &[Interval]) -> Vec<Interval> {
        let mut comps = if self.is_empty() { vec![] } else { vec![*self] };
        for range in ranges {
            comps = comps.iter().flat_map(|iv| iv.subtract(range)).collect();
        }
        comps.sort();
        comps
    }

    /// The smallest interval containing every interval in the list.
    pub fn bounding_interval(intervals: &[Interval]) -> Result<Interval> {
        let (first, rest) = intervals
            .split_first()
            .ok_or(Error::EmptyInput("tried to bound zero intervals"))?;
        Ok(rest.iter().fold(*first, |acc, iv| {
            Interval::new(acc.start.min(iv.start), acc.stop.max(iv.stop))
        }))
    }

    pub fn intersect_all(intervals: &[Interval]) -> Result<Interval> {
        let (first, rest) = intervals
            .split_first()
            .ok_or(Error::EmptyInput("tried to intersect zero intervals"))?;
        Ok(rest.iter().fold(*first, |acc, iv| acc.intersection(iv)))
    }

    /// Sort, drop empties, and merge overlapping or adjacent intervals.
    pub fn coalesce(intervals: &[Interval]) -> Vec<Interval> {
        let mut sorted: Vec<Interval> =
            intervals.iter().filter(|iv| !iv.is_empty()).copied().collect();
        sorted.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
        for iv in sorted {
            match merged.last_mut() {
                Some(last) if iv.start <= last.stop.saturating_add(1) => {
                    last.stop = last.stop.max(iv.stop)
                }
                _ => merged.push(iv),
            }
        }
        merged
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}
