//! Processed source positions.
//!
//! Positions of one resource are kept as an ascending list of disjoint,
//! non-adjacent closed ranges: `[1..=3, 5..=5]`, never `[1..=3, 4..=4]`.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::RangeInclusive;
use url::Url;

/// Inserts `position` into `ranges`, merging it with the ranges it touches.
pub fn add_position(ranges: &mut Vec<RangeInclusive<u64>>, position: u64) {
    // First range that ends at or after `position - 1`. Every range before it
    // is too far left to touch `position`.
    let i = ranges.partition_point(|r| r.end().saturating_add(1) < position);
    let Some(range) = ranges.get(i) else {
        ranges.push(position..=position);
        return;
    };
    if range.contains(&position) {
        return;
    }
    if *range.start() > position.saturating_add(1) {
        ranges.insert(i, position..=position);
        return;
    }

    let start = (*range.start()).min(position);
    let mut end = (*range.end()).max(position);
    if let Some(next) = ranges.get(i + 1) {
        if *next.start() <= end.saturating_add(1) {
            end = *next.end();
            ranges.remove(i + 1);
        }
    }
    ranges[i] = start..=end;
}

/// Union of two position lists.
pub fn merge_positions(
    left: &[RangeInclusive<u64>],
    right: &[RangeInclusive<u64>],
) -> Vec<RangeInclusive<u64>> {
    let mut all: Vec<_> = left.iter().chain(right).cloned().collect();
    all.sort_by_key(|r| *r.start());

    let mut merged: Vec<RangeInclusive<u64>> = Vec::with_capacity(all.len());
    for range in all {
        match merged.last_mut() {
            Some(last) if *range.start() <= last.end().saturating_add(1) => {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Processed positions of every resource seen by a job.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PositionSet {
    resources: BTreeMap<Url, Vec<RangeInclusive<u64>>>,
}

impl PositionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: &Url, position: u64) {
        match self.resources.get_mut(resource) {
            Some(ranges) => add_position(ranges, position),
            None => {
                self.resources
                    .insert(resource.clone(), vec![position..=position]);
            }
        }
    }

    /// Merges all positions of `other` into `self`.
    pub fn merge(&mut self, other: &PositionSet) {
        for (resource, ranges) in &other.resources {
            let merged = match self.resources.get(resource) {
                Some(existing) => merge_positions(existing, ranges),
                None => ranges.clone(),
            };
            self.resources.insert(resource.clone(), merged);
        }
    }

    pub fn ranges(&self, resource: &Url) -> &[RangeInclusive<u64>] {
        self.resources
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn clear(&mut self) {
        self.resources.clear();
    }

    /// Writes one line per range: `<resource>:<n>` for a single position,
    /// `<resource>:<start>-<end>` otherwise. Resources are sorted.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for (resource, ranges) in &self.resources {
            for range in ranges {
                if range.start() == range.end() {
                    writeln!(writer, "{resource}:{}", range.start())?;
                } else {
                    writeln!(writer, "{resource}:{}-{}", range.start(), range.end())?;
                }
            }
        }
        Ok(())
    }
}
