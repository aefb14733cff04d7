//! C4 — Address Interval Map. A set of non-overlapping half-open intervals
//! `[begin, end)` keyed by device address, each carrying a buffer ident.
//!
//! Grounded on `towl-db/towl/db/creator/devmem_manager.py`'s `MemoryMap`
//! (an `IntervalTree` wrapper with `map_buffer`/`unmap_buffer`/`lookup`).
//! The underlying structure here is a plain `BTreeMap<u64, Interval>` keyed
//! by interval start — the spec leaves the data structure open (§9), only
//! the chop-then-insert contract is required.

use std::collections::BTreeMap;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    end: u64,
    buffer_ident: u64,
}

#[derive(Debug, Default)]
pub struct IntervalMap {
    // keyed by interval start
    intervals: BTreeMap<u64, Interval>,
}

impl IntervalMap {
    pub fn new() -> Self {
        IntervalMap::default()
    }

    /// Removes any portion of existing intervals overlapping `[begin, end)`
    /// (splitting at the boundary where necessary), then inserts the new
    /// interval. No two stored intervals overlap after this call.
    pub fn map(&mut self, begin: u64, end: u64, buffer_ident: u64) {
        self.unmap(begin, end);
        self.intervals.insert(begin, Interval { end, buffer_ident });
    }

    /// Excises `[begin, end)` from the covered region, splitting any
    /// interval that only partially overlaps it.
    pub fn unmap(&mut self, begin: u64, end: u64) {
        if begin >= end {
            return;
        }

        // Find the interval that might start before `begin` and overlap it.
        if let Some((&start, &iv)) = self.intervals.range(..begin).next_back() {
            if iv.end > begin {
                self.intervals.remove(&start);
                if start < begin {
                    self.intervals.insert(
                        start,
                        Interval {
                            end: begin,
                            buffer_ident: iv.buffer_ident,
                        },
                    );
                }
                if iv.end > end {
                    self.intervals.insert(
                        end,
                        Interval {
                            end: iv.end,
                            buffer_ident: iv.buffer_ident,
                        },
                    );
                }
            }
        }

        // Remove/trim every interval starting within [begin, end).
        let overlapping: Vec<u64> = self
            .intervals
            .range(begin..end)
            .map(|(&start, _)| start)
            .collect();
        for start in overlapping {
            if let Some(iv) = self.intervals.remove(&start) {
                if iv.end > end {
                    self.intervals.insert(
                        end,
                        Interval {
                            end: iv.end,
                            buffer_ident: iv.buffer_ident,
                        },
                    );
                }
            }
        }
    }

    /// Returns the buffer ident whose interval contains `addr`, if any.
    /// More than one match means two stored intervals overlap, which the
    /// insert/unmap contract above should make impossible — if it happens
    /// anyway it is an internal corruption (§4.4) and is fatal.
    pub fn lookup(&self, addr: u64) -> Result<Option<u64>> {
        let mut matches = Vec::new();
        for (_start, iv) in self.intervals.range(..=addr) {
            if addr < iv.end {
                matches.push(iv.buffer_ident);
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            count => Err(IngestError::IntervalMapCorruption { addr, count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut m = IntervalMap::new();
        m.map(0x100, 0x200, 1);
        assert_eq!(m.lookup(0x100).unwrap(), Some(1));
        assert_eq!(m.lookup(0x1ff).unwrap(), Some(1));
        assert_eq!(m.lookup(0x200).unwrap(), None);
        assert_eq!(m.lookup(0x50).unwrap(), None);
    }

    #[test]
    fn overlapping_insert_chops_old_interval() {
        let mut m = IntervalMap::new();
        m.map(0x100, 0x200, 1);
        m.map(0x180, 0x280, 2);
        // old interval [0x100,0x200) chopped to [0x100,0x180)
        assert_eq!(m.lookup(0x150).unwrap(), Some(1));
        assert_eq!(m.lookup(0x180).unwrap(), Some(2));
        assert_eq!(m.lookup(0x27f).unwrap(), Some(2));
    }

    #[test]
    fn insert_splits_containing_interval_in_two() {
        let mut m = IntervalMap::new();
        m.map(0x100, 0x300, 1);
        m.map(0x180, 0x200, 2);
        assert_eq!(m.lookup(0x150).unwrap(), Some(1));
        assert_eq!(m.lookup(0x190).unwrap(), Some(2));
        assert_eq!(m.lookup(0x250).unwrap(), Some(1));
    }

    #[test]
    fn unmap_removes_interval() {
        let mut m = IntervalMap::new();
        m.map(0x100, 0x200, 1);
        m.unmap(0x100, 0x200);
        assert_eq!(m.lookup(0x150).unwrap(), None);
    }

    #[test]
    fn unmap_partial_trims() {
        let mut m = IntervalMap::new();
        m.map(0x100, 0x200, 1);
        m.unmap(0x100, 0x180);
        assert_eq!(m.lookup(0x150).unwrap(), None);
        assert_eq!(m.lookup(0x190).unwrap(), Some(1));
    }
}
