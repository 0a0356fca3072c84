#![forbid(unsafe_code)]

//! Sparse seekable byte cache.
//!
//! [`Cache`] keeps an ordered partition of `[0, tail)` into holes and filled
//! segments plus a trailing terminator, with independent read and write
//! cursors. Writes carve exact-sized filled segments out of holes (or the
//! terminator), reads drain contiguous filled bytes, and a bounded LRU
//! eviction pass keeps total cached bytes under `cache_size` while protecting
//! the readahead window around the read cursor.

use std::ops::Range;

use bytes::Bytes;
use tracing::trace;

use crate::{
    error::{CacheError, CacheResult},
    list::{SegId, SegmentList},
    segment::Segment,
};

pub struct Cache {
    list: SegmentList,
    read_offset: u64,
    read_cursor: SegId,
    write_offset: u64,
    write_cursor: SegId,
    /// Soft cap on total filled bytes; 0 means unbounded.
    cache_size: u64,
    /// Readahead window protected from eviction.
    chunk_size: u64,
    /// Monotonic LRU clock.
    clock: u64,
    /// Total bytes in filled segments.
    filled: u64,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("read_offset", &self.read_offset)
            .field("write_offset", &self.write_offset)
            .field("filled", &self.filled)
            .finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(chunk_size: u64, cache_size: u64) -> Self {
        let list = SegmentList::new();
        let head = list.head();
        Self {
            list,
            read_offset: 0,
            read_cursor: head,
            write_offset: 0,
            write_cursor: head,
            cache_size,
            chunk_size,
            clock: 0,
            filled: 0,
        }
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn filled_bytes(&self) -> u64 {
        self.filled
    }

    /// Move the read cursor to the segment containing `offset`.
    ///
    /// May land past all known data (inside the terminator).
    pub fn seek_read(&mut self, offset: u64) -> CacheResult<()> {
        self.read_cursor = self.locate(offset)?;
        self.read_offset = offset;
        Ok(())
    }

    /// Move the write cursor to the segment containing `offset`.
    pub fn seek_write(&mut self, offset: u64) -> CacheResult<()> {
        self.write_cursor = self.locate(offset)?;
        self.write_offset = offset;
        Ok(())
    }

    /// Contiguous filled bytes available at the read cursor, capped by `max`.
    pub fn bytes_readable(&self, max: u64) -> u64 {
        let mut total = 0u64;
        let mut cur = self.read_cursor;
        let mut pos = self.read_offset;
        loop {
            let seg = self.list.get(cur);
            if !seg.is_filled() || !seg.contains(pos) {
                break;
            }
            total += seg.end() - pos;
            if total >= max {
                return max;
            }
            pos = seg.end();
            match self.list.next(cur) {
                Some(n) => cur = n,
                None => break,
            }
        }
        total.min(max)
    }

    /// Contiguous hole bytes available at the write cursor, capped by `max`.
    ///
    /// Sitting on the terminator means unbounded space, so `max` is returned.
    pub fn bytes_writable(&self, max: u64) -> u64 {
        let mut total = 0u64;
        let mut cur = self.write_cursor;
        let mut pos = self.write_offset;
        loop {
            let seg = self.list.get(cur);
            if seg.is_eof() {
                return max;
            }
            if !seg.is_empty() {
                break;
            }
            total += seg.end() - pos;
            if total >= max {
                return max;
            }
            pos = seg.end();
            match self.list.next(cur) {
                Some(n) => cur = n,
                None => break,
            }
        }
        total.min(max)
    }

    /// Copy up to `dest.len()` readable bytes, advancing the read cursor.
    ///
    /// Returns the number of bytes copied; stops at the first hole. Touches
    /// the LRU stamp of every filled segment it reads from.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }
        let n = self.bytes_readable(dest.len() as u64);
        let mut copied: u64 = 0;
        while copied < n {
            let stamp = self.tick();
            let seg = self.list.get_mut(self.read_cursor);
            let end = seg.end().min(self.read_offset + (n - copied));
            #[expect(clippy::cast_possible_truncation)] // bounded by dest.len()
            let at = copied as usize;
            seg.copy_range(&mut dest[at..], self.read_offset, end);
            seg.stamp = stamp;
            copied += end - self.read_offset;
            let seg_end = seg.end();
            self.read_offset = end;
            if self.read_offset >= seg_end
                && let Some(next) = self.list.next(self.read_cursor)
            {
                self.read_cursor = next;
            }
        }
        #[expect(clippy::cast_possible_truncation)] // bounded by dest.len()
        let copied = copied as usize;
        copied
    }

    /// Install `data` at the write cursor.
    ///
    /// The span must fit entirely within the hole run starting at the write
    /// offset (the terminator counts as an endless hole). The surrounding
    /// hole is split so the new filled segment covers the span exactly; the
    /// write cursor advances past it and an eviction pass runs.
    pub fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let start = self.write_offset;
        let end = start + data.len() as u64;

        let mut chain_head = self.write_cursor;
        if !self.list.get(chain_head).contains(start) {
            chain_head = self.locate(start)?;
        }
        if self.list.get(chain_head).is_filled() {
            return Err(CacheError::NoSpace {
                offset: start,
                len: data.len(),
            });
        }

        // Walk the hole run until it covers the span.
        let mut chain_tail = chain_head;
        loop {
            let seg = self.list.get(chain_tail);
            if seg.is_eof() || seg.end() >= end {
                break;
            }
            match self.list.next(chain_tail) {
                Some(n) if !self.list.get(n).is_filled() => chain_tail = n,
                _ => {
                    return Err(CacheError::NoSpace {
                        offset: start,
                        len: data.len(),
                    });
                }
            }
        }

        let head_start = self.list.get(chain_head).start();
        let tail_seg = self.list.get(chain_tail).clone();
        let stamp = self.tick();

        let mut segs = Vec::with_capacity(3);
        if head_start < start {
            segs.push(Segment::empty(head_start, start));
        }
        segs.push(Segment::filled(start, Bytes::copy_from_slice(data), stamp));
        if tail_seg.is_eof() {
            segs.push(Segment::eof(end));
        } else if tail_seg.end() > end {
            segs.push(Segment::empty(end, tail_seg.end()));
        }

        let (first, _) = self.list.splice(chain_head, chain_tail, segs)?;
        let written = if head_start < start {
            self.list
                .next(first)
                .ok_or_else(|| CacheError::invariant("carved segment vanished"))?
        } else {
            first
        };

        self.filled += data.len() as u64;
        self.write_offset = end;
        self.write_cursor = self
            .list
            .next(written)
            .ok_or_else(|| CacheError::invariant("filled segment at list tail"))?;
        // The splice may have consumed the segment under the read cursor.
        self.read_cursor = self.locate(self.read_offset)?;

        self.gc(written)
    }

    /// Maximal runs of filled segments as `[start, end)` intervals.
    pub fn ranges(&self) -> Vec<Range<u64>> {
        let mut out = Vec::new();
        let mut run: Option<(u64, u64)> = None;
        for (_, seg) in self.list.iter() {
            if seg.is_filled() {
                match &mut run {
                    Some((_, e)) => *e = seg.end(),
                    None => run = Some((seg.start(), seg.end())),
                }
            } else if let Some((s, e)) = run.take() {
                out.push(s..e);
            }
        }
        if let Some((s, e)) = run {
            out.push(s..e);
        }
        out
    }

    /// Structural self-check; surfaces as `Invariant` only on an internal bug.
    pub fn check_invariants(&self) -> CacheResult<()> {
        self.list.check_invariants().map_err(CacheError::invariant)?;
        if !self.list.get(self.read_cursor).contains(self.read_offset) {
            return Err(CacheError::invariant("read cursor lost its segment"));
        }
        if !self.list.get(self.write_cursor).contains(self.write_offset) {
            return Err(CacheError::invariant("write cursor lost its segment"));
        }
        let total: u64 = self
            .list
            .iter()
            .filter(|(_, s)| s.is_filled())
            .map(|(_, s)| s.len())
            .sum();
        if total != self.filled {
            return Err(CacheError::invariant(format!(
                "filled byte accounting drifted: tracked {} actual {total}",
                self.filled
            )));
        }
        Ok(())
    }

    /// Evict least-recently-read filled segments until the cap is met.
    ///
    /// Segments intersecting the hot window `[read_offset, read_offset +
    /// chunk_size)` are never candidates, and neither is `protect` (the
    /// segment the current write just installed).
    fn gc(&mut self, protect: SegId) -> CacheResult<()> {
        if self.cache_size == 0 || self.filled <= self.cache_size {
            return Ok(());
        }
        let hot_start = self.read_offset;
        let hot_end = self.read_offset.saturating_add(self.chunk_size);

        let mut candidates: Vec<(u64, SegId)> = self
            .list
            .iter()
            .filter(|(id, seg)| {
                seg.is_filled()
                    && *id != protect
                    && (seg.end() < hot_start || seg.start() > hot_end)
            })
            .map(|(id, seg)| (seg.stamp, id))
            .collect();
        candidates.sort_unstable_by_key(|(stamp, _)| *stamp);

        for (_, id) in candidates {
            if self.filled <= self.cache_size {
                break;
            }
            let (start, end) = {
                let seg = self.list.get(id);
                (seg.start(), seg.end())
            };
            let (hole, _) = self.list.splice(id, id, vec![Segment::empty(start, end)])?;
            self.list.consolidate(hole)?;
            self.filled -= end - start;
            trace!(start, end, filled = self.filled, "evicted segment");
        }

        self.read_cursor = self.locate(self.read_offset)?;
        self.write_cursor = self.locate(self.write_offset)?;
        Ok(())
    }

    fn locate(&self, offset: u64) -> CacheResult<SegId> {
        self.list
            .find(offset)
            .ok_or(CacheError::OutOfRange { offset })
    }

    fn tick(&mut self) -> u64 {
        let stamp = self.clock;
        self.clock += 1;
        stamp
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn seq(n: usize) -> Vec<u8> {
        #[expect(clippy::cast_possible_truncation)]
        (0..n).map(|i| i as u8).collect()
    }

    fn unbounded() -> Cache {
        Cache::new(1024, 0)
    }

    #[test]
    fn empty_cache_seek() {
        let mut cache = unbounded();
        cache.seek_read(1024).unwrap();
        assert_eq!(cache.read_offset(), 1024);
        assert_eq!(cache.bytes_readable(u64::MAX), 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn single_write() {
        let mut cache = unbounded();
        cache.write(&seq(256)).unwrap();
        assert_eq!(cache.write_offset(), 256);
        assert_eq!(cache.bytes_readable(u64::MAX), 256);
        assert_eq!(cache.ranges(), vec![0..256]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn three_writes_contiguous_read() {
        let mut cache = unbounded();
        cache.write(&seq(7)).unwrap();
        cache.write(&seq(5)).unwrap();
        cache.write(&seq(6)).unwrap();

        let mut buf = [0u8; 18];
        let n = cache.read_bytes(&mut buf);
        assert_eq!(n, 18);
        assert_eq!(
            buf,
            [0, 1, 2, 3, 4, 5, 6, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 5]
        );
        cache.check_invariants().unwrap();
    }

    #[test]
    fn sparse_write_leaves_hole() {
        let mut cache = unbounded();
        cache.seek_write(32).unwrap();
        cache.write(&seq(7)).unwrap();
        cache.write(&seq(5)).unwrap();
        cache.write(&seq(6)).unwrap();

        // The hole at 4 yields nothing.
        cache.seek_read(4).unwrap();
        let mut buf = [0u8; 14];
        assert_eq!(cache.read_bytes(&mut buf), 0);

        // Reading inside the filled region works.
        cache.seek_read(36).unwrap();
        let n = cache.read_bytes(&mut buf);
        assert_eq!(n, 14);
        assert_eq!(buf, [4, 5, 6, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 5]);
        assert_eq!(cache.ranges(), vec![32..50]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn out_of_order_writes_concatenate() {
        let mut cache = unbounded();
        let (a, b, c) = (seq(10), seq(20), seq(30));
        cache.seek_write(30).unwrap();
        cache.write(&c).unwrap();
        cache.seek_write(0).unwrap();
        cache.write(&a).unwrap();
        cache.seek_write(10).unwrap();
        cache.write(&b).unwrap();

        let mut expected = a;
        expected.extend_from_slice(&b);
        expected.extend_from_slice(&c);

        cache.seek_read(0).unwrap();
        let mut buf = vec![0u8; 60];
        assert_eq!(cache.read_bytes(&mut buf), 60);
        assert_eq!(buf, expected);
        assert_eq!(cache.ranges(), vec![0..60]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn write_over_filled_is_rejected() {
        let mut cache = unbounded();
        cache.write(&seq(16)).unwrap();
        cache.seek_write(8).unwrap();
        let err = cache.write(&seq(4)).unwrap_err();
        assert!(matches!(err, CacheError::NoSpace { offset: 8, .. }));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn write_overlapping_filled_tail_is_rejected() {
        let mut cache = unbounded();
        cache.seek_write(16).unwrap();
        cache.write(&seq(16)).unwrap();
        // [0,16) is a hole but the span would cross the filled segment.
        cache.seek_write(0).unwrap();
        let err = cache.write(&seq(20)).unwrap_err();
        assert!(matches!(err, CacheError::NoSpace { offset: 0, .. }));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn write_into_middle_of_hole_splits_both_sides() {
        let mut cache = unbounded();
        cache.seek_write(64).unwrap();
        cache.write(&seq(8)).unwrap();
        cache.seek_write(16).unwrap();
        cache.write(&seq(8)).unwrap();
        assert_eq!(cache.ranges(), vec![16..24, 64..72]);

        cache.seek_read(16).unwrap();
        assert_eq!(cache.bytes_readable(u64::MAX), 8);
        cache.check_invariants().unwrap();
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(18)]
    #[case(1 << 20)]
    fn bytes_readable_is_monotone_in_max(#[case] max: u64) {
        let mut cache = unbounded();
        cache.write(&seq(7)).unwrap();
        cache.write(&seq(5)).unwrap();
        cache.write(&seq(6)).unwrap();
        cache.seek_read(0).unwrap();
        assert_eq!(cache.bytes_readable(max), max.min(18));
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(100)]
    fn bytes_writable_on_terminator_returns_max(#[case] max: u64) {
        let cache = unbounded();
        assert_eq!(cache.bytes_writable(max), max);
    }

    #[test]
    fn bytes_writable_stops_at_filled() {
        let mut cache = unbounded();
        cache.seek_write(32).unwrap();
        cache.write(&seq(8)).unwrap();
        cache.seek_write(0).unwrap();
        assert_eq!(cache.bytes_writable(u64::MAX), 32);
        assert_eq!(cache.bytes_writable(10), 10);
    }

    #[test]
    fn read_write_round_trip_at_offset() {
        let mut cache = unbounded();
        let data = seq(100);
        cache.seek_write(1000).unwrap();
        cache.write(&data).unwrap();
        cache.seek_read(1000).unwrap();
        let mut buf = vec![0u8; 100];
        assert_eq!(cache.read_bytes(&mut buf), 100);
        assert_eq!(buf, data);
    }

    #[test]
    fn reads_advance_and_drain() {
        let mut cache = unbounded();
        cache.write(&seq(32)).unwrap();
        cache.seek_read(0).unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(cache.read_bytes(&mut buf), 10);
        assert_eq!(cache.read_offset(), 10);
        assert_eq!(cache.read_bytes(&mut buf), 10);
        assert_eq!(cache.read_bytes(&mut buf), 10);
        assert_eq!(cache.read_bytes(&mut buf), 2);
        assert_eq!(cache.read_offset(), 32);
        assert_eq!(cache.read_bytes(&mut buf), 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn gc_keeps_total_under_cap() {
        // Cap of 64 bytes, hot window of 16.
        let mut cache = Cache::new(16, 64);
        for i in 0..8u64 {
            cache.seek_write(i * 32).unwrap();
            cache.write(&seq(32)).unwrap();
        }
        assert!(cache.filled_bytes() <= 64);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn gc_protects_hot_window_and_fresh_write() {
        let mut cache = Cache::new(64, 64);
        cache.write(&seq(64)).unwrap();
        // Reader is at 0: [0,64) intersects the hot window [0,64].
        cache.seek_write(1024).unwrap();
        cache.write(&seq(64)).unwrap();

        // Over cap, but both segments are protected: the first by the hot
        // window, the second because it was just written.
        let ranges = cache.ranges();
        assert!(ranges.contains(&(0..64)));
        assert!(ranges.contains(&(1024..1088)));

        // A third far-away write pushes the second one out.
        cache.seek_write(4096).unwrap();
        cache.write(&seq(64)).unwrap();
        let ranges = cache.ranges();
        assert!(ranges.contains(&(0..64)));
        assert!(!ranges.contains(&(1024..1088)));
        assert!(ranges.contains(&(4096..4160)));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn gc_evicts_least_recently_read_first() {
        let mut cache = Cache::new(8, 96);
        for i in 0..3u64 {
            cache.seek_write(i * 32).unwrap();
            cache.write(&seq(32)).unwrap();
        }
        // Touch [0,32) so [32,64) becomes the oldest.
        cache.seek_read(0).unwrap();
        let mut buf = [0u8; 32];
        cache.read_bytes(&mut buf);
        // Park the reader far away so nothing is hot.
        cache.seek_read(1 << 20).unwrap();

        cache.seek_write(256).unwrap();
        cache.write(&seq(32)).unwrap();

        let ranges = cache.ranges();
        assert!(!ranges.contains(&(32..64)), "oldest segment should go first");
        cache.check_invariants().unwrap();
    }

    #[test]
    fn write_spans_hole_and_terminator_after_eviction() {
        let mut bounded = Cache::new(4, 16);
        bounded.write(&seq(16)).unwrap();
        bounded.seek_read(1 << 20).unwrap();
        bounded.seek_write(64).unwrap();
        bounded.write(&seq(16)).unwrap();
        // [0,16) was evicted, leaving a hole before [64,80).
        assert_eq!(bounded.ranges(), vec![64..80]);

        // A write spanning the hole boundary into the evicted range works.
        bounded.seek_write(0).unwrap();
        bounded.write(&seq(16)).unwrap();
        bounded.check_invariants().unwrap();
    }

    #[test]
    fn ranges_are_sorted_and_disjoint() {
        let mut cache = unbounded();
        for offset in [128u64, 0, 512, 64] {
            cache.seek_write(offset).unwrap();
            cache.write(&seq(16)).unwrap();
        }
        let ranges = cache.ranges();
        for pair in ranges.windows(2) {
            assert!(pair[0].end < pair[1].start || pair[0].end == pair[1].start);
            assert!(pair[0].start < pair[1].start);
        }
        let total: u64 = ranges.iter().map(|r| r.end - r.start).sum();
        assert_eq!(total, cache.filled_bytes());
    }

    #[test]
    fn seek_read_past_data_lands_in_terminator() {
        let mut cache = unbounded();
        cache.write(&seq(8)).unwrap();
        cache.seek_read(100).unwrap();
        assert_eq!(cache.read_offset(), 100);
        assert_eq!(cache.bytes_readable(u64::MAX), 0);
        // Coming back still finds the data.
        cache.seek_read(0).unwrap();
        assert_eq!(cache.bytes_readable(u64::MAX), 8);
    }

    #[test]
    fn invariants_hold_across_mixed_sequences() {
        let mut cache = Cache::new(32, 128);
        let script: &[(u64, usize)] = &[
            (0, 40),
            (100, 10),
            (40, 20),
            (300, 64),
            (60, 40),
            (200, 50),
            (110, 30),
        ];
        for &(offset, len) in script {
            cache.seek_write(offset).unwrap();
            cache.write(&seq(len)).unwrap();
            cache.check_invariants().unwrap();
        }
        cache.seek_read(0).unwrap();
        let mut buf = vec![0u8; 256];
        cache.read_bytes(&mut buf);
        cache.check_invariants().unwrap();
    }
}
