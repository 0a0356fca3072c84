#![forbid(unsafe_code)]

//! Arena-backed ordered segment list.
//!
//! Segments form a doubly linked chain kept in an arena and addressed by
//! stable [`SegId`] indices, with `Option<SegId>` links instead of shared
//! node references. Splice, split and consolidate are index manipulations;
//! relocating a cursor after a splice is a plain walk.
//!
//! Normative:
//! - The chain always starts at offset 0 and is contiguous (`prev.end ==
//!   next.start`).
//! - The last segment is always the `Eof` terminator.
//! - A freed slot may be reused by a later allocation, so callers must treat
//!   any `SegId` they held across a splice as invalid.

use crate::{
    error::{CacheError, CacheResult},
    segment::Segment,
};

/// Stable arena index of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegId(usize);

#[derive(Debug)]
struct Node {
    seg: Segment,
    prev: Option<SegId>,
    next: Option<SegId>,
}

#[derive(Debug)]
pub(crate) struct SegmentList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: SegId,
    tail: SegId,
}

impl SegmentList {
    /// A fresh list: a single `Eof` terminator at offset 0.
    pub(crate) fn new() -> Self {
        let nodes = vec![Some(Node {
            seg: Segment::eof(0),
            prev: None,
            next: None,
        })];
        Self {
            nodes,
            free: Vec::new(),
            head: SegId(0),
            tail: SegId(0),
        }
    }

    pub(crate) fn head(&self) -> SegId {
        self.head
    }

    pub(crate) fn tail(&self) -> SegId {
        self.tail
    }

    pub(crate) fn get(&self, id: SegId) -> &Segment {
        &self.node(id).seg
    }

    pub(crate) fn get_mut(&mut self, id: SegId) -> &mut Segment {
        &mut self.node_mut(id).seg
    }

    pub(crate) fn next(&self, id: SegId) -> Option<SegId> {
        self.node(id).next
    }

    pub(crate) fn prev(&self, id: SegId) -> Option<SegId> {
        self.node(id).prev
    }

    /// Locate the segment containing `offset`, walking from the head.
    ///
    /// Given the coverage and terminator invariants this cannot fail; `None`
    /// indicates a corrupted chain and is mapped to an invariant error by the
    /// caller.
    pub(crate) fn find(&self, offset: u64) -> Option<SegId> {
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            if self.get(id).contains(offset) {
                return Some(id);
            }
            cur = self.next(id);
        }
        None
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SegId, &Segment)> {
        let mut cur = Some(self.head);
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.next(id);
            Some((id, self.get(id)))
        })
    }

    /// Replace the inclusive chain `[old_head ..= old_tail]` with `segs`.
    ///
    /// Endpoints must line up: the replacement starts where the old head
    /// started and ends where the old tail ended. The one exception is an
    /// `Eof`-for-`Eof` swap, which may grow the covered range (this is how a
    /// write carves new space out of the terminator).
    ///
    /// Returns the ids of the first and last replacement segments. All ids
    /// pointing into the replaced chain are invalidated.
    pub(crate) fn splice(
        &mut self,
        old_head: SegId,
        old_tail: SegId,
        segs: Vec<Segment>,
    ) -> CacheResult<(SegId, SegId)> {
        let first = segs
            .first()
            .ok_or_else(|| CacheError::invariant("splice with empty replacement"))?;
        let last = segs
            .last()
            .ok_or_else(|| CacheError::invariant("splice with empty replacement"))?;

        if first.start() != self.get(old_head).start() {
            return Err(CacheError::invariant("splice head start mismatch"));
        }
        let old_end = self.get(old_tail).end();
        let eof_growth = self.get(old_tail).is_eof() && last.is_eof();
        if last.end() != old_end && !eof_growth {
            return Err(CacheError::invariant("splice tail end mismatch"));
        }

        let before = self.prev(old_head);
        let after = self.next(old_tail);

        // Free the old chain.
        let mut cur = Some(old_head);
        while let Some(id) = cur {
            cur = if id == old_tail { None } else { self.next(id) };
            self.dealloc(id);
        }

        // Allocate and link the replacement.
        let mut prev: Option<SegId> = before;
        let mut first_id = None;
        for seg in segs {
            let id = self.alloc(seg);
            self.node_mut(id).prev = prev;
            if let Some(p) = prev {
                self.node_mut(p).next = Some(id);
            }
            first_id.get_or_insert(id);
            prev = Some(id);
        }
        let last_id = prev.ok_or_else(|| CacheError::invariant("splice allocated nothing"))?;
        let first_id = first_id.ok_or_else(|| CacheError::invariant("splice allocated nothing"))?;

        self.node_mut(last_id).next = after;
        if let Some(a) = after {
            self.node_mut(a).prev = Some(last_id);
        } else {
            self.tail = last_id;
        }
        if before.is_none() {
            self.head = first_id;
        }

        Ok((first_id, last_id))
    }

    /// Split the segment at `offset`, returning the two halves.
    ///
    /// Valid only on `Empty`/`Eof`; the terminator stays on the right half.
    pub(crate) fn split(&mut self, id: SegId, offset: u64) -> CacheResult<(SegId, SegId)> {
        let seg = self.get(id).clone();
        if seg.is_filled() {
            return Err(CacheError::invariant("split of a filled segment"));
        }
        let (left, right) = seg.split(offset);
        self.splice(id, id, vec![left, right])
    }

    /// Merge the maximal run of adjacent holes around `id` into one hole.
    ///
    /// Stops at `Filled` segments and before the terminator. Returns the id
    /// of the surviving hole (or `id` itself when there was nothing to merge).
    pub(crate) fn consolidate(&mut self, id: SegId) -> CacheResult<SegId> {
        if !self.get(id).is_empty() {
            return Ok(id);
        }

        let mut first = id;
        while let Some(p) = self.prev(first) {
            if !self.get(p).is_empty() {
                break;
            }
            first = p;
        }
        let mut last = id;
        while let Some(n) = self.next(last) {
            if !self.get(n).is_empty() {
                break;
            }
            last = n;
        }
        if first == last {
            return Ok(id);
        }

        let start = self.get(first).start();
        let end = self.get(last).end();
        let (merged, _) = self.splice(first, last, vec![Segment::empty(start, end)])?;
        Ok(merged)
    }

    /// Structural self-check of the coverage/terminator/adjacency invariants.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let mut expected_start = 0u64;
        let mut prev_empty = false;
        let mut cur = Some(self.head);
        let mut last = self.head;

        while let Some(id) = cur {
            let seg = self.get(id);
            if seg.start() != expected_start {
                return Err(format!(
                    "gap: segment starts at {} expected {expected_start}",
                    seg.start()
                ));
            }
            if seg.is_filled() && seg.len() == 0 {
                return Err(format!("zero-length filled segment at {}", seg.start()));
            }
            if seg.is_empty() && prev_empty {
                return Err(format!("adjacent holes at {}", seg.start()));
            }
            if seg.is_eof() && self.next(id).is_some() {
                return Err("terminator is not the last segment".to_string());
            }
            prev_empty = seg.is_empty();
            expected_start = seg.end();
            last = id;
            cur = self.next(id);
        }

        if !self.get(last).is_eof() {
            return Err("list does not end in a terminator".to_string());
        }
        Ok(())
    }

    fn alloc(&mut self, seg: Segment) -> SegId {
        let node = Node {
            seg,
            prev: None,
            next: None,
        };
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            SegId(slot)
        } else {
            self.nodes.push(Some(node));
            SegId(self.nodes.len() - 1)
        }
    }

    fn dealloc(&mut self, id: SegId) {
        self.nodes[id.0] = None;
        self.free.push(id.0);
    }

    fn node(&self, id: SegId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale segment id")
    }

    fn node_mut(&mut self, id: SegId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale segment id")
    }
}
