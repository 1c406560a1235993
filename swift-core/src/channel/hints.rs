//! The request/hint pipeline: REQUEST asks a peer to eventually send a bin;
//! HINT additionally signals urgency/ordering so a peer serving many
//! channels knows which of several outstanding requests to prioritize.
//! CANCEL withdraws one, splitting a larger outstanding bin into its
//! children if only part of it is being cancelled. CHOKE/
//! UNCHOKE let a peer pause and resume service of a channel's hints
//! wholesale without discarding them.

use crate::bin::Bin;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choke {
    Unchoked,
    Choked,
}

/// Hints we've sent to a peer and are waiting on, in request order (so a
/// peer serving us honors roughly the order we asked).
#[derive(Debug, Default)]
pub struct OutgoingHints {
    queue: VecDeque<Bin>,
    max_outstanding: usize,
}

impl OutgoingHints {
    pub fn new(max_outstanding: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_outstanding,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.queue.len() < self.max_outstanding
    }

    pub fn push(&mut self, bin: Bin) {
        if !self.queue.contains(&bin) {
            self.queue.push_back(bin);
        }
    }

    /// Removes `bin` (exact match) from the outstanding set, e.g. once
    /// satisfied by a DATA message.
    pub fn fulfil(&mut self, bin: Bin) {
        self.queue.retain(|b| *b != bin);
    }

    /// Cancels `bin`; if it covers only part of an outstanding ancestor,
    /// the ancestor is replaced by its remaining children so the rest is
    /// still served.
    pub fn cancel(&mut self, bin: Bin) {
        let mut replacement = Vec::new();
        self.queue.retain(|outstanding| {
            if *outstanding == bin {
                return false;
            }
            if outstanding.contains(bin) {
                split_minus(*outstanding, bin, &mut replacement);
                return false;
            }
            true
        });
        for bin in replacement {
            self.push(bin);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Bin> + '_ {
        self.queue.iter().copied()
    }
}

/// Decomposes `whole` minus `removed` (a descendant of `whole`) into the
/// minimal set of bins covering what's left.
fn split_minus(whole: Bin, removed: Bin, out: &mut Vec<Bin>) {
    if whole == removed {
        return;
    }
    let (left, right) = (whole.left(), whole.right());
    if left.contains(removed) {
        if left == removed {
            out.push(right);
        } else {
            split_minus(left, removed, out);
            out.push(right);
        }
    } else if right == removed {
        out.push(left);
    } else {
        out.push(left);
        split_minus(right, removed, out);
    }
}

/// Hints a peer has sent us that we owe DATA for, most urgent first.
#[derive(Debug, Default)]
pub struct IncomingHints {
    queue: VecDeque<Bin>,
    choke: bool,
}

impl IncomingHints {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            choke: false,
        }
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choke = choked;
    }

    pub fn is_choked(&self) -> bool {
        self.choke
    }

    pub fn push(&mut self, bin: Bin) {
        if !self.queue.contains(&bin) {
            self.queue.push_back(bin);
        }
    }

    /// Withdraws `bin`: any outstanding entry contained by it is dropped
    /// outright, and any outstanding entry that contains it is split,
    /// keeping the remaining sub-bins so the un-cancelled part is still
    /// served.
    pub fn cancel(&mut self, bin: Bin) {
        let mut replacement = Vec::new();
        self.queue.retain(|outstanding| {
            if *outstanding == bin || bin.contains(*outstanding) {
                return false;
            }
            if outstanding.contains(bin) {
                split_minus(*outstanding, bin, &mut replacement);
                return false;
            }
            true
        });
        for bin in replacement {
            self.push(bin);
        }
    }

    /// Pops the next *base* bin to serve, or `None` if choked or empty.
    /// A non-base bin at the front is split: its right half is pushed back
    /// behind the left, which is consumed next, until a single chunk
    /// remains — so a multi-chunk REQUEST is served one DATA at a time
    /// without losing track of the rest of the range.
    pub fn pop_next(&mut self) -> Option<Bin> {
        if self.choke {
            return None;
        }
        loop {
            let front = *self.queue.front()?;
            if front.is_base() {
                return self.queue.pop_front();
            }
            self.queue.pop_front();
            self.queue.push_front(front.right());
            self.queue.push_front(front.left());
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfil_removes_exact_bin() {
        let mut hints = OutgoingHints::new(8);
        hints.push(Bin::base(2));
        hints.fulfil(Bin::base(2));
        assert!(hints.is_empty());
    }

    #[test]
    fn cancel_splits_outstanding_parent() {
        let mut hints = OutgoingHints::new(8);
        let parent = Bin::at(2, 0); // covers base 0..4
        hints.push(parent);
        hints.cancel(Bin::base(1));
        let remaining: Vec<Bin> = hints.iter().collect();
        // Remaining coverage should be base chunk 0, and base chunks 2..4.
        assert!(remaining.contains(&Bin::base(0)));
        assert!(remaining.contains(&Bin::at(1, 2)));
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn pop_next_splits_a_multi_chunk_hint_into_base_bins() {
        let mut hints = IncomingHints::new();
        hints.push(Bin::at(2, 0)); // covers base chunks 0..4
        let mut served = Vec::new();
        for _ in 0..4 {
            served.push(hints.pop_next().unwrap());
        }
        assert!(served.iter().all(|b| b.is_base()));
        assert_eq!(served, vec![Bin::base(0), Bin::base(1), Bin::base(2), Bin::base(3)]);
        assert!(hints.is_empty());
    }

    #[test]
    fn incoming_cancel_splits_an_unsplit_parent_hint() {
        // Leecher requested [0..7] as one hint; nothing has been popped
        // from it yet, so it's still a single unsplit entry.
        let mut hints = IncomingHints::new();
        hints.push(Bin::at(3, 0)); // covers base chunks 0..8
        hints.cancel(Bin::at(2, 1)); // cancel base chunks 4..7
        let remaining: Vec<Bin> = std::iter::from_fn(|| hints.pop_next()).collect();
        assert!(remaining.iter().all(|b| b.is_base()));
        assert_eq!(remaining, vec![Bin::base(0), Bin::base(1), Bin::base(2), Bin::base(3)]);
    }

    #[test]
    fn incoming_cancel_drops_a_contained_outstanding_entry() {
        let mut hints = IncomingHints::new();
        hints.push(Bin::base(5));
        hints.cancel(Bin::at(2, 1)); // covers base chunks 4..7, contains base(5)
        assert!(hints.is_empty());
    }

    #[test]
    fn choked_incoming_hints_yield_nothing() {
        let mut hints = IncomingHints::new();
        hints.push(Bin::base(0));
        hints.set_choked(true);
        assert_eq!(hints.pop_next(), None);
        hints.set_choked(false);
        assert_eq!(hints.pop_next(), Some(Bin::base(0)));
    }
}
