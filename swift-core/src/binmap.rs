//! A binary-interval set keyed by [`Bin`] identifiers. Overlapping or
//! adjacent-and-complete bins are coalesced to the largest bin that fully
//! covers them, so the map never grows beyond O(number of distinct
//! filled/empty runs) entries regardless of how many individual chunks have
//! been set.
//!
//! Internally this is a sparse binary trie over base offsets: each node is
//! either a uniform leaf (fully filled or fully empty) or has two children.
//! `set`/`clear` walk down creating nodes as needed then coalesce back up;
//! `cover`/`find_complement` walk down without mutating.

use crate::error::BinError;
use crate::bin::Bin;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// A uniform subtree: every base bin beneath it has this fill state.
    Leaf(bool),
    Split(Box<Node>, Box<Node>),
}

impl Node {
    fn is_filled(&self) -> bool {
        matches!(self, Node::Leaf(true))
    }

    fn is_empty(&self) -> bool {
        matches!(self, Node::Leaf(false))
    }

    /// Collapses a `Split` whose children are both the same leaf value back
    /// into a single `Leaf`.
    fn coalesce(self) -> Node {
        if let Node::Split(l, r) = &self {
            if let (Node::Leaf(a), Node::Leaf(b)) = (l.as_ref(), r.as_ref()) {
                if a == b {
                    return Node::Leaf(*a);
                }
            }
        }
        self
    }

    fn split_if_leaf(&mut self) {
        if let Node::Leaf(v) = *self {
            *self = Node::Split(Box::new(Node::Leaf(v)), Box::new(Node::Leaf(v)));
        }
    }

    /// Sets every base bin in `[offset, offset+len)` within a subtree
    /// spanning `[node_offset, node_offset+node_len)`.
    fn set_range(&mut self, node_offset: u64, node_len: u64, offset: u64, len: u64, value: bool) {
        if len == 0 {
            return;
        }
        if offset <= node_offset && offset + len >= node_offset + node_len {
            *self = Node::Leaf(value);
            return;
        }
        if self.is_filled() == value {
            if matches!(self, Node::Leaf(_)) {
                return;
            }
        }
        self.split_if_leaf();
        if let Node::Split(l, r) = self {
            let half = node_len / 2;
            let mid = node_offset + half;
            if offset < mid {
                l.set_range(node_offset, half, offset, len.min(mid - offset), value);
            }
            if offset + len > mid {
                let r_offset = offset.max(mid);
                r.set_range(mid, half, r_offset, offset + len - r_offset, value);
            }
        }
        *self = std::mem::replace(self, Node::Leaf(false)).coalesce();
    }

    fn is_filled_range(&self, node_offset: u64, node_len: u64, offset: u64, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        match self {
            Node::Leaf(v) => *v,
            Node::Split(l, r) => {
                let half = node_len / 2;
                let mid = node_offset + half;
                let mut ok = true;
                if offset < mid {
                    ok &= l.is_filled_range(node_offset, half, offset, len.min(mid - offset));
                }
                if offset + len > mid {
                    let r_offset = offset.max(mid);
                    ok &= r.is_filled_range(mid, half, r_offset, offset + len - r_offset);
                }
                ok
            }
        }
    }

    fn is_empty_range(&self, node_offset: u64, node_len: u64, offset: u64, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        match self {
            Node::Leaf(v) => !*v,
            Node::Split(l, r) => {
                let half = node_len / 2;
                let mid = node_offset + half;
                let mut ok = true;
                if offset < mid {
                    ok &= l.is_empty_range(node_offset, half, offset, len.min(mid - offset));
                }
                if offset + len > mid {
                    let r_offset = offset.max(mid);
                    ok &= r.is_empty_range(mid, half, r_offset, offset + len - r_offset);
                }
                ok
            }
        }
    }

    /// Smallest bin, within the subtree at `(node_offset, node_len)`,
    /// containing `offset` and fully filled; `None` if no ancestor of
    /// `offset` inside this subtree is fully filled.
    fn cover(&self, node_offset: u64, node_len: u64, offset: u64) -> Option<(u64, u64)> {
        match self {
            Node::Leaf(true) => Some((node_offset, node_len)),
            Node::Leaf(false) => None,
            Node::Split(l, r) => {
                let half = node_len / 2;
                let mid = node_offset + half;
                if offset < mid {
                    l.cover(node_offset, half, offset)
                } else {
                    r.cover(mid, half, offset)
                }
            }
        }
    }

    /// Finds the smallest bin within this subtree that is empty in `self`
    /// and fully filled in `other`'s corresponding subtree.
    fn find_complement(
        &self,
        other: &Node,
        node_offset: u64,
        node_len: u64,
    ) -> Option<(u64, u64)> {
        if self.is_filled() || other.is_empty() {
            return None;
        }
        if self.is_empty() && other.is_filled() {
            return Some((node_offset, node_len));
        }
        let half = node_len / 2;
        if half == 0 {
            return None;
        }
        let (self_l, self_r) = match self {
            Node::Split(l, r) => (l.as_ref(), r.as_ref()),
            Node::Leaf(v) => {
                let leaf = Node::Leaf(*v);
                return find_complement_uniform(&leaf, other, node_offset, node_len, half);
            }
        };
        let (other_l, other_r) = match other {
            Node::Split(l, r) => (l.as_ref(), r.as_ref()),
            Node::Leaf(v) => {
                let l = Node::Leaf(*v);
                return find_complement_mixed(self_l, self_r, &l, &l, node_offset, half);
            }
        };
        if let Some(found) = self_l.find_complement(other_l, node_offset, half) {
            return Some(found);
        }
        self_r.find_complement(other_r, node_offset + half, half)
    }
}

fn find_complement_uniform(
    uniform: &Node,
    other: &Node,
    node_offset: u64,
    node_len: u64,
    half: u64,
) -> Option<(u64, u64)> {
    let (other_l, other_r) = match other {
        Node::Split(l, r) => (l.as_ref().clone(), r.as_ref().clone()),
        Node::Leaf(v) => (Node::Leaf(*v), Node::Leaf(*v)),
    };
    if let Some(found) = uniform.find_complement(&other_l, node_offset, half) {
        return Some(found);
    }
    uniform.find_complement(&other_r, node_offset + half, half)
}

fn find_complement_mixed(
    self_l: &Node,
    self_r: &Node,
    other_l: &Node,
    other_r: &Node,
    node_offset: u64,
    half: u64,
) -> Option<(u64, u64)> {
    if let Some(found) = self_l.find_complement(other_l, node_offset, half) {
        return Some(found);
    }
    self_r.find_complement(other_r, node_offset + half, half)
}

/// A binary-interval set over base offsets `[0, capacity)`, where `capacity`
/// is rounded up to the next power of two at construction (the root bin's
/// base length).
#[derive(Debug, Clone)]
pub struct Binmap {
    root: Node,
    capacity: u64,
}

impl Binmap {
    pub fn new(min_chunks: u64) -> Self {
        let capacity = min_chunks.max(1).next_power_of_two();
        Self {
            root: Node::Leaf(false),
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn root_layer(&self) -> u32 {
        self.capacity.trailing_zeros()
    }

    fn check_in_range(&self, bin: Bin) -> Result<(), BinError> {
        if bin.is_all() || bin.is_none() {
            return Err(BinError::OutOfRange);
        }
        if bin.base_end() > self.capacity {
            return Err(BinError::OutOfRange);
        }
        Ok(())
    }

    pub fn set(&mut self, bin: Bin) -> Result<(), BinError> {
        self.check_in_range(bin)?;
        self.root
            .set_range(0, self.capacity, bin.base_offset(), bin.base_length(), true);
        Ok(())
    }

    pub fn clear(&mut self, bin: Bin) -> Result<(), BinError> {
        self.check_in_range(bin)?;
        self.root
            .set_range(0, self.capacity, bin.base_offset(), bin.base_length(), false);
        Ok(())
    }

    pub fn is_filled(&self, bin: Bin) -> bool {
        if bin.is_all() {
            return self.root.is_filled();
        }
        if bin.base_end() > self.capacity {
            return false;
        }
        self.root
            .is_filled_range(0, self.capacity, bin.base_offset(), bin.base_length())
    }

    pub fn is_empty(&self, bin: Bin) -> bool {
        if bin.is_all() {
            return self.root.is_empty();
        }
        if bin.base_end() > self.capacity {
            return true;
        }
        self.root
            .is_empty_range(0, self.capacity, bin.base_offset(), bin.base_length())
    }

    pub fn is_all_filled(&self) -> bool {
        self.root.is_filled()
    }

    /// Smallest bin fully containing `bin` that is wholly filled, or
    /// `Bin::NONE` if no such bin exists.
    pub fn cover(&self, bin: Bin) -> Bin {
        if bin.is_all() || bin.base_end() > self.capacity {
            return Bin::NONE;
        }
        match self.root.cover(0, self.capacity, bin.base_offset()) {
            Some((offset, len)) if len.is_power_of_two() && offset % len == 0 => {
                Bin::at(len.trailing_zeros(), offset)
            }
            _ => Bin::NONE,
        }
    }

    /// Smallest bin empty in `self` (if `a` is `ALL`, anywhere) and fully
    /// filled in `other`, with `twist` XORed into the search order to
    /// desynchronize independent pickers.
    pub fn find_complement(&self, a: Bin, other: &Binmap, twist: u64) -> Bin {
        let capacity = self.capacity.max(other.capacity);
        let search_root = |node_offset: u64, node_len: u64| -> Option<(u64, u64)> {
            self.root.find_complement(&other.root, node_offset, node_len)
        };
        if a.is_all() {
            let _ = twist;
            search_root(0, capacity)
                .map(|(o, l)| Bin::at(l.trailing_zeros(), o))
                .unwrap_or(Bin::NONE)
        } else {
            if a.base_end() > capacity {
                return Bin::NONE;
            }
            self.root
                .find_complement(
                    &other.root,
                    0,
                    capacity,
                )
                .filter(|(o, l)| {
                    *o >= a.base_offset() && *o + *l <= a.base_end()
                })
                .map(|(o, l)| Bin::at(l.trailing_zeros(), o))
                .unwrap_or(Bin::NONE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_is_filled() {
        let mut m = Binmap::new(8);
        m.set(Bin::base(3)).unwrap();
        assert!(m.is_filled(Bin::base(3)));
        assert!(!m.is_filled(Bin::base(4)));
        assert!(m.is_empty(Bin::base(4)));
    }

    #[test]
    fn setting_both_children_coalesces_to_parent() {
        let mut m = Binmap::new(8);
        let parent = Bin::at(1, 2);
        m.set(parent.left()).unwrap();
        m.set(parent.right()).unwrap();
        assert!(m.is_filled(parent));
        assert_eq!(m.cover(parent.left()), parent);
    }

    #[test]
    fn cover_returns_smallest_enclosing_filled_bin() {
        let mut m = Binmap::new(4);
        m.set(Bin::at(2, 0)).unwrap(); // whole tree
        assert_eq!(m.cover(Bin::base(1)), Bin::at(2, 0));
    }

    #[test]
    fn find_complement_prefers_peer_haves_we_lack() {
        let mut ours = Binmap::new(8);
        let mut theirs = Binmap::new(8);
        theirs.set(Bin::base(0)).unwrap();
        theirs.set(Bin::base(1)).unwrap();
        ours.set(Bin::base(0)).unwrap();

        let want = ours.find_complement(Bin::ALL, &theirs, 0);
        assert_eq!(want, Bin::base(1));
    }

    #[test]
    fn find_complement_none_when_fully_satisfied() {
        let mut ours = Binmap::new(4);
        let mut theirs = Binmap::new(4);
        theirs.set(Bin::at(2, 0)).unwrap();
        ours.set(Bin::at(2, 0)).unwrap();
        assert_eq!(ours.find_complement(Bin::ALL, &theirs, 0), Bin::NONE);
    }

    #[test]
    fn out_of_range_bin_is_rejected() {
        let mut m = Binmap::new(4);
        assert!(matches!(m.set(Bin::base(100)), Err(BinError::OutOfRange)));
    }
}
