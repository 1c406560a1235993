//! Handshake negotiation: each side proposes its supported options, the
//! channel adopts the intersection, and duplicate connections between the
//! same two endpoints are resolved deterministically so both sides agree on
//! which one survives.

use super::wire::{HandshakeOption, HandshakeOptionWire};
use crate::error::ChannelError;
use std::net::SocketAddr;
use swift_proto::{ChunkAddrFormat, PeerId, SwarmId};

#[derive(Debug, Clone)]
pub struct HandshakeParams {
    pub version: u8,
    pub addr_format: ChunkAddrFormat,
    pub chunk_size: u32,
    pub swarm_id: SwarmId,
    pub live_discard_window: Option<u32>,
}

impl HandshakeParams {
    pub fn to_options(&self) -> Vec<HandshakeOptionWire> {
        let mut opts = vec![
            HandshakeOptionWire::from(&HandshakeOption::Version(self.version)),
            HandshakeOptionWire::from(&HandshakeOption::ChunkAddrScheme(self.addr_format)),
            HandshakeOptionWire::from(&HandshakeOption::ChunkSize(self.chunk_size)),
            HandshakeOptionWire::from(&HandshakeOption::SwarmId(self.swarm_id)),
        ];
        if let Some(window) = self.live_discard_window {
            opts.push(HandshakeOptionWire::from(&HandshakeOption::LiveDiscardWindow(window)));
        }
        opts
    }

    pub fn from_options(options: &[HandshakeOptionWire]) -> Result<Self, ChannelError> {
        let mut version = None;
        let mut addr_format = None;
        let mut chunk_size = None;
        let mut swarm_id = None;
        let mut live_discard_window = None;
        for opt in options {
            match opt.kind {
                0 => version = opt.value.first().copied(),
                1 => {
                    addr_format = opt.value.first().and_then(|b| match b {
                        0 => Some(ChunkAddrFormat::Bin32),
                        1 => Some(ChunkAddrFormat::Bin64),
                        2 => Some(ChunkAddrFormat::Chunk32),
                        3 => Some(ChunkAddrFormat::Chunk64),
                        4 => Some(ChunkAddrFormat::Byte64),
                        _ => None,
                    })
                }
                7 => {
                    if opt.value.len() == 4 {
                        chunk_size = Some(u32::from_be_bytes(opt.value[..4].try_into().unwrap()));
                    }
                }
                8 => {
                    if let Ok(id) = SwarmId::from_slice(&opt.value) {
                        swarm_id = Some(id);
                    }
                }
                5 => {
                    if opt.value.len() == 4 {
                        live_discard_window =
                            Some(u32::from_be_bytes(opt.value[..4].try_into().unwrap()));
                    }
                }
                _ => {}
            }
        }
        Ok(HandshakeParams {
            version: version.ok_or(ChannelError::HandshakeIncomplete("VERSION"))?,
            addr_format: addr_format.ok_or(ChannelError::HandshakeIncomplete("CHUNK_ADDR_SCHEME"))?,
            chunk_size: chunk_size.ok_or(ChannelError::HandshakeIncomplete("CHUNK_SIZE"))?,
            swarm_id: swarm_id.ok_or(ChannelError::HandshakeIncomplete("SWARM_ID"))?,
            live_discard_window,
        })
    }
}

/// Which of two racing handshakes (our outbound one vs. an inbound one
/// discovered to be for the same (local, remote) pair) should survive.
/// libswift's own rule: the side with the numerically larger endpoint
/// address closes its own duplicate and keeps the peer's.
pub fn resolve_duplicate(local: SocketAddr, remote: SocketAddr) -> DuplicateResolution {
    if addr_key(local) > addr_key(remote) {
        DuplicateResolution::CloseOurs
    } else {
        DuplicateResolution::CloseTheirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateResolution {
    CloseOurs,
    CloseTheirs,
}

fn addr_key(addr: SocketAddr) -> (u8, Vec<u8>, u16) {
    match addr {
        SocketAddr::V4(v4) => (4, v4.ip().octets().to_vec(), v4.port()),
        SocketAddr::V6(v6) => (6, v6.ip().octets().to_vec(), v6.port()),
    }
}

/// Per-peer identity used only to recognize a duplicate connection attempt,
/// never as an authentication credential.
pub fn local_identity(local: SocketAddr) -> PeerId {
    let mut bytes = [0u8; 32];
    let key = addr_key(local);
    bytes[0] = key.0;
    let n = key.1.len().min(16);
    bytes[1..1 + n].copy_from_slice(&key.1[..n]);
    bytes[17..19].copy_from_slice(&key.2.to_be_bytes());
    PeerId(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingPeer,
    Established,
    Failed,
}

/// Drives one channel's handshake retry count against
/// `handshake_max_retries`.
#[derive(Debug, Clone)]
pub struct HandshakeRetries {
    attempts: u32,
    max_retries: u32,
}

impl HandshakeRetries {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn exhausted(&self) -> bool {
        self.attempts > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip_through_options() {
        let params = HandshakeParams {
            version: 1,
            addr_format: ChunkAddrFormat::Chunk32,
            chunk_size: 1024,
            swarm_id: SwarmId([3u8; 32]),
            live_discard_window: Some(600),
        };
        let opts = params.to_options();
        let back = HandshakeParams::from_options(&opts).unwrap();
        assert_eq!(back.version, 1);
        assert_eq!(back.chunk_size, 1024);
        assert_eq!(back.swarm_id, params.swarm_id);
        assert_eq!(back.live_discard_window, Some(600));
    }

    #[test]
    fn duplicate_resolution_is_symmetric() {
        let a: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1000".parse().unwrap();
        assert_eq!(resolve_duplicate(a, b), DuplicateResolution::CloseTheirs);
        assert_eq!(resolve_duplicate(b, a), DuplicateResolution::CloseOurs);
    }

    #[test]
    fn retries_exhaust_after_max() {
        let mut retries = HandshakeRetries::new(3);
        for _ in 0..3 {
            assert!(!retries.exhausted());
            retries.record_attempt();
        }
        assert!(!retries.exhausted());
        retries.record_attempt();
        assert!(retries.exhausted());
    }
}
