//! The datagram wire format: a message tag byte followed by a tag-specific
//! body, repeated until the datagram is exhausted. A
//! single datagram bundles one or more messages — typically a HANDSHAKE or
//! DATA plus piggy-backed ACK/HAVE — to amortize UDP/IP overhead.

use crate::bin::Bin;
use crate::error::WireError;
use swift_proto::{ChunkAddrFormat, PeerId, SwarmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Handshake = 0x00,
    Data = 0x01,
    Ack = 0x02,
    Have = 0x03,
    Integrity = 0x04,
    PexResv4 = 0x05,
    PexReq = 0x06,
    SignedIntegrity = 0x07,
    Request = 0x08,
    Cancel = 0x09,
    Choke = 0x0a,
    Unchoke = 0x0b,
    Randomize = 0x0c,
    PexResv6 = 0x0d,
}

impl Tag {
    pub fn from_u8(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            0x00 => Tag::Handshake,
            0x01 => Tag::Data,
            0x02 => Tag::Ack,
            0x03 => Tag::Have,
            0x04 => Tag::Integrity,
            0x05 => Tag::PexResv4,
            0x06 => Tag::PexReq,
            0x07 => Tag::SignedIntegrity,
            0x08 => Tag::Request,
            0x09 => Tag::Cancel,
            0x0a => Tag::Choke,
            0x0b => Tag::Unchoke,
            0x0c => Tag::Randomize,
            0x0d => Tag::PexResv6,
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

/// A handshake TLV option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOption {
    Version(u8),
    ChunkAddrScheme(ChunkAddrFormat),
    ContentIntegrityScheme(u8),
    MerkleHashFunc(u8),
    LiveSignatureAlgorithm(u8),
    LiveDiscardWindow(u32),
    SupportedMessages(Vec<u8>),
    ChunkSize(u32),
    SwarmId(SwarmId),
}

/// One bundled protocol message. `Bin`s carry a raw `u64`; which wire width
/// that occupies is decided by the channel's negotiated
/// [`ChunkAddrFormat`], not encoded redundantly per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake {
        channel_id: u32,
        peer_id: Option<PeerId>,
        options: Vec<HandshakeOptionWire>,
    },
    Data {
        bin: Bin,
        timestamp_micros: u64,
        payload: Vec<u8>,
    },
    Ack {
        bin: Bin,
        one_way_delay_micros: u32,
    },
    Have {
        bin: Bin,
    },
    Integrity {
        bin: Bin,
        hash: Vec<u8>,
    },
    SignedIntegrity {
        bin: Bin,
        timestamp_micros: u64,
        signature: Vec<u8>,
    },
    Request {
        bin: Bin,
    },
    Cancel {
        bin: Bin,
    },
    Choke,
    Unchoke,
    PexReq,
    PexResV4 {
        addr: std::net::SocketAddrV4,
    },
    PexResV6 {
        addr: std::net::SocketAddrV6,
    },
    /// Keep-alive filler sent when a channel would otherwise be idle long
    /// enough to be mistaken for dead.
    Randomize {
        nonce: u32,
    },
}

/// A handshake option in its wire-ready (already-tagged) shape, kept
/// separate from [`HandshakeOption`] so `encode`/`decode` stay simple
/// length-prefixed TLV walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOptionWire {
    pub kind: u8,
    pub value: Vec<u8>,
}

impl From<&HandshakeOption> for HandshakeOptionWire {
    fn from(opt: &HandshakeOption) -> Self {
        match opt {
            HandshakeOption::Version(v) => HandshakeOptionWire { kind: 0, value: vec![*v] },
            HandshakeOption::ChunkAddrScheme(f) => HandshakeOptionWire {
                kind: 1,
                value: vec![*f as u8],
            },
            HandshakeOption::ContentIntegrityScheme(v) => HandshakeOptionWire { kind: 2, value: vec![*v] },
            HandshakeOption::MerkleHashFunc(v) => HandshakeOptionWire { kind: 3, value: vec![*v] },
            HandshakeOption::LiveSignatureAlgorithm(v) => HandshakeOptionWire { kind: 4, value: vec![*v] },
            HandshakeOption::LiveDiscardWindow(v) => HandshakeOptionWire {
                kind: 5,
                value: v.to_be_bytes().to_vec(),
            },
            HandshakeOption::SupportedMessages(v) => HandshakeOptionWire { kind: 6, value: v.clone() },
            HandshakeOption::ChunkSize(v) => HandshakeOptionWire {
                kind: 7,
                value: v.to_be_bytes().to_vec(),
            },
            HandshakeOption::SwarmId(id) => HandshakeOptionWire {
                kind: 8,
                value: id.as_bytes().to_vec(),
            },
        }
    }
}

fn addr_bytes(bin: Bin, format: ChunkAddrFormat) -> Vec<u8> {
    match format.addr_width() {
        4 => (bin.raw() as u32).to_be_bytes().to_vec(),
        _ => bin.raw().to_be_bytes().to_vec(),
    }
}

fn read_addr(buf: &[u8], pos: &mut usize, format: ChunkAddrFormat) -> Result<Bin, WireError> {
    let width = format.addr_width();
    if *pos + width > buf.len() {
        return Err(WireError::TruncatedBody);
    }
    let raw = match width {
        4 => u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as u64,
        _ => u64::from_be_bytes(buf[*pos..*pos + 8].try_into().unwrap()),
    };
    *pos += width;
    Ok(Bin::new(raw))
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, WireError> {
    let b = *buf.get(*pos).ok_or(WireError::TruncatedBody)?;
    *pos += 1;
    Ok(b)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, WireError> {
    if *pos + 4 > buf.len() {
        return Err(WireError::TruncatedBody);
    }
    let v = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64, WireError> {
    if *pos + 8 > buf.len() {
        return Err(WireError::TruncatedBody);
    }
    let v = u64::from_be_bytes(buf[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}

fn read_bytes(buf: &[u8], pos: &mut usize, len: usize) -> Result<Vec<u8>, WireError> {
    if *pos + len > buf.len() {
        return Err(WireError::TruncatedBody);
    }
    let v = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(v)
}

impl Message {
    pub fn encode(&self, out: &mut Vec<u8>, format: ChunkAddrFormat) {
        match self {
            Message::Handshake {
                channel_id,
                peer_id,
                options,
            } => {
                out.push(Tag::Handshake as u8);
                out.extend_from_slice(&channel_id.to_be_bytes());
                out.push(if peer_id.is_some() { 1 } else { 0 });
                if let Some(id) = peer_id {
                    out.extend_from_slice(id.as_bytes());
                }
                out.push(options.len() as u8);
                for opt in options {
                    out.push(opt.kind);
                    out.push(opt.value.len() as u8);
                    out.extend_from_slice(&opt.value);
                }
            }
            Message::Data {
                bin,
                timestamp_micros,
                payload,
            } => {
                out.push(Tag::Data as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
                out.extend_from_slice(&timestamp_micros.to_be_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(payload);
            }
            Message::Ack {
                bin,
                one_way_delay_micros,
            } => {
                out.push(Tag::Ack as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
                out.extend_from_slice(&one_way_delay_micros.to_be_bytes());
            }
            Message::Have { bin } => {
                out.push(Tag::Have as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
            }
            Message::Integrity { bin, hash } => {
                out.push(Tag::Integrity as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
                out.push(hash.len() as u8);
                out.extend_from_slice(hash);
            }
            Message::SignedIntegrity {
                bin,
                timestamp_micros,
                signature,
            } => {
                out.push(Tag::SignedIntegrity as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
                out.extend_from_slice(&timestamp_micros.to_be_bytes());
                out.push(signature.len() as u8);
                out.extend_from_slice(signature);
            }
            Message::Request { bin } => {
                out.push(Tag::Request as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
            }
            Message::Cancel { bin } => {
                out.push(Tag::Cancel as u8);
                out.extend_from_slice(&addr_bytes(*bin, format));
            }
            Message::Choke => out.push(Tag::Choke as u8),
            Message::Unchoke => out.push(Tag::Unchoke as u8),
            Message::PexReq => out.push(Tag::PexReq as u8),
            Message::PexResV4 { addr } => {
                out.push(Tag::PexResv4 as u8);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            Message::PexResV6 { addr } => {
                out.push(Tag::PexResv6 as u8);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            Message::Randomize { nonce } => {
                out.push(Tag::Randomize as u8);
                out.extend_from_slice(&nonce.to_be_bytes());
            }
        }
    }

    pub fn decode(buf: &[u8], pos: &mut usize, format: ChunkAddrFormat) -> Result<Self, WireError> {
        let tag = Tag::from_u8(read_u8(buf, pos)?)?;
        Ok(match tag {
            Tag::Handshake => {
                let channel_id = read_u32(buf, pos)?;
                let has_peer_id = read_u8(buf, pos)? != 0;
                let peer_id = if has_peer_id {
                    let bytes = read_bytes(buf, pos, 32)?;
                    Some(PeerId::from_slice(&bytes).map_err(|_| WireError::TruncatedBody)?)
                } else {
                    None
                };
                let n_opts = read_u8(buf, pos)?;
                let mut options = Vec::with_capacity(n_opts as usize);
                for _ in 0..n_opts {
                    let kind = read_u8(buf, pos)?;
                    let len = read_u8(buf, pos)? as usize;
                    let value = read_bytes(buf, pos, len)?;
                    options.push(HandshakeOptionWire { kind, value });
                }
                Message::Handshake {
                    channel_id,
                    peer_id,
                    options,
                }
            }
            Tag::Data => {
                let bin = read_addr(buf, pos, format)?;
                let timestamp_micros = read_u64(buf, pos)?;
                let len = read_u32(buf, pos)? as usize;
                let payload = read_bytes(buf, pos, len)?;
                Message::Data {
                    bin,
                    timestamp_micros,
                    payload,
                }
            }
            Tag::Ack => {
                let bin = read_addr(buf, pos, format)?;
                let one_way_delay_micros = read_u32(buf, pos)?;
                Message::Ack {
                    bin,
                    one_way_delay_micros,
                }
            }
            Tag::Have => Message::Have {
                bin: read_addr(buf, pos, format)?,
            },
            Tag::Integrity => {
                let bin = read_addr(buf, pos, format)?;
                let len = read_u8(buf, pos)? as usize;
                let hash = read_bytes(buf, pos, len)?;
                Message::Integrity { bin, hash }
            }
            Tag::SignedIntegrity => {
                let bin = read_addr(buf, pos, format)?;
                let timestamp_micros = read_u64(buf, pos)?;
                let len = read_u8(buf, pos)? as usize;
                let signature = read_bytes(buf, pos, len)?;
                Message::SignedIntegrity {
                    bin,
                    timestamp_micros,
                    signature,
                }
            }
            Tag::Request => Message::Request {
                bin: read_addr(buf, pos, format)?,
            },
            Tag::Cancel => Message::Cancel {
                bin: read_addr(buf, pos, format)?,
            },
            Tag::Choke => Message::Choke,
            Tag::Unchoke => Message::Unchoke,
            Tag::PexReq => Message::PexReq,
            Tag::PexResv4 => {
                let octets = read_bytes(buf, pos, 4)?;
                let port = u16::from_be_bytes(read_bytes(buf, pos, 2)?.try_into().unwrap());
                let ip = std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
                Message::PexResV4 {
                    addr: std::net::SocketAddrV4::new(ip, port),
                }
            }
            Tag::Randomize => Message::Randomize {
                nonce: read_u32(buf, pos)?,
            },
            Tag::PexResv6 => {
                let octets = read_bytes(buf, pos, 16)?;
                let port = u16::from_be_bytes(read_bytes(buf, pos, 2)?.try_into().unwrap());
                let segments: [u8; 16] = octets.try_into().unwrap();
                let ip = std::net::Ipv6Addr::from(segments);
                Message::PexResV6 {
                    addr: std::net::SocketAddrV6::new(ip, port, 0, 0),
                }
            }
        })
    }
}

/// Encodes a full datagram: every message in `messages` back to back.
pub fn encode_datagram(messages: &[Message], format: ChunkAddrFormat) -> Vec<u8> {
    let mut out = Vec::new();
    for m in messages {
        m.encode(&mut out, format);
    }
    out
}

/// Decodes every message in a received datagram.
pub fn decode_datagram(buf: &[u8], format: ChunkAddrFormat) -> Result<Vec<Message>, WireError> {
    let mut pos = 0;
    let mut messages = Vec::new();
    while pos < buf.len() {
        messages.push(Message::decode(buf, &mut pos, format)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_round_trips() {
        let msg = Message::Data {
            bin: Bin::base(5),
            timestamp_micros: 1234,
            payload: vec![1, 2, 3, 4],
        };
        let bytes = encode_datagram(&[msg.clone()], ChunkAddrFormat::Bin64);
        let decoded = decode_datagram(&bytes, ChunkAddrFormat::Bin64).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn bundled_datagram_round_trips_multiple_messages() {
        let msgs = vec![
            Message::Have { bin: Bin::base(0) },
            Message::Ack {
                bin: Bin::base(0),
                one_way_delay_micros: 500,
            },
            Message::Unchoke,
        ];
        let bytes = encode_datagram(&msgs, ChunkAddrFormat::Bin32);
        let decoded = decode_datagram(&bytes, ChunkAddrFormat::Bin32).unwrap();
        assert_eq!(decoded, msgs);
    }

    #[test]
    fn pex_res_v6_round_trips() {
        let msg = Message::PexResV6 {
            addr: std::net::SocketAddrV6::new(std::net::Ipv6Addr::LOCALHOST, 9000, 0, 0),
        };
        let bytes = encode_datagram(&[msg.clone()], ChunkAddrFormat::Bin32);
        let decoded = decode_datagram(&bytes, ChunkAddrFormat::Bin32).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = vec![0xffu8];
        let err = decode_datagram(&bytes, ChunkAddrFormat::Bin32).unwrap_err();
        assert!(matches!(err, WireError::UnknownTag(0xff)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let bytes = vec![Tag::Have as u8, 0, 0];
        let err = decode_datagram(&bytes, ChunkAddrFormat::Bin32).unwrap_err();
        assert!(matches!(err, WireError::TruncatedBody));
    }
}
