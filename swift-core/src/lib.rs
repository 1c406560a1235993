//! The channel state machine, hash tree, binmap, piece picker and
//! single-threaded dispatcher core of a libswift-style swarm transport.
//!
//! Layering, bottom-up: [`bin`]/[`binmap`] (tree addressing and coverage
//! sets), [`hashtree`] (Merkle verification over them), [`picker`] (what to
//! request next), [`storage`] (where verified chunks live), [`channel`] (one
//! peer conversation, assembled from handshake/reliability/hints/pex/
//! send-control), and finally [`transfer`]/[`runtime`] (many channels per
//! swarm, many swarms per process). [`testing`] provides an in-process
//! virtual network for exercising all of the above without real sockets.

pub mod bin;
pub mod binmap;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod hashtree;
pub mod picker;
pub mod reciprocity;
pub mod runtime;
pub mod storage;
pub mod testing;
pub mod transfer;
pub mod transport;

pub use config::RuntimeConfig;
pub use error::{CoreError, Result};
pub use runtime::{OpenParams, Runtime, RuntimeStatus};
pub use transfer::{Direction, TransferStatus};
