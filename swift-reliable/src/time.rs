//! Re-exports the clock abstraction shared by every layer of the swarm
//! transport (wire codec, reliability, channel, dispatcher) so that tests can
//! substitute [`ManualTimeProvider`] for real wall-clock time everywhere at
//! once.
pub use swift_proto::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
