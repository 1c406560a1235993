//! Re-exports the injected-clock abstraction used throughout the crate so
//! every module can depend on `crate::clock` rather than reaching into
//! `swift_reliable` directly.

pub use swift_reliable::time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
