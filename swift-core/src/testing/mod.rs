pub mod hub;

pub use hub::{LossModel, SimulatedTransport, VirtualHub};
