//! Radio transport boundary: the transmit trait, airtime pacing and an
//! in-process simulated mesh used by tests and the simulator binary.

pub mod error;
pub mod pacing;
pub mod radio;
pub mod simulated;
pub mod types;

pub use error::{TransportError, TransportResult};
pub use pacing::AirtimePacer;
pub use radio::RadioTransport;
pub use simulated::{LinkBehaviour, SimulatedRadio, Transmission};
pub use types::PacketId;
