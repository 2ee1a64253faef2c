//! meshrelay: shortname relaying over a radio mesh with per-chunk delivery
//! confirmation and store-and-forward for recipients that are off the air.
//!
//! Components, leaves first:
//! - [`directory`]: shortname to node id resolution
//! - [`privacy`]: opt-out registry
//! - [`chunk`]: message chunker
//! - [`ack`]: per-chunk ack state machine
//! - [`dispatch`]: bounded relay worker pool
//! - [`offline`]: persistent per-recipient retry queue
//! - [`coordinator`]: wires the above together

pub mod ack;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod dispatch;
pub mod metrics;
pub mod offline;
pub mod privacy;
pub mod store;
pub mod transport;

pub use ack::{AckEvent, AckState, RelayOutcome};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::RelayConfig;
pub use coordinator::{CoordinatorError, CoreStats, RelayCore};
pub use directory::{NodeId, NodeInfo, NodeSource, NodeTable, ShortnameDirectory};
pub use dispatch::{
    Accepted, DeliveryNotice, NoticeStatus, RelayRequest, RequestId, SubmitRejection,
    SubmitResult,
};
pub use transport::{LinkBehaviour, PacketId, RadioTransport, SimulatedRadio};
