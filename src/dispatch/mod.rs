//! Relay Dispatcher
//!
//! Front door for relay requests and the worker pool that carries them over
//! the radio. Unconfirmed relays are handed to the offline queue.

pub mod dispatcher;
pub mod error;
pub mod notice;
pub mod types;
mod worker;

pub use dispatcher::{DispatcherParts, InFlightRelay, RelayDispatcher};
pub use error::{DispatchError, DispatchResult};
pub use types::{
    Accepted, DeliveryNotice, DispatchStats, JobOrigin, NoticeStatus, RelayJob, RelayRequest,
    RequestId, RetryTicket, SubmitRejection, SubmitResult,
};
