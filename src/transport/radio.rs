use crate::directory::NodeId;
use crate::transport::error::TransportResult;
use crate::transport::types::PacketId;
use async_trait::async_trait;
use bytes::Bytes;

/// Outbound side of the mesh radio.
///
/// Delivery confirmations come back out of band, as `AckEvent`s on the
/// channel handed to the relay core at startup.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Queue one packet for transmission and return its packet id
    async fn transmit(
        &self,
        destination: &NodeId,
        payload: Bytes,
        want_ack: bool,
    ) -> TransportResult<PacketId>;
}
