//! In-process mesh radio with scriptable per-node link behaviour

use crate::ack::AckEvent;
use crate::directory::NodeId;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::radio::RadioTransport;
use crate::transport::types::PacketId;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const ACK_CHANNEL_CAPACITY: usize = 1024;

/// How a simulated link treats packets addressed to a node
#[derive(Debug, Clone, PartialEq)]
pub enum LinkBehaviour {
    /// Deliver and confirm after `delay`
    Confirm { delay: Duration },
    /// Deliver but never confirm (node out of range)
    Silent,
    /// Refuse the transmit call
    Unavailable,
    /// Confirm the first `n` packets, then go silent
    ConfirmFirst(u32),
    /// Confirm with probability `1 - loss_rate`
    Lossy { loss_rate: f64, delay: Duration },
    /// Never return from the transmit call
    Stall,
}

impl LinkBehaviour {
    pub fn confirm() -> Self {
        LinkBehaviour::Confirm {
            delay: Duration::ZERO,
        }
    }
}

/// One packet that went out over the simulated air
#[derive(Debug, Clone)]
pub struct Transmission {
    pub destination: NodeId,
    pub packet_id: PacketId,
    pub payload: Bytes,
    pub want_ack: bool,
    pub at: Instant,
}

impl Transmission {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub struct SimulatedRadio {
    links: DashMap<NodeId, LinkBehaviour>,
    default_link: RwLock<LinkBehaviour>,
    confirmed: DashMap<NodeId, u32>,
    next_packet: AtomicU32,
    log: Mutex<Vec<Transmission>>,
    acks: mpsc::Sender<AckEvent>,
}

impl SimulatedRadio {
    /// New radio where every link is silent, plus the receiving end of its
    /// confirmation stream
    pub fn new() -> (Arc<Self>, mpsc::Receiver<AckEvent>) {
        let (acks, ack_rx) = mpsc::channel(ACK_CHANNEL_CAPACITY);
        let radio = Arc::new(Self {
            links: DashMap::new(),
            default_link: RwLock::new(LinkBehaviour::Silent),
            confirmed: DashMap::new(),
            next_packet: AtomicU32::new(1),
            log: Mutex::new(Vec::new()),
            acks,
        });
        (radio, ack_rx)
    }

    pub fn set_link(&self, node_id: NodeId, behaviour: LinkBehaviour) {
        self.links.insert(node_id, behaviour);
    }

    pub fn set_default_link(&self, behaviour: LinkBehaviour) {
        *self.default_link.write() = behaviour;
    }

    fn link_for(&self, node_id: &NodeId) -> LinkBehaviour {
        self.links
            .get(node_id)
            .map(|link| link.value().clone())
            .unwrap_or_else(|| self.default_link.read().clone())
    }

    /// Inject a confirmation by hand
    pub async fn confirm(&self, packet_id: PacketId, from: Option<NodeId>) {
        let _ = self.acks.send(AckEvent::new(packet_id, from)).await;
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        self.log.lock().clone()
    }

    pub fn transmissions_to(&self, node_id: &NodeId) -> Vec<Transmission> {
        self.log
            .lock()
            .iter()
            .filter(|t| t.destination == *node_id)
            .cloned()
            .collect()
    }

    pub fn transmission_count(&self) -> usize {
        self.log.lock().len()
    }

    fn schedule_confirmation(&self, packet_id: PacketId, from: NodeId, delay: Duration) {
        let acks = self.acks.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = acks.send(AckEvent::new(packet_id, Some(from))).await;
        });
    }
}

#[async_trait]
impl RadioTransport for SimulatedRadio {
    async fn transmit(
        &self,
        destination: &NodeId,
        payload: Bytes,
        want_ack: bool,
    ) -> TransportResult<PacketId> {
        let link = self.link_for(destination);

        match link {
            LinkBehaviour::Unavailable => {
                return Err(TransportError::SendFailed {
                    destination: *destination,
                    reason: "link unavailable".to_string(),
                });
            }
            LinkBehaviour::Stall => {
                std::future::pending::<()>().await;
            }
            _ => {}
        }

        let packet_id = PacketId(self.next_packet.fetch_add(1, Ordering::Relaxed));
        self.log.lock().push(Transmission {
            destination: *destination,
            packet_id,
            payload,
            want_ack,
            at: Instant::now(),
        });

        if !want_ack {
            return Ok(packet_id);
        }

        match link {
            LinkBehaviour::Confirm { delay } => {
                self.schedule_confirmation(packet_id, *destination, delay);
            }
            LinkBehaviour::ConfirmFirst(n) => {
                let mut count = self.confirmed.entry(*destination).or_insert(0);
                if *count < n {
                    *count += 1;
                    drop(count);
                    self.schedule_confirmation(packet_id, *destination, Duration::ZERO);
                }
            }
            LinkBehaviour::Lossy { loss_rate, delay } => {
                if rand::random::<f64>() >= loss_rate {
                    self.schedule_confirmation(packet_id, *destination, delay);
                }
            }
            LinkBehaviour::Silent | LinkBehaviour::Unavailable | LinkBehaviour::Stall => {}
        }

        tracing::trace!(destination = %destination, packet = %packet_id, "simulated transmit");
        Ok(packet_id)
    }
}
