//! Outbound relay capability and its transports.
//!
//! [`RelayBus`] fans envelopes out to every subscriber inside one OS
//! process; [`TcpRelayLink`] speaks the framed wire format to a remote
//! coordinator. Both deliver every envelope to its sender as well, which
//! is why inbound handling starts with the echo check.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::codec::{read_frame, write_frame};
use super::messages::RelayEnvelope;
use crate::error::ExpeditionError;

/// Fire-and-forget outbound side of the relay.
pub trait RelayLink: Send + Sync + fmt::Debug {
    /// Queues an envelope for every process behind the coordinator.
    fn send(&self, envelope: RelayEnvelope);
}

/// Broadcast bus for [`RelayEnvelope`]s.
///
/// Backed by a `tokio::broadcast` channel. When the ring buffer is full,
/// the oldest envelopes are dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct RelayBus {
    sender: broadcast::Sender<RelayEnvelope>,
}

impl RelayBus {
    /// Creates a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an envelope to all subscribers.
    ///
    /// Returns the number of receivers. With none, the envelope is
    /// silently dropped.
    pub fn publish(&self, envelope: RelayEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Creates a receiver for all future envelopes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Spawns a task copying every future envelope into `inbound`.
    ///
    /// The task ends when the bus closes or `inbound` is dropped.
    #[must_use]
    pub fn forward_to(&self, inbound: mpsc::Sender<RelayEnvelope>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if inbound.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "zone lagged behind relay bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("relay forwarder stopped");
        })
    }
}

impl RelayLink for RelayBus {
    fn send(&self, envelope: RelayEnvelope) {
        let kind = envelope.message.kind();
        let receivers = self.publish(envelope);
        tracing::trace!(kind, receivers, "relay publish");
    }
}

/// Relay connection to a remote coordinating process.
///
/// A writer task drains the outbound queue into the socket; a reader task
/// decodes inbound frames into the zone's relay queue.
#[derive(Debug)]
pub struct TcpRelayLink {
    outbound: mpsc::Sender<RelayEnvelope>,
    peer: SocketAddr,
}

impl TcpRelayLink {
    /// Connects to `addr` and starts the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ExpeditionError::Relay`] if the connection fails.
    pub async fn connect(
        addr: SocketAddr,
        capacity: usize,
        inbound: mpsc::Sender<RelayEnvelope>,
    ) -> Result<Self, ExpeditionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ExpeditionError::Relay(format!("failed to connect to {addr}: {e}")))?;
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::channel::<RelayEnvelope>(capacity);

        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &envelope).await {
                    tracing::warn!(error = %e, peer = %addr, "relay write failed");
                    if !matches!(e, ExpeditionError::Codec(_)) {
                        break;
                    }
                }
            }
            tracing::debug!(peer = %addr, "relay writer stopped");
        });

        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(envelope)) => {
                        if inbound.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, peer = %addr, "relay read failed");
                        break;
                    }
                }
            }
            tracing::debug!(peer = %addr, "relay reader stopped");
        });

        tracing::info!(peer = %addr, "relay connected");
        Ok(Self {
            outbound,
            peer: addr,
        })
    }

    /// Address of the coordinator.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl RelayLink for TcpRelayLink {
    fn send(&self, envelope: RelayEnvelope) {
        let kind = envelope.message.kind();
        if let Err(e) = self.outbound.try_send(envelope) {
            tracing::warn!(kind, error = %e, peer = %self.peer, "relay envelope dropped");
        }
    }
}
