// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet event fan-out to external plugins.
//!
//! Two delivery flavors with different guarantees:
//! * registered [`EventListener`]s are awaited per packet, bounded by a
//!   timeout, and may back-pressure the protocol;
//! * broadcast observers get a deferred, non-blocking feed and are dropped
//!   behind when they lag.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use codec::v3;

use crate::error::Error;
use crate::session::Session;

/// Direction of a packet event, seen from this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Sent,
    Received,
}

/// One entry of the observer feed.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub direction: PacketDirection,
    pub client_id: String,
    pub packet: v3::Packet,
}

/// An awaited packet plugin.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_packet_sent(&self, session: &Session, packet: &v3::Packet) -> Result<(), Error>;

    async fn on_packet_received(&self, session: &Session, packet: &v3::Packet)
        -> Result<(), Error>;
}

/// Fans packet events out to listeners and observers.
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,

    /// Listener misbehavior is not the protocol's responsibility; a
    /// listener that exceeds this bound is logged and skipped.
    listener_timeout: Duration,

    observers: broadcast::Sender<PacketEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(listener_timeout: Duration, observer_capacity: usize) -> Self {
        let (observers, _rx) = broadcast::channel(observer_capacity);
        Self {
            listeners: Vec::new(),
            listener_timeout,
            observers,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Subscribe to the deferred observer feed.
    #[must_use]
    pub fn observe(&self) -> broadcast::Receiver<PacketEvent> {
        self.observers.subscribe()
    }

    pub(crate) async fn packet_sent(&self, session: &Session, packet: &v3::Packet) {
        for listener in &self.listeners {
            match timeout(self.listener_timeout, listener.on_packet_sent(session, packet)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("events: Packet-sent listener failed: {err}");
                }
                Err(_elapsed) => {
                    log::warn!("events: Packet-sent listener timed out");
                }
            }
        }
        self.notify_observers(PacketDirection::Sent, session, packet);
    }

    pub(crate) async fn packet_received(&self, session: &Session, packet: &v3::Packet) {
        for listener in &self.listeners {
            match timeout(
                self.listener_timeout,
                listener.on_packet_received(session, packet),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("events: Packet-received listener failed: {err}");
                }
                Err(_elapsed) => {
                    log::warn!("events: Packet-received listener timed out");
                }
            }
        }
        self.notify_observers(PacketDirection::Received, session, packet);
    }

    /// Hand the event to the broadcast channel. Delivery happens when the
    /// observer polls, so observer latency never gates the protocol.
    fn notify_observers(&self, direction: PacketDirection, session: &Session, packet: &v3::Packet) {
        if self.observers.receiver_count() == 0 {
            return;
        }
        let event = PacketEvent {
            direction,
            client_id: session.client_id().to_owned(),
            packet: packet.clone(),
        };
        // Send only fails when every receiver is gone.
        let _unused = self.observers.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    #[test]
    fn test_observer_feed_is_non_blocking() {
        let session = Session::new("observer-test", SessionConfig::default());
        let bus = EventBus::new(Duration::from_secs(1), 2);
        let mut observer = bus.observe();

        let ping = v3::Packet::PingRequest(v3::PingRequestPacket::new());
        tokio_test::block_on(bus.packet_sent(&session, &ping));

        let event = observer.try_recv().unwrap();
        assert_eq!(event.direction, PacketDirection::Sent);
        assert_eq!(event.client_id, "observer-test");
    }

    #[test]
    fn test_no_observers_is_fine() {
        let session = Session::new("observer-test", SessionConfig::default());
        let bus = EventBus::new(Duration::from_secs(1), 2);
        let ping = v3::Packet::PingRequest(v3::PingRequestPacket::new());
        tokio_test::block_on(bus.packet_received(&session, &ping));
    }
}
