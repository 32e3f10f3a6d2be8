// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-endpoint session state.
//!
//! A [`Session`] is created by the enclosing endpoint before the handler
//! starts. With clean-session unset it outlives the handler across
//! reconnects, carrying the in-flight maps that drive delivery retries.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use codec::PacketId;

use crate::error::{Error, ErrorKind};

mod config;
mod message;

pub use config::SessionConfig;
pub use message::{IncomingMessage, OutgoingMessage};

/// FIFO of messages ready for application consumption.
///
/// The queue only ever holds fully-acknowledged-to-broker QoS 1 messages and
/// post-PUBREL QoS 2 messages, so a consumer never observes one protocol
/// flow twice.
#[derive(Debug)]
struct DeliveredQueue {
    capacity: usize,
    sender: mpsc::Sender<IncomingMessage>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<IncomingMessage>>,
}

impl DeliveredQueue {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            capacity,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }
}

/// Mutable protocol state of one session.
///
/// In-flight maps are ordered by packet id so that delivery retries walk
/// them deterministically in ascending order.
#[derive(Debug)]
pub struct SessionState {
    next_packet_id: u16,
    inflight_out: BTreeMap<PacketId, OutgoingMessage>,
    inflight_in: BTreeMap<PacketId, IncomingMessage>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            next_packet_id: 1,
            inflight_out: BTreeMap::new(),
            inflight_in: BTreeMap::new(),
        }
    }

    /// Allocate the next free packet identifier.
    ///
    /// The counter wraps modulo 2^16, skipping zero and every id currently
    /// in use in either in-flight map.
    ///
    /// # Errors
    ///
    /// Returns error if all 65535 identifiers are in flight.
    pub(crate) fn alloc_packet_id(&mut self) -> Result<PacketId, Error> {
        for _ in 0..u16::MAX {
            let packet_id = PacketId::new(self.next_packet_id);
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if self.next_packet_id == 0 {
                self.next_packet_id = 1;
            }

            if !self.inflight_out.contains_key(&packet_id)
                && !self.inflight_in.contains_key(&packet_id)
            {
                return Ok(packet_id);
            }
        }
        Err(Error::new(
            ErrorKind::PacketIdExhausted,
            "session: No free packet identifier left",
        ))
    }

    pub(crate) fn inflight_out(&self) -> &BTreeMap<PacketId, OutgoingMessage> {
        &self.inflight_out
    }

    pub(crate) fn inflight_out_mut(&mut self) -> &mut BTreeMap<PacketId, OutgoingMessage> {
        &mut self.inflight_out
    }

    pub(crate) fn inflight_in_mut(&mut self) -> &mut BTreeMap<PacketId, IncomingMessage> {
        &mut self.inflight_in
    }
}

/// State of one MQTT endpoint, shared between the enclosing endpoint and
/// its current protocol handler.
#[derive(Debug)]
pub struct Session {
    /// Immutable after connect.
    client_id: String,

    config: SessionConfig,

    state: Mutex<SessionState>,

    queue: DeliveredQueue,
}

impl Session {
    #[must_use]
    pub fn new(client_id: &str, config: SessionConfig) -> Self {
        let queue = DeliveredQueue::new(config.delivered_queue_capacity());
        Self {
            client_id: client_id.to_owned(),
            config,
            state: Mutex::new(SessionState::new()),
            queue,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run `f` with the locked protocol state.
    ///
    /// The lock is never held across a suspension point.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Packet ids of outgoing in-flight messages, ascending.
    #[must_use]
    pub fn inflight_out_ids(&self) -> Vec<PacketId> {
        self.with_state(|state| state.inflight_out.keys().copied().collect())
    }

    /// Packet ids of incoming QoS 2 flows, ascending.
    #[must_use]
    pub fn inflight_in_ids(&self) -> Vec<PacketId> {
        self.with_state(|state| state.inflight_in.keys().copied().collect())
    }

    /// Re-insert a persisted outgoing message, used when rehydrating the
    /// session from a store before the handler starts.
    ///
    /// # Errors
    ///
    /// Returns error if `message` carries no packet id or the id is already
    /// in flight.
    pub fn restore_outgoing(&self, message: OutgoingMessage) -> Result<(), Error> {
        let Some(packet_id) = message.packet_id() else {
            return Err(Error::new(
                ErrorKind::FlowDuplicate,
                "session: Cannot restore a message without packet id",
            ));
        };
        self.with_state(|state| {
            if state.inflight_out.contains_key(&packet_id) {
                return Err(Error::from_string(
                    ErrorKind::FlowDuplicate,
                    format!("session: Packet id {packet_id} is already in flight"),
                ));
            }
            state.inflight_out.insert(packet_id, message);
            Ok(())
        })
    }

    /// Put `message` onto the delivered queue.
    ///
    /// Suspends while the queue is full, back-pressuring the inbound flow.
    pub(crate) async fn enqueue_delivered(&self, message: IncomingMessage) -> Result<(), Error> {
        self.queue.sender.send(message).await.map_err(Error::from)
    }

    /// Take the next message off the delivered queue.
    pub(crate) async fn next_delivered(&self) -> Option<IncomingMessage> {
        self.queue.receiver.lock().await.recv().await
    }

    /// Number of delivered messages waiting for consumption.
    #[must_use]
    pub fn delivered_backlog(&self) -> usize {
        self.queue.capacity - self.queue.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn outgoing(id: u16) -> OutgoingMessage {
        OutgoingMessage::new(Some(PacketId::new(id)), "t", b"", QoS::AtLeastOnce, false).unwrap()
    }

    #[test]
    fn test_alloc_packet_id_skips_in_use() {
        let mut state = SessionState::new();
        state.inflight_out.insert(PacketId::new(1), outgoing(1));
        state.inflight_out.insert(PacketId::new(2), outgoing(2));

        assert_eq!(state.alloc_packet_id().unwrap(), PacketId::new(3));
    }

    #[test]
    fn test_alloc_packet_id_wraps_past_zero() {
        let mut state = SessionState::new();
        state.next_packet_id = u16::MAX;

        assert_eq!(state.alloc_packet_id().unwrap(), PacketId::new(u16::MAX));
        // Zero is reserved, the counter jumps to one.
        assert_eq!(state.alloc_packet_id().unwrap(), PacketId::new(1));
    }

    #[test]
    fn test_alloc_packet_id_exhaustion() {
        let mut state = SessionState::new();
        for id in 1..=u16::MAX {
            state.inflight_out.insert(PacketId::new(id), outgoing(id));
        }
        let err = state.alloc_packet_id().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PacketIdExhausted);
    }

    #[test]
    fn test_restore_outgoing_rejects_duplicate() {
        let session = Session::new("client-1", SessionConfig::default());
        session.restore_outgoing(outgoing(7)).unwrap();
        let err = session.restore_outgoing(outgoing(7)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FlowDuplicate);
        assert_eq!(session.inflight_out_ids(), vec![PacketId::new(7)]);
    }
}
