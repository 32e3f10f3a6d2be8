// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! One-shot acknowledgement slots, one per (packet id, ack kind).
//!
//! A publish flow registers a slot just before it suspends, the reader task
//! completes the slot when the matching packet arrives. Late or duplicated
//! acknowledgements find no slot and are logged and discarded.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

use codec::v3::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
};
use codec::PacketId;

use crate::error::{Error, ErrorKind};

pub(crate) struct WaiterMap<T> {
    /// Packet name used in log messages, e.g. "PUBACK".
    kind: &'static str,

    inner: Mutex<HashMap<PacketId, oneshot::Sender<T>>>,
}

impl<T> WaiterMap<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PacketId, oneshot::Sender<T>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the slot for `packet_id`.
    ///
    /// At most one waiter may exist per (packet id, ack kind) at any time.
    ///
    /// # Errors
    ///
    /// Returns error if a waiter is already registered for this id.
    pub fn register(&self, packet_id: PacketId) -> Result<oneshot::Receiver<T>, Error> {
        let mut inner = self.lock();
        if inner.contains_key(&packet_id) {
            return Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!(
                    "waiters: A {} waiter already exists for packet id {packet_id}",
                    self.kind
                ),
            ));
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(packet_id, tx);
        Ok(rx)
    }

    /// Fulfill the slot for `packet_id` with the received packet.
    ///
    /// A missing slot covers late acknowledgements after a flow timeout and
    /// duplicated acknowledgements; both are logged and discarded.
    pub fn complete(&self, packet_id: PacketId, packet: T) {
        let sender = self.lock().remove(&packet_id);
        match sender {
            None => {
                log::warn!(
                    "waiters: Received {} for unknown pending message id: {packet_id}",
                    self.kind
                );
            }
            Some(tx) => {
                if tx.send(packet).is_err() {
                    log::warn!(
                        "waiters: {} waiter with id {packet_id} already done",
                        self.kind
                    );
                }
            }
        }
    }

    /// Withdraw the slot without completing it, if it still exists.
    pub fn remove(&self, packet_id: PacketId) {
        self.lock().remove(&packet_id);
    }

    /// Drop every slot. Suspended flows wake up with a cancellation error.
    pub fn cancel_all(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// The four acknowledgement slot maps of one handler.
///
/// One map per ack kind keeps lookup O(1) with no coordination across maps:
/// a QoS 2 flow holds a PUBREC slot and later a PUBCOMP slot under the same
/// packet id without conflict.
pub(crate) struct WaiterRegistry {
    pub puback: WaiterMap<PublishAckPacket>,
    pub pubrec: WaiterMap<PublishReceivedPacket>,
    pub pubrel: WaiterMap<PublishReleasePacket>,
    pub pubcomp: WaiterMap<PublishCompletePacket>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self {
            puback: WaiterMap::new("PUBACK"),
            pubrec: WaiterMap::new("PUBREC"),
            pubrel: WaiterMap::new("PUBREL"),
            pubcomp: WaiterMap::new("PUBCOMP"),
        }
    }

    /// Withdraw the slots a publish flow may have left behind for `packet_id`.
    pub fn withdraw_outgoing(&self, packet_id: PacketId) {
        self.puback.remove(packet_id);
        self.pubrec.remove(packet_id);
        self.pubcomp.remove(packet_id);
    }
}
