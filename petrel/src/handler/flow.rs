// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! QoS 0/1/2 message flows, MQTT 3.1.1 paragraph 4.3.
//!
//! Outgoing flows suspend on the waiter slots completed by the reader task;
//! incoming flows run inside the per-packet tasks the reader spawns. Waiter
//! slots are registered before the triggering packet is written, so an
//! acknowledgement racing the write cannot slip past its flow.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use codec::v3::{PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket};
use codec::{PacketId, QoS};

use super::HandlerInner;
use crate::error::{Error, ErrorKind};
use crate::session::{IncomingMessage, OutgoingMessage, SessionState};

/// Entry point of the outgoing publish path.
pub(crate) async fn publish(
    inner: &Arc<HandlerInner>,
    topic: &str,
    payload: &[u8],
    qos: QoS,
    retain: bool,
    ack_timeout: Duration,
) -> Result<OutgoingMessage, Error> {
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce | QoS::ExactOnce => {
            Some(inner.session.with_state(SessionState::alloc_packet_id)?)
        }
    };
    let message = OutgoingMessage::new(packet_id, topic, payload, qos, retain)?;

    match timeout(ack_timeout, run_outgoing_flow(inner, message, true)).await {
        Ok(result) => result,
        Err(_elapsed) => {
            // Withdraw the waiter so a later retry can register again; the
            // in-flight entry stays for resume on the next session start.
            if let Some(packet_id) = packet_id {
                inner.waiters.withdraw_outgoing(packet_id);
            }
            Err(Error::from_string(
                ErrorKind::FlowTimeout,
                format!("handler: Publish flow timed out, topic: {topic}"),
            ))
        }
    }
}

/// Drive an outgoing message through its QoS flow.
///
/// With `fresh` unset the flow is a re-entry from `retry_deliveries`: the
/// message is already stored and its PUBLISH has been resent by the caller,
/// so the flow only awaits the acknowledgement of its current phase.
async fn run_outgoing_flow(
    inner: &Arc<HandlerInner>,
    message: OutgoingMessage,
    fresh: bool,
) -> Result<OutgoingMessage, Error> {
    match message.qos() {
        QoS::AtMostOnce => qos0_out(inner, message).await,
        QoS::AtLeastOnce => qos1_out(inner, message, fresh).await,
        QoS::ExactOnce => qos2_out(inner, message, fresh).await,
    }
}

async fn qos0_out(
    inner: &Arc<HandlerInner>,
    mut message: OutgoingMessage,
) -> Result<OutgoingMessage, Error> {
    let packet = message.build_publish_packet(false)?;
    inner.sink.send_packet(&packet.clone().into()).await?;
    message.publish_packet = Some(packet);
    Ok(message)
}

async fn qos1_out(
    inner: &Arc<HandlerInner>,
    mut message: OutgoingMessage,
    fresh: bool,
) -> Result<OutgoingMessage, Error> {
    if message.puback_packet.is_some() {
        return Err(Error::new(
            ErrorKind::StatusError,
            "handler: Message has already been acknowledged",
        ));
    }
    let packet_id = required_packet_id(&message)?;

    if fresh {
        insert_outgoing(inner, packet_id, &message)?;
    }
    let receiver = inner.waiters.puback.register(packet_id)?;
    if fresh {
        if let Err(err) = send_publish(inner, packet_id, &mut message).await {
            inner.waiters.puback.remove(packet_id);
            return Err(err);
        }
    }

    let puback = receiver.await.map_err(|_closed| {
        Error::from_string(
            ErrorKind::FlowCancelled,
            format!("handler: PUBACK waiter cancelled, packet id {packet_id}"),
        )
    })?;
    message.puback_packet = Some(puback);

    inner
        .session
        .with_state(|state| state.inflight_out_mut().remove(&packet_id));
    Ok(message)
}

async fn qos2_out(
    inner: &Arc<HandlerInner>,
    mut message: OutgoingMessage,
    fresh: bool,
) -> Result<OutgoingMessage, Error> {
    if message.pubrel_packet.is_some() && message.pubcomp_packet.is_some() {
        return Err(Error::new(
            ErrorKind::StatusError,
            "handler: Message has already been acknowledged",
        ));
    }
    let packet_id = required_packet_id(&message)?;

    if message.pubrec_packet.is_none() {
        if fresh {
            insert_outgoing(inner, packet_id, &message)?;
        }
        // A second PUBREC waiter under this id means two flows share one
        // packet id, which is fatal misuse of this flow.
        let receiver = inner.waiters.pubrec.register(packet_id)?;
        if fresh {
            if let Err(err) = send_publish(inner, packet_id, &mut message).await {
                inner.waiters.pubrec.remove(packet_id);
                return Err(err);
            }
        }

        let pubrec = receiver.await.map_err(|_closed| {
            Error::from_string(
                ErrorKind::FlowCancelled,
                format!("handler: PUBREC waiter cancelled, packet id {packet_id}"),
            )
        })?;
        message.pubrec_packet = Some(pubrec);
        sync_outgoing(inner, packet_id, &message);
    }

    if message.pubcomp_packet.is_none() {
        let receiver = inner.waiters.pubcomp.register(packet_id)?;
        let pubrel = PublishReleasePacket::new(packet_id);
        if let Err(err) = inner.sink.send_packet(&pubrel.into()).await {
            inner.waiters.pubcomp.remove(packet_id);
            return Err(err);
        }
        message.pubrel_packet = Some(pubrel);
        sync_outgoing(inner, packet_id, &message);

        let pubcomp = receiver.await.map_err(|_closed| {
            Error::from_string(
                ErrorKind::FlowCancelled,
                format!("handler: PUBCOMP waiter cancelled, packet id {packet_id}"),
            )
        })?;
        message.pubcomp_packet = Some(pubcomp);
    }

    inner
        .session
        .with_state(|state| state.inflight_out_mut().remove(&packet_id));
    Ok(message)
}

/// Resend pending messages of the session, MQTT 3.1.1 [MQTT-4.4.0-1].
///
/// Walks `inflight_out` in ascending packet id order. Finished entries are
/// collected and dropped; unfinished ones get exactly one DUP PUBLISH
/// resend (unless their release phase was already reached) and then re-enter
/// their flow at the current phase.
pub(crate) async fn retry_deliveries(inner: &Arc<HandlerInner>) -> Result<(), Error> {
    log::debug!(
        "{}: Begin message delivery retries",
        inner.session.client_id()
    );
    let pending: Vec<OutgoingMessage> = inner
        .session
        .with_state(|state| state.inflight_out().values().cloned().collect());

    let mut finished: Vec<PacketId> = Vec::new();
    let mut retried: usize = 0;
    for mut message in pending {
        let Some(packet_id) = message.packet_id() else {
            continue;
        };
        if message.is_acknowledged() {
            finished.push(packet_id);
            continue;
        }

        if message.pubrec_packet.is_none() {
            log::debug!(
                "{}: Retrying publish message, packet id {packet_id}",
                inner.session.client_id()
            );
            let packet = message.build_publish_packet(true)?;
            inner.sink.send_packet(&packet.clone().into()).await?;
            message.publish_packet = Some(packet);
            sync_outgoing(inner, packet_id, &message);
        }

        match timeout(
            inner.config.ack_timeout(),
            run_outgoing_flow(inner, message, false),
        )
        .await
        {
            Ok(Ok(_message)) => retried += 1,
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => {
                // Keep the entry for the next session, free its waiters.
                inner.waiters.withdraw_outgoing(packet_id);
                log::warn!(
                    "{}: Delivery retry timed out, packet id {packet_id} stays in flight",
                    inner.session.client_id()
                );
            }
        }
    }

    inner.session.with_state(|state| {
        for packet_id in &finished {
            state.inflight_out_mut().remove(packet_id);
        }
    });
    log::debug!(
        "{}: {retried} messages redelivered, {} finished entries dropped",
        inner.session.client_id(),
        finished.len()
    );
    Ok(())
}

/// Handle one inbound PUBLISH packet.
pub(crate) async fn handle_incoming_publish(
    inner: &Arc<HandlerInner>,
    packet: PublishPacket,
) -> Result<(), Error> {
    let message = IncomingMessage::from_publish(&packet);
    match packet.qos() {
        QoS::AtMostOnce => {
            // The DUP flag MUST be set to 0 for all QoS 0 messages
            // [MQTT-3.3.1-2].
            if packet.dup() {
                log::warn!(
                    "{}: DUP flag set on QoS 0 publish, message ignored, topic: {}",
                    inner.session.client_id(),
                    packet.topic()
                );
                return Ok(());
            }
            inner.session.enqueue_delivered(message).await
        }
        QoS::AtLeastOnce => {
            let packet_id = packet.packet_id();
            // Deliver first: the ack must only go out once the application
            // is guaranteed to observe the message.
            inner.session.enqueue_delivered(message).await?;
            let puback = PublishAckPacket::new(packet_id);
            inner.sink.send_packet(&puback.into()).await
        }
        QoS::ExactOnce => qos2_in(inner, message).await,
    }
}

async fn qos2_in(inner: &Arc<HandlerInner>, mut message: IncomingMessage) -> Result<(), Error> {
    let packet_id = message.packet_id().ok_or_else(|| {
        Error::new(
            ErrorKind::ProtocolViolation,
            "handler: QoS 2 publish without packet id",
        )
    })?;

    // A pre-existing PUBREL waiter means the flow for this id is already
    // open; the duplicate is dropped and the open flow delivers the message
    // exactly once.
    let receiver = inner.waiters.pubrel.register(packet_id).map_err(|_exists| {
        Error::from_string(
            ErrorKind::FlowDuplicate,
            format!("handler: QoS 2 flow already open, packet id {packet_id}"),
        )
    })?;

    inner.session.with_state(|state| {
        state.inflight_in_mut().insert(packet_id, message.clone());
    });

    let pubrec = PublishReceivedPacket::new(packet_id);
    if let Err(err) = inner.sink.send_packet(&pubrec.into()).await {
        inner.waiters.pubrel.remove(packet_id);
        return Err(err);
    }
    message.pubrec_packet = Some(pubrec);
    inner.session.with_state(|state| {
        if let Some(entry) = state.inflight_in_mut().get_mut(&packet_id) {
            entry.pubrec_packet = Some(pubrec);
        }
    });

    let pubrel = receiver.await.map_err(|_closed| {
        Error::from_string(
            ErrorKind::FlowCancelled,
            format!("handler: PUBREL waiter cancelled, packet id {packet_id}"),
        )
    })?;
    message.pubrel_packet = Some(pubrel);

    // Initiate delivery, drop the flow entry, then complete towards the
    // peer. The application sees the message before PUBCOMP hits the wire.
    inner.session.enqueue_delivered(message).await?;
    inner
        .session
        .with_state(|state| state.inflight_in_mut().remove(&packet_id));
    let pubcomp = PublishCompletePacket::new(packet_id);
    inner.sink.send_packet(&pubcomp.into()).await
}

fn required_packet_id(message: &OutgoingMessage) -> Result<PacketId, Error> {
    message.packet_id().ok_or_else(|| {
        Error::new(
            ErrorKind::ProtocolViolation,
            "handler: QoS flow without packet id",
        )
    })
}

fn insert_outgoing(
    inner: &Arc<HandlerInner>,
    packet_id: PacketId,
    message: &OutgoingMessage,
) -> Result<(), Error> {
    inner.session.with_state(|state| {
        if state.inflight_out().contains_key(&packet_id) {
            return Err(Error::from_string(
                ErrorKind::FlowDuplicate,
                format!("handler: A message with packet id {packet_id} is already in flight"),
            ));
        }
        state.inflight_out_mut().insert(packet_id, message.clone());
        Ok(())
    })
}

/// Mirror the flow position of `message` into its session entry, so resume
/// after a disconnect continues from the correct phase.
fn sync_outgoing(inner: &Arc<HandlerInner>, packet_id: PacketId, message: &OutgoingMessage) {
    inner.session.with_state(|state| {
        if let Some(entry) = state.inflight_out_mut().get_mut(&packet_id) {
            *entry = message.clone();
        }
    });
}

/// Record the freshly-sent PUBLISH on the message and its session entry.
async fn send_publish(
    inner: &Arc<HandlerInner>,
    packet_id: PacketId,
    message: &mut OutgoingMessage,
) -> Result<(), Error> {
    // A PUBLISH that was already emitted once goes out again with DUP set.
    let dup = message.publish_packet.is_some();
    let packet = message.build_publish_packet(dup)?;
    inner.sink.send_packet(&packet.clone().into()).await?;
    message.publish_packet = Some(packet);
    sync_outgoing(inner, packet_id, message);
    Ok(())
}
