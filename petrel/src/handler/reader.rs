// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The reader task.
//!
//! Reads one framed packet at a time for the life of the connection and
//! dispatches it. Acknowledgement packets are handled inline because they
//! only complete a waiter and never suspend on further reads; packets that
//! open a message flow are spawned as their own task, otherwise a QoS 2
//! receive flow would deadlock waiting for a PUBREL that only this task can
//! deliver.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use codec::v3;

use super::{acks, flow, HandlerInner};
use crate::error::{Error, ErrorKind};
use crate::stream::PacketReader;
use std::sync::Arc;

pub(crate) async fn reader_loop<R>(
    inner: Arc<HandlerInner>,
    mut reader: PacketReader<R>,
    mut shutdown: watch::Receiver<bool>,
    ready_tx: oneshot::Sender<()>,
) where
    R: AsyncRead + Send + Unpin,
{
    log::debug!("{}: Starting reader task", inner.session.client_id());
    let mut running_tasks: VecDeque<JoinHandle<()>> = VecDeque::new();
    let _ready = ready_tx.send(());

    loop {
        // Reap finished packet tasks so handles never accumulate unbounded.
        while running_tasks
            .front()
            .is_some_and(tokio::task::JoinHandle::is_finished)
        {
            let _finished = running_tasks.pop_front();
        }

        let keep_alive = inner.session.config().keep_alive();
        let result = tokio::select! {
            _changed = shutdown.changed() => {
                log::debug!("{}: Reader task cancelled", inner.session.client_id());
                for task in running_tasks.drain(..) {
                    task.abort();
                }
                break;
            }
            result = read_one(&mut reader, keep_alive) => result,
        };

        match result {
            ReadOutcome::Packet(packet) => {
                if let Some(task) = dispatch_packet(&inner, packet).await {
                    running_tasks.push_back(task);
                }
            }
            ReadOutcome::Timeout => {
                log::debug!("{}: Input stream read timeout", inner.session.client_id());
                inner.hooks.handle_read_timeout(&inner.hook_context());
            }
            ReadOutcome::Eof => {
                log::debug!(
                    "{}: No more data (EOF received), stopping reader task",
                    inner.session.client_id()
                );
                break;
            }
            ReadOutcome::Failed(err) => {
                if err.kind() == ErrorKind::ProtocolViolation {
                    log::warn!(
                        "{}: Received reserved or malformed packet, closing connection: {err}",
                        inner.session.client_id()
                    );
                } else {
                    log::warn!(
                        "{}: Unhandled error in reader task: {err}",
                        inner.session.client_id()
                    );
                }
                break;
            }
        }
    }

    inner.hooks.handle_connection_closed(&inner.hook_context()).await;
    log::debug!("{}: Reader task stopped", inner.session.client_id());
}

enum ReadOutcome {
    Packet(v3::Packet),
    Timeout,
    Eof,
    Failed(Error),
}

/// Wait for one framed packet, bounded by the keep-alive interval when one
/// is configured. A timeout is a soft event reported to the keep-alive
/// policy; the loop continues afterwards.
async fn read_one<R>(reader: &mut PacketReader<R>, keep_alive: u64) -> ReadOutcome
where
    R: AsyncRead + Send + Unpin,
{
    let result = if keep_alive > 0 {
        match timeout(Duration::from_secs(keep_alive), reader.read_packet()).await {
            Ok(result) => result,
            Err(_elapsed) => return ReadOutcome::Timeout,
        }
    } else {
        reader.read_packet().await
    };

    match result {
        Ok(Some(packet)) => ReadOutcome::Packet(packet),
        Ok(None) => ReadOutcome::Eof,
        Err(err) => ReadOutcome::Failed(err),
    }
}

/// Dispatch one decoded packet. Returns the handle of the spawned task for
/// flow-initiating packets, `None` for packets handled inline.
async fn dispatch_packet(inner: &Arc<HandlerInner>, packet: v3::Packet) -> Option<JoinHandle<()>> {
    inner.events.packet_received(&inner.session, &packet).await;

    match packet {
        // Acknowledgements complete a waiter and must never suspend.
        v3::Packet::PublishAck(packet) => {
            acks::on_publish_ack(inner, &packet);
            None
        }
        v3::Packet::PublishReceived(packet) => {
            acks::on_publish_received(inner, &packet);
            None
        }
        v3::Packet::PublishRelease(packet) => {
            acks::on_publish_release(inner, &packet);
            None
        }
        v3::Packet::PublishComplete(packet) => {
            acks::on_publish_complete(inner, &packet);
            None
        }
        v3::Packet::ConnectAck(packet) => {
            inner.hooks.handle_connack(&inner.hook_context(), packet).await;
            None
        }
        v3::Packet::SubscribeAck(packet) => {
            inner.hooks.handle_suback(&inner.hook_context(), packet).await;
            None
        }
        v3::Packet::UnsubscribeAck(packet) => {
            inner.hooks.handle_unsuback(&inner.hook_context(), packet).await;
            None
        }
        v3::Packet::PingResponse(packet) => {
            inner.hooks.handle_pingresp(&inner.hook_context(), packet).await;
            None
        }

        // Flow-initiating packets run in their own task so a suspended
        // message flow cannot back-pressure this loop.
        v3::Packet::Publish(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = flow::handle_incoming_publish(&inner, packet).await {
                    log::warn!(
                        "{}: Incoming publish flow failed: {err}",
                        inner.session.client_id()
                    );
                }
            }))
        }
        v3::Packet::Connect(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                inner.hooks.handle_connect(&inner.hook_context(), packet).await;
            }))
        }
        v3::Packet::Subscribe(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                inner.hooks.handle_subscribe(&inner.hook_context(), packet).await;
            }))
        }
        v3::Packet::Unsubscribe(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                inner
                    .hooks
                    .handle_unsubscribe(&inner.hook_context(), packet)
                    .await;
            }))
        }
        v3::Packet::PingRequest(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                inner.hooks.handle_pingreq(&inner.hook_context(), packet).await;
            }))
        }
        v3::Packet::Disconnect(packet) => {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                inner.hooks.handle_disconnect(&inner.hook_context(), packet).await;
            }))
        }
    }
}
