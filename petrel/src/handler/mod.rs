// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The MQTT 3.1.1 protocol handler.
//!
//! One handler drives one connected endpoint over an already-established
//! byte stream. Client and broker endpoints share this engine and inject
//! their role through [`Hooks`].
//!
//! Task model per handler: one reader task, one keep-alive timer task, and
//! ephemeral tasks for flow-initiating inbound packets. All outbound frames
//! go through a single serialized send path.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use codec::{v3, PacketId, QoS};

use crate::config::HandlerConfig;
use crate::error::{Error, ErrorKind};
use crate::events::{EventBus, PacketEvent};
use crate::hooks::{HookContext, Hooks, PacketSink};
use crate::keep_alive::KeepAlive;
use crate::session::{IncomingMessage, OutgoingMessage, Session};
use crate::stream::{PacketReader, PacketWriter};
use crate::waiters::WaiterRegistry;

mod acks;
mod flow;
mod reader;

/// The single outbound path of one handler.
///
/// Sends from concurrent tasks are serialized on the writer lock, the
/// keep-alive deadline moves on every successful write, and the packet-sent
/// event fires afterwards.
struct SendPath<W> {
    writer: tokio::sync::Mutex<PacketWriter<W>>,
    keep_alive: Arc<KeepAlive>,
    events: Arc<EventBus>,
    session: Arc<Session>,
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> PacketSink for SendPath<W> {
    async fn send_packet(&self, packet: &v3::Packet) -> Result<(), Error> {
        {
            let mut writer = self.writer.lock().await;
            writer.write_packet(packet).await?;
        }
        self.keep_alive.rearm();
        self.events.packet_sent(&self.session, packet).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.writer.lock().await.close().await
    }
}

/// State shared between the handler facade, the reader task and the
/// ephemeral packet tasks.
pub(crate) struct HandlerInner {
    session: Arc<Session>,
    hooks: Arc<dyn Hooks>,
    events: Arc<EventBus>,
    waiters: WaiterRegistry,
    sink: Arc<dyn PacketSink>,
    keep_alive: Arc<KeepAlive>,
    config: HandlerConfig,
}

impl HandlerInner {
    fn hook_context(&self) -> HookContext {
        HookContext::new(self.session.clone(), self.sink.clone())
    }
}

/// Protocol handler of one connected MQTT endpoint.
///
/// `R` is the read half of the transport; the write half is absorbed into
/// the send path at construction time.
pub struct ProtocolHandler<R> {
    inner: Arc<HandlerInner>,

    /// Taken by `start`.
    reader: Option<PacketReader<R>>,

    reader_task: Option<JoinHandle<()>>,
    keep_alive_task: Option<JoinHandle<()>>,

    shutdown: watch::Sender<bool>,
}

impl<R> ProtocolHandler<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    pub fn new<W>(
        session: Arc<Session>,
        reader: R,
        writer: W,
        hooks: Arc<dyn Hooks>,
        events: Arc<EventBus>,
        config: HandlerConfig,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let keep_alive = Arc::new(KeepAlive::new(session.config().keep_alive()));
        let sink: Arc<dyn PacketSink> = Arc::new(SendPath {
            writer: tokio::sync::Mutex::new(PacketWriter::new(writer)),
            keep_alive: keep_alive.clone(),
            events: events.clone(),
            session: session.clone(),
        });
        let (shutdown, _rx) = watch::channel(false);

        Self {
            inner: Arc::new(HandlerInner {
                session,
                hooks,
                events,
                waiters: WaiterRegistry::new(),
                sink,
                keep_alive,
                config,
            }),
            reader: Some(PacketReader::new(reader)),
            reader_task: None,
            keep_alive_task: None,
            shutdown,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Subscribe to the deferred packet-observer feed.
    #[must_use]
    pub fn observe(&self) -> broadcast::Receiver<PacketEvent> {
        self.inner.events.observe()
    }

    /// Start the handler: launch the reader task, arm the keep-alive timer,
    /// then retry pending deliveries of the session.
    ///
    /// # Errors
    ///
    /// Returns error if the handler was already started or a delivery retry
    /// hits a transport failure.
    pub async fn start(&mut self) -> Result<(), Error> {
        let reader = self.reader.take().ok_or_else(|| {
            Error::new(ErrorKind::StatusError, "handler: Already started")
        })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown_rx = self.shutdown.subscribe();
        self.reader_task = Some(tokio::spawn(reader::reader_loop(
            self.inner.clone(),
            reader,
            shutdown_rx,
            ready_tx,
        )));
        // Reader is ready once its task has entered the loop.
        let _ready = ready_rx.await;

        if self.inner.keep_alive.enabled() {
            let keep_alive = self.inner.keep_alive.clone();
            let hooks = self.inner.hooks.clone();
            let ctx = self.inner.hook_context();
            self.keep_alive_task = Some(tokio::spawn(keep_alive.run(hooks, ctx)));
        }
        log::debug!("{}: Handler tasks started", self.inner.session.client_id());

        flow::retry_deliveries(&self.inner).await?;
        log::debug!("{}: Handler ready", self.inner.session.client_id());
        Ok(())
    }

    /// Stop the handler: cancel the reader and the keep-alive timer, wait
    /// for the reader task to finish, then close the writer.
    ///
    /// Outgoing in-flight entries are kept so the next session can resume
    /// them. Inbound QoS 2 flows are dropped when clean-session is set and
    /// kept for the peer's re-delivery otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if closing the writer fails.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if self.inner.session.config().clean_session() {
            self.inner.waiters.pubrel.cancel_all();
            self.inner
                .session
                .with_state(|state| state.inflight_in_mut().clear());
        }

        let _unused = self.shutdown.send(true);
        if let Some(task) = self.keep_alive_task.take() {
            task.abort();
        }
        log::debug!("{}: Waiting for reader to stop", self.inner.session.client_id());
        if let Some(task) = self.reader_task.take() {
            let _joined = task.await;
        }
        log::debug!("{}: Closing writer", self.inner.session.client_id());
        self.inner.sink.close().await
    }

    /// Publish an application message with the configured ack timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::publish_with_timeout`].
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<OutgoingMessage, Error> {
        self.publish_with_timeout(topic, payload, qos, retain, self.inner.config.ack_timeout())
            .await
    }

    /// Publish an application message, driving the full QoS flow.
    ///
    /// QoS 0 returns after the PUBLISH is written. QoS 1 suspends until
    /// PUBACK, QoS 2 until the PUBREC/PUBREL/PUBCOMP chain completes.
    ///
    /// # Errors
    ///
    /// Returns a `FlowTimeout` error if the acknowledgement chain does not
    /// complete within `ack_timeout`; the in-flight entry is kept so the
    /// message is retried on the next session start. Transport and protocol
    /// failures surface as their own kinds.
    pub async fn publish_with_timeout(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        ack_timeout: std::time::Duration,
    ) -> Result<OutgoingMessage, Error> {
        flow::publish(&self.inner, topic, payload, qos, retain, ack_timeout).await
    }

    /// Take the next incoming application message off the delivered queue.
    ///
    /// Suspends until a message is available. Returns `None` only when the
    /// session's queue has been closed.
    pub async fn deliver_next_message(&self) -> Option<IncomingMessage> {
        let message = self.inner.session.next_delivered().await;
        if let Some(message) = &message {
            log::debug!(
                "{}: Delivering message, topic: {}",
                self.inner.session.client_id(),
                message.topic()
            );
        }
        message
    }

    /// Inform the session that the application has consumed an incoming
    /// QoS 2 message. The broker-side acknowledgement was already sent;
    /// this is session housekeeping only.
    pub fn acknowledge_delivery(&self, packet_id: PacketId) {
        self.inner.session.with_state(|state| {
            if let Some(message) = state.inflight_in_mut().get_mut(&packet_id) {
                message.acknowledge_delivery();
                log::debug!("handler: Message delivery acknowledged, packet id {packet_id}");
            } else {
                log::debug!("handler: No open inbound flow for packet id {packet_id}");
            }
        });
    }
}
