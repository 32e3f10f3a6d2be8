// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-packet-type hooks overridable by client and broker endpoints.
//!
//! The handler core drives the QoS machinery itself; everything
//! role-specific, like answering PINGREQ on a broker or reacting to CONNACK
//! on a client, goes through these hooks. Every hook defaults to a log
//! line, so an endpoint only overrides what it needs.

use async_trait::async_trait;
use std::sync::Arc;

use codec::v3;

use crate::error::Error;
use crate::session::Session;

/// Write access to the handler's single outbound packet path.
#[async_trait]
pub(crate) trait PacketSink: Send + Sync {
    async fn send_packet(&self, packet: &v3::Packet) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Handler context passed to every hook.
///
/// Packets sent through the context share the handler's writer, so hook
/// output and protocol output never interleave on the wire.
#[derive(Clone)]
pub struct HookContext {
    session: Arc<Session>,
    sink: Arc<dyn PacketSink>,
}

impl HookContext {
    pub(crate) fn new(session: Arc<Session>, sink: Arc<dyn PacketSink>) -> Self {
        Self { session, sink }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.session.client_id()
    }

    /// Send a packet through the handler's writer.
    ///
    /// # Errors
    ///
    /// Returns error if the packet cannot be encoded or the transport fails.
    pub async fn send_packet(&self, packet: v3::Packet) -> Result<(), Error> {
        self.sink.send_packet(&packet).await
    }
}

/// Role-specific packet handlers.
///
/// Acknowledgement hooks run synchronously inside the reader task and must
/// not suspend waiting on further network input; flow-initiating hooks run
/// in their own task and may suspend freely.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn handle_connect(&self, ctx: &HookContext, _packet: v3::ConnectPacket) {
        log::debug!("{}: CONNECT unhandled", ctx.client_id());
    }

    async fn handle_connack(&self, ctx: &HookContext, _packet: v3::ConnectAckPacket) {
        log::debug!("{}: CONNACK unhandled", ctx.client_id());
    }

    async fn handle_subscribe(&self, ctx: &HookContext, _packet: v3::SubscribePacket) {
        log::debug!("{}: SUBSCRIBE unhandled", ctx.client_id());
    }

    async fn handle_unsubscribe(&self, ctx: &HookContext, _packet: v3::UnsubscribePacket) {
        log::debug!("{}: UNSUBSCRIBE unhandled", ctx.client_id());
    }

    async fn handle_suback(&self, ctx: &HookContext, _packet: v3::SubscribeAckPacket) {
        log::debug!("{}: SUBACK unhandled", ctx.client_id());
    }

    async fn handle_unsuback(&self, ctx: &HookContext, _packet: v3::UnsubscribeAckPacket) {
        log::debug!("{}: UNSUBACK unhandled", ctx.client_id());
    }

    async fn handle_pingreq(&self, ctx: &HookContext, _packet: v3::PingRequestPacket) {
        log::debug!("{}: PINGREQ unhandled", ctx.client_id());
    }

    async fn handle_pingresp(&self, ctx: &HookContext, _packet: v3::PingResponsePacket) {
        log::debug!("{}: PINGRESP unhandled", ctx.client_id());
    }

    async fn handle_disconnect(&self, ctx: &HookContext, _packet: v3::DisconnectPacket) {
        log::debug!("{}: DISCONNECT unhandled", ctx.client_id());
    }

    async fn handle_connection_closed(&self, ctx: &HookContext) {
        log::debug!("{}: Connection closed unhandled", ctx.client_id());
    }

    fn handle_read_timeout(&self, ctx: &HookContext) {
        log::debug!("{}: Read timeout unhandled", ctx.client_id());
    }

    fn handle_write_timeout(&self, ctx: &HookContext) {
        log::debug!("{}: Write timeout unhandled", ctx.client_id());
    }
}

/// The log-only hook set.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

#[async_trait]
impl Hooks for DefaultHooks {}
