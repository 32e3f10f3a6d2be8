// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! In-memory test harness: a handler wired to a scripted peer over a
//! duplex pipe.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;

use codec::v3;
use codec::EncodePacket;
use petrel::stream::PacketReader;
use petrel::{
    DefaultHooks, EventBus, HandlerConfig, Hooks, ProtocolHandler, Session, SessionConfig,
};

pub type TestHandler = ProtocolHandler<ReadHalf<DuplexStream>>;

const PEER_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The remote endpoint of the connection, driven by the test script.
pub struct Peer {
    reader: PacketReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    /// Receive the next frame the handler wrote.
    pub async fn recv(&mut self) -> v3::Packet {
        timeout(PEER_RECV_TIMEOUT, self.reader.read_packet())
            .await
            .expect("peer: receive timed out")
            .expect("peer: receive failed")
            .expect("peer: unexpected end of stream")
    }

    /// Receive one frame, or `None` if nothing arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<v3::Packet> {
        match timeout(wait, self.reader.read_packet()).await {
            Ok(Ok(packet)) => packet,
            _ => None,
        }
    }

    /// Send one packet to the handler.
    pub async fn send<P: EncodePacket>(&mut self, packet: P) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).expect("peer: encode failed");
        self.writer.write_all(&buf).await.expect("peer: send failed");
        self.writer.flush().await.expect("peer: flush failed");
    }

    /// Send raw bytes, for malformed-frame scenarios.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer
            .write_all(bytes)
            .await
            .expect("peer: send failed");
        self.writer.flush().await.expect("peer: flush failed");
    }

    /// Close the peer's write side, the handler sees end-of-stream.
    pub async fn close(&mut self) {
        self.writer.shutdown().await.expect("peer: shutdown failed");
    }
}

pub fn new_handler(session_config: SessionConfig) -> (TestHandler, Peer) {
    new_handler_with_hooks(session_config, Arc::new(DefaultHooks))
}

pub fn new_handler_with_hooks(
    session_config: SessionConfig,
    hooks: Arc<dyn Hooks>,
) -> (TestHandler, Peer) {
    let session = Arc::new(Session::new("petrel-test", session_config));
    new_handler_with_session(session, hooks)
}

pub fn new_handler_with_session(
    session: Arc<Session>,
    hooks: Arc<dyn Hooks>,
) -> (TestHandler, Peer) {
    new_handler_with_config(session, hooks, HandlerConfig::default())
}

pub fn new_handler_with_config(
    session: Arc<Session>,
    hooks: Arc<dyn Hooks>,
    config: HandlerConfig,
) -> (TestHandler, Peer) {
    let (local, remote) = tokio::io::duplex(4096);
    let (local_reader, local_writer) = tokio::io::split(local);
    let events = Arc::new(EventBus::new(
        config.listener_timeout(),
        config.observer_capacity(),
    ));
    let handler = ProtocolHandler::new(session, local_reader, local_writer, hooks, events, config);

    let (remote_reader, remote_writer) = tokio::io::split(remote);
    let peer = Peer {
        reader: PacketReader::new(remote_reader),
        writer: remote_writer,
    };
    (handler, peer)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
