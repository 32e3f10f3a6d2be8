// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Reader task lifecycle: protocol errors, keep-alive timeouts, shutdown.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codec::v3;
use codec::{PacketId, QoS};
use petrel::{HookContext, Hooks, Session, SessionConfig};

mod common;
use common::{init_logging, new_handler_with_hooks, new_handler_with_session};

#[derive(Default)]
struct RecordingHooks {
    connection_closed: AtomicBool,
    read_timeouts: AtomicUsize,
    write_timeouts: AtomicUsize,
}

#[async_trait]
impl Hooks for RecordingHooks {
    async fn handle_connection_closed(&self, _ctx: &HookContext) {
        self.connection_closed.store(true, Ordering::SeqCst);
    }

    fn handle_read_timeout(&self, _ctx: &HookContext) {
        self.read_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_write_timeout(&self, _ctx: &HookContext) {
        self.write_timeouts.fetch_add(1, Ordering::SeqCst);
    }
}

async fn wait_for_flag(flag: &AtomicBool) {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("flag was not raised in time");
}

// A frame with reserved packet type 0 closes the connection as a protocol
// error; the reader exits and stop() joins it promptly.
#[tokio::test]
async fn test_reserved_packet_type_closes_connection() {
    init_logging();
    let hooks = Arc::new(RecordingHooks::default());
    let (mut handler, mut peer) = new_handler_with_hooks(SessionConfig::new(0, true), hooks.clone());
    handler.start().await.unwrap();

    peer.send_raw(&[0x00, 0x00]).await;

    wait_for_flag(&hooks.connection_closed).await;
    handler.stop().await.unwrap();
}

// Reserved packet type 15 is equally fatal.
#[tokio::test]
async fn test_reserved_packet_type_15_closes_connection() {
    init_logging();
    let hooks = Arc::new(RecordingHooks::default());
    let (mut handler, mut peer) = new_handler_with_hooks(SessionConfig::new(0, true), hooks.clone());
    handler.start().await.unwrap();

    peer.send_raw(&[0xf0, 0x00]).await;

    wait_for_flag(&hooks.connection_closed).await;
    handler.stop().await.unwrap();
}

// End-of-stream terminates the reader cleanly.
#[tokio::test]
async fn test_eof_stops_reader() {
    init_logging();
    let hooks = Arc::new(RecordingHooks::default());
    let (mut handler, mut peer) = new_handler_with_hooks(SessionConfig::new(0, true), hooks.clone());
    handler.start().await.unwrap();

    peer.close().await;

    wait_for_flag(&hooks.connection_closed).await;
    handler.stop().await.unwrap();
}

// Keep-alive expiry on both directions is a soft event: the hooks run and
// the connection stays usable.
#[tokio::test]
async fn test_keep_alive_timeouts_are_soft() {
    init_logging();
    let hooks = Arc::new(RecordingHooks::default());
    let (mut handler, mut peer) = new_handler_with_hooks(SessionConfig::new(1, true), hooks.clone());
    handler.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(hooks.read_timeouts.load(Ordering::SeqCst) >= 1);
    assert!(hooks.write_timeouts.load(Ordering::SeqCst) >= 1);
    assert!(!hooks.connection_closed.load(Ordering::SeqCst));

    // Still alive: a publish goes through.
    handler
        .publish("t/alive", b"ping", QoS::AtMostOnce, false)
        .await
        .unwrap();
    let packet = peer.recv().await;
    assert!(matches!(packet, v3::Packet::Publish(_)));

    handler.stop().await.unwrap();
}

// With clean-session set, stop() drops open inbound QoS 2 flows.
#[tokio::test]
async fn test_stop_clean_session_drops_inbound_flows() {
    init_logging();
    let session = Arc::new(Session::new("clean-stop", SessionConfig::new(0, true)));
    let (mut handler, mut peer) =
        new_handler_with_session(session.clone(), Arc::new(petrel::DefaultHooks));
    handler.start().await.unwrap();

    let mut publish = v3::PublishPacket::new("t/3", QoS::ExactOnce, b"open").unwrap();
    publish.set_packet_id(PacketId::new(3));
    peer.send(publish).await;
    let v3::Packet::PublishReceived(_pubrec) = peer.recv().await else {
        panic!("expected PUBREC");
    };
    assert_eq!(session.inflight_in_ids(), vec![PacketId::new(3)]);

    handler.stop().await.unwrap();
    assert!(session.inflight_in_ids().is_empty());
}

// Without clean-session the open inbound flow survives for the peer's
// re-delivery in the next session.
#[tokio::test]
async fn test_stop_persistent_session_keeps_inbound_flows() {
    init_logging();
    let session = Arc::new(Session::new("sticky-stop", SessionConfig::new(0, false)));
    let (mut handler, mut peer) =
        new_handler_with_session(session.clone(), Arc::new(petrel::DefaultHooks));
    handler.start().await.unwrap();

    let mut publish = v3::PublishPacket::new("t/3", QoS::ExactOnce, b"open").unwrap();
    publish.set_packet_id(PacketId::new(3));
    peer.send(publish).await;
    let v3::Packet::PublishReceived(_pubrec) = peer.recv().await else {
        panic!("expected PUBREC");
    };

    handler.stop().await.unwrap();
    assert_eq!(session.inflight_in_ids(), vec![PacketId::new(3)]);
}

// Starting twice is a usage error, stopping twice is not.
#[tokio::test]
async fn test_start_twice_fails() {
    init_logging();
    let (mut handler, _peer) = new_handler_with_hooks(
        SessionConfig::new(0, true),
        Arc::new(petrel::DefaultHooks),
    );
    handler.start().await.unwrap();
    let err = handler.start().await.unwrap_err();
    assert_eq!(err.kind(), petrel::ErrorKind::StatusError);

    handler.stop().await.unwrap();
    handler.stop().await.unwrap();
}
