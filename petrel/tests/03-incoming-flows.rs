// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Inbound publish flows for every QoS level.

use std::time::Duration;
use tokio::time::timeout;

use codec::v3;
use codec::{PacketId, QoS};
use petrel::SessionConfig;

mod common;
use common::{init_logging, new_handler};

#[tokio::test]
async fn test_incoming_qos0_is_delivered() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    let publish = v3::PublishPacket::new("t/0", QoS::AtMostOnce, b"m").unwrap();
    peer.send(publish).await;

    let message = handler.deliver_next_message().await.unwrap();
    assert_eq!(message.topic(), "t/0");
    assert_eq!(message.payload(), b"m");
    assert_eq!(message.qos(), QoS::AtMostOnce);
    assert_eq!(message.packet_id(), None);

    handler.stop().await.unwrap();
}

// The DUP flag MUST be 0 on a QoS 0 publish; a violating packet is dropped
// without reaching the application.
#[tokio::test]
async fn test_incoming_qos0_with_dup_is_dropped() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    // PUBLISH, dup=1, qos=0, topic "t", payload "p".
    peer.send_raw(&[0x38, 0x04, 0x00, 0x01, 0x74, 0x70]).await;
    // A well-formed message afterwards.
    let publish = v3::PublishPacket::new("t/ok", QoS::AtMostOnce, b"ok").unwrap();
    peer.send(publish).await;

    // Only the well-formed message is observed.
    let message = handler.deliver_next_message().await.unwrap();
    assert_eq!(message.topic(), "t/ok");

    handler.stop().await.unwrap();
}

#[tokio::test]
async fn test_incoming_qos1_delivers_then_acks() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    let mut publish = v3::PublishPacket::new("t/5", QoS::AtLeastOnce, b"q1").unwrap();
    publish.set_packet_id(PacketId::new(5));
    peer.send(publish).await;

    let packet = peer.recv().await;
    let v3::Packet::PublishAck(puback) = packet else {
        panic!("expected PUBACK, got {packet:?}");
    };
    assert_eq!(puback.packet_id(), PacketId::new(5));

    // The ack is only sent once the message is queued for the application.
    let message = handler.deliver_next_message().await.unwrap();
    assert_eq!(message.topic(), "t/5");
    assert_eq!(message.packet_id(), Some(PacketId::new(5)));

    handler.stop().await.unwrap();
}

#[tokio::test]
async fn test_incoming_qos2_exactly_once_chain() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    let mut publish = v3::PublishPacket::new("t", QoS::ExactOnce, b"p").unwrap();
    publish.set_packet_id(PacketId::new(9));
    peer.send(publish).await;

    let packet = peer.recv().await;
    let v3::Packet::PublishReceived(pubrec) = packet else {
        panic!("expected PUBREC, got {packet:?}");
    };
    assert_eq!(pubrec.packet_id(), PacketId::new(9));
    assert_eq!(handler.session().inflight_in_ids(), vec![PacketId::new(9)]);

    // Nothing is delivered before PUBREL arrives.
    assert!(
        timeout(Duration::from_millis(100), handler.deliver_next_message())
            .await
            .is_err()
    );

    peer.send(v3::PublishReleasePacket::new(PacketId::new(9)))
        .await;

    let message = handler.deliver_next_message().await.unwrap();
    assert_eq!(message.topic(), "t");
    assert_eq!(message.payload(), b"p");

    let packet = peer.recv().await;
    let v3::Packet::PublishComplete(pubcomp) = packet else {
        panic!("expected PUBCOMP, got {packet:?}");
    };
    assert_eq!(pubcomp.packet_id(), PacketId::new(9));
    assert!(handler.session().inflight_in_ids().is_empty());

    handler.stop().await.unwrap();
}

// A duplicated QoS 2 PUBLISH while the flow is open is dropped; the open
// flow delivers the message exactly once.
#[tokio::test]
async fn test_incoming_qos2_duplicate_publish_delivers_once() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    let mut publish = v3::PublishPacket::new("t/dup", QoS::ExactOnce, b"once").unwrap();
    publish.set_packet_id(PacketId::new(9));
    peer.send(publish.clone()).await;

    let v3::Packet::PublishReceived(_pubrec) = peer.recv().await else {
        panic!("expected PUBREC");
    };

    // Re-delivery of the same packet while the flow is open.
    publish.set_dup(true).unwrap();
    peer.send(publish).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    peer.send(v3::PublishReleasePacket::new(PacketId::new(9)))
        .await;

    let message = handler.deliver_next_message().await.unwrap();
    assert_eq!(message.payload(), b"once");

    // The next frame is the PUBCOMP, not a second PUBREC.
    let packet = peer.recv().await;
    let v3::Packet::PublishComplete(pubcomp) = packet else {
        panic!("expected PUBCOMP, got {packet:?}");
    };
    assert_eq!(pubcomp.packet_id(), PacketId::new(9));

    // And exactly one message reached the application.
    assert!(
        timeout(Duration::from_millis(100), handler.deliver_next_message())
            .await
            .is_err()
    );

    handler.stop().await.unwrap();
}

// acknowledge_delivery marks the open inbound flow; the broker-side ack was
// already handled by the protocol.
#[tokio::test]
async fn test_acknowledge_delivery_is_housekeeping_only() {
    init_logging();
    let (mut handler, mut peer) = new_handler(SessionConfig::new(0, true));
    handler.start().await.unwrap();

    // Unknown packet id is a no-op.
    handler.acknowledge_delivery(PacketId::new(42));

    let mut publish = v3::PublishPacket::new("t/6", QoS::ExactOnce, b"x").unwrap();
    publish.set_packet_id(PacketId::new(6));
    peer.send(publish).await;
    let v3::Packet::PublishReceived(_pubrec) = peer.recv().await else {
        panic!("expected PUBREC");
    };

    // Flow is open, the mark lands on the in-flight entry.
    handler.acknowledge_delivery(PacketId::new(6));

    handler.stop().await.unwrap();
}
