// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Acknowledgement dispatch.
//!
//! Each handler looks up the waiter registered under the packet id and
//! fulfills it with the received packet. Late and duplicated
//! acknowledgements are logged and discarded inside the registry.

use codec::v3::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
};

use super::HandlerInner;

pub(super) fn on_publish_ack(inner: &HandlerInner, packet: &PublishAckPacket) {
    inner.waiters.puback.complete(packet.packet_id(), *packet);
}

pub(super) fn on_publish_received(inner: &HandlerInner, packet: &PublishReceivedPacket) {
    inner.waiters.pubrec.complete(packet.packet_id(), *packet);
}

pub(super) fn on_publish_release(inner: &HandlerInner, packet: &PublishReleasePacket) {
    inner.waiters.pubrel.complete(packet.packet_id(), *packet);
}

pub(super) fn on_publish_complete(inner: &HandlerInner, packet: &PublishCompletePacket) {
    inner.waiters.pubcomp.complete(packet.packet_id(), *packet);
}
