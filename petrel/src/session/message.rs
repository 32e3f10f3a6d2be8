// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-message state of one QoS flow.

use bytes::Bytes;

use codec::v3::{
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket,
};
use codec::{PacketId, QoS};

use crate::error::Error;

/// An application message published by this endpoint, together with the
/// packets its flow has produced so far.
///
/// The recorded packets double as the flow position: a QoS 2 message with a
/// PUBREC but no PUBCOMP resumes in the release phase.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    packet_id: Option<PacketId>,
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,

    pub(crate) publish_packet: Option<PublishPacket>,
    pub(crate) puback_packet: Option<PublishAckPacket>,
    pub(crate) pubrec_packet: Option<PublishReceivedPacket>,
    pub(crate) pubrel_packet: Option<PublishReleasePacket>,
    pub(crate) pubcomp_packet: Option<PublishCompletePacket>,
}

impl OutgoingMessage {
    /// Create a new outgoing message.
    ///
    /// Messages with `qos` > 0 need a packet id; QoS 0 messages carry none.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid publish topic.
    pub fn new(
        packet_id: Option<PacketId>,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Self, Error> {
        // Validate the topic early so a bad publish call fails before
        // touching session state.
        let _check = codec::PubTopic::new(topic).map_err(Error::from)?;
        Ok(Self {
            packet_id,
            topic: topic.to_owned(),
            payload: Bytes::copy_from_slice(payload),
            qos,
            retain,
            publish_packet: None,
            puback_packet: None,
            pubrec_packet: None,
            pubrel_packet: None,
            pubcomp_packet: None,
        })
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn publish_packet(&self) -> Option<&PublishPacket> {
        self.publish_packet.as_ref()
    }

    #[must_use]
    pub const fn puback_packet(&self) -> Option<&PublishAckPacket> {
        self.puback_packet.as_ref()
    }

    #[must_use]
    pub const fn pubrec_packet(&self) -> Option<&PublishReceivedPacket> {
        self.pubrec_packet.as_ref()
    }

    #[must_use]
    pub const fn pubcomp_packet(&self) -> Option<&PublishCompletePacket> {
        self.pubcomp_packet.as_ref()
    }

    /// Record a PUBREC observed in a previous connection, used when
    /// rehydrating a session from a store.
    pub fn record_pubrec(&mut self, packet: PublishReceivedPacket) {
        self.pubrec_packet = Some(packet);
    }

    /// Build the PUBLISH packet for this message.
    ///
    /// # Errors
    ///
    /// Returns error if the message fields cannot be encoded.
    pub(crate) fn build_publish_packet(&self, dup: bool) -> Result<PublishPacket, Error> {
        let mut packet =
            PublishPacket::new(&self.topic, self.qos, &self.payload).map_err(Error::from)?;
        packet.set_retain(self.retain);
        if let Some(packet_id) = self.packet_id {
            packet.set_packet_id(packet_id);
        }
        if dup {
            packet.set_dup(true).map_err(Error::from)?;
        }
        Ok(packet)
    }

    /// True once the terminal acknowledgement of this message's QoS level
    /// has been recorded.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        match self.qos {
            QoS::AtMostOnce => self.publish_packet.is_some(),
            QoS::AtLeastOnce => self.puback_packet.is_some(),
            QoS::ExactOnce => self.pubcomp_packet.is_some(),
        }
    }
}

/// An application message received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    packet_id: Option<PacketId>,
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    dup: bool,

    pub(crate) pubrec_packet: Option<PublishReceivedPacket>,
    pub(crate) pubrel_packet: Option<PublishReleasePacket>,

    delivery_acknowledged: bool,
}

impl IncomingMessage {
    #[must_use]
    pub(crate) fn from_publish(packet: &PublishPacket) -> Self {
        let packet_id = if packet.qos() == QoS::AtMostOnce {
            None
        } else {
            Some(packet.packet_id())
        };
        Self {
            packet_id,
            topic: packet.topic().to_owned(),
            payload: Bytes::copy_from_slice(packet.message()),
            qos: packet.qos(),
            retain: packet.retain(),
            dup: packet.dup(),
            pubrec_packet: None,
            pubrel_packet: None,
            delivery_acknowledged: false,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn pubrec_packet(&self) -> Option<&PublishReceivedPacket> {
        self.pubrec_packet.as_ref()
    }

    #[must_use]
    pub const fn pubrel_packet(&self) -> Option<&PublishReleasePacket> {
        self.pubrel_packet.as_ref()
    }

    /// Mark that the application has consumed this message.
    pub fn acknowledge_delivery(&mut self) {
        self.delivery_acknowledged = true;
    }

    #[must_use]
    pub const fn delivery_acknowledged(&self) -> bool {
        self.delivery_acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_publish_packet_dup_retry() {
        let message = OutgoingMessage::new(
            Some(PacketId::new(7)),
            "t/7",
            b"payload",
            QoS::AtLeastOnce,
            false,
        )
        .unwrap();

        let first = message.build_publish_packet(false).unwrap();
        assert!(!first.dup());
        assert_eq!(first.packet_id(), PacketId::new(7));

        let retry = message.build_publish_packet(true).unwrap();
        assert!(retry.dup());
        assert_eq!(retry.packet_id(), PacketId::new(7));
    }

    #[test]
    fn test_invalid_topic_rejected() {
        let result = OutgoingMessage::new(None, "bad/+/topic", b"", QoS::AtMostOnce, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_is_acknowledged_per_qos() {
        let mut qos1 =
            OutgoingMessage::new(Some(PacketId::new(1)), "t", b"", QoS::AtLeastOnce, false)
                .unwrap();
        assert!(!qos1.is_acknowledged());
        qos1.puback_packet = Some(PublishAckPacket::new(PacketId::new(1)));
        assert!(qos1.is_acknowledged());

        let mut qos2 =
            OutgoingMessage::new(Some(PacketId::new(2)), "t", b"", QoS::ExactOnce, false)
                .unwrap();
        qos2.pubrec_packet = Some(PublishReceivedPacket::new(PacketId::new(2)));
        assert!(!qos2.is_acknowledged());
        qos2.pubcomp_packet = Some(PublishCompletePacket::new(PacketId::new(2)));
        assert!(qos2.is_acknowledged());
    }
}
