// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketId, PacketType, PubTopic, QoS, VarIntError,
};

/// `PublishPacket` transports an application message from the Client to the
/// Server or from the Server to the Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet Identifier     |
/// |                       |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// The Packet Identifier field is only present where the `QoS` level is
/// 1 or 2.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishPacket {
    /// True if this packet might be a re-delivery of an earlier attempt.
    ///
    /// The DUP flag MUST be set to 0 for all `QoS` 0 messages [MQTT-3.3.1-2].
    dup: bool,

    /// Level of assurance for delivery of this message.
    qos: QoS,

    /// If true, the Server stores this message and delivers it to future
    /// subscribers of the topic.
    retain: bool,

    /// Topic name, free of wildcard characters.
    topic: PubTopic,

    /// Only meaningful if `qos` is 1 or 2.
    packet_id: PacketId,

    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            msg: Bytes::copy_from_slice(msg),
        })
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` is set on a `QoS` 0 packet [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidData);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let topic = PubTopic::decode(ba)?;

        // The Packet Identifier field is only present where the QoS level
        // is 1 or 2, and MUST be non-zero there [MQTT-2.3.1-1].
        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.is_zero() {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        // It is valid for a PUBLISH Packet to contain a zero length payload.
        let mut msg_len = fixed_header
            .remaining_length()
            .checked_sub(topic.bytes())
            .ok_or(DecodeError::InvalidRemainingLength)?;
        if qos != QoS::AtMostOnce {
            msg_len = msg_len
                .checked_sub(PacketId::bytes())
                .ok_or(DecodeError::InvalidRemainingLength)?;
        }

        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl PacketTrait for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_qos0() {
        let buf = [
            0x30, 0x09, 0x00, 0x03, 0x74, 0x2f, 0x31, 0x68, 0x69, 0x21, 0x21,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.topic(), "t/1");
        assert_eq!(packet.qos(), QoS::AtMostOnce);
        assert_eq!(packet.packet_id(), PacketId::new(0));
        assert_eq!(packet.message(), b"hi!!");
    }

    #[test]
    fn test_encode_qos1_with_packet_id() {
        let mut packet = PublishPacket::new("t/2", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[0x32, 0x08, 0x00, 0x03, 0x74, 0x2f, 0x32, 0x00, 0x01, 0x78]
        );
    }

    #[test]
    fn test_decode_zero_packet_id_rejected() {
        let buf = [0x32, 0x08, 0x00, 0x03, 0x74, 0x2f, 0x32, 0x00, 0x00, 0x78];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }

    #[test]
    fn test_set_dup_rejected_for_qos0() {
        let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"p").unwrap();
        assert!(packet.set_dup(true).is_err());
    }
}
