// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketId, PacketType, VarIntError,
};

use super::{
    ConnectAckPacket, ConnectPacket, DisconnectPacket, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};

/// Sum of all MQTT 3.1.1 control packets.
///
/// Used where a packet has to be handled without knowing its type up front,
/// like reader-side dispatch or packet observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    /// Decode one complete packet from `buf`.
    ///
    /// # Errors
    ///
    /// Returns error if the fixed header or the typed body is malformed.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        // Each typed decoder consumes its own fixed header, so peek the
        // type from a separate cursor first.
        let mut peek = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut peek)?;

        let mut ba = ByteArray::new(buf);
        match fixed_header.packet_type() {
            PacketType::Connect => ConnectPacket::decode(&mut ba).map(Self::Connect),
            PacketType::ConnectAck => ConnectAckPacket::decode(&mut ba).map(Self::ConnectAck),
            PacketType::Publish { .. } => PublishPacket::decode(&mut ba).map(Self::Publish),
            PacketType::PublishAck => PublishAckPacket::decode(&mut ba).map(Self::PublishAck),
            PacketType::PublishReceived => {
                PublishReceivedPacket::decode(&mut ba).map(Self::PublishReceived)
            }
            PacketType::PublishRelease => {
                PublishReleasePacket::decode(&mut ba).map(Self::PublishRelease)
            }
            PacketType::PublishComplete => {
                PublishCompletePacket::decode(&mut ba).map(Self::PublishComplete)
            }
            PacketType::Subscribe => SubscribePacket::decode(&mut ba).map(Self::Subscribe),
            PacketType::SubscribeAck => SubscribeAckPacket::decode(&mut ba).map(Self::SubscribeAck),
            PacketType::Unsubscribe => UnsubscribePacket::decode(&mut ba).map(Self::Unsubscribe),
            PacketType::UnsubscribeAck => {
                UnsubscribeAckPacket::decode(&mut ba).map(Self::UnsubscribeAck)
            }
            PacketType::PingRequest => PingRequestPacket::decode(&mut ba).map(Self::PingRequest),
            PacketType::PingResponse => PingResponsePacket::decode(&mut ba).map(Self::PingResponse),
            PacketType::Disconnect => DisconnectPacket::decode(&mut ba).map(Self::Disconnect),
        }
    }

    /// Get packet identifier, for packet types which carry one.
    #[must_use]
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            Self::Publish(p) => {
                if p.packet_id().is_zero() {
                    None
                } else {
                    Some(p.packet_id())
                }
            }
            Self::PublishAck(p) => Some(p.packet_id()),
            Self::PublishReceived(p) => Some(p.packet_id()),
            Self::PublishRelease(p) => Some(p.packet_id()),
            Self::PublishComplete(p) => Some(p.packet_id()),
            Self::Subscribe(p) => Some(p.packet_id()),
            Self::SubscribeAck(p) => Some(p.packet_id()),
            Self::Unsubscribe(p) => Some(p.packet_id()),
            Self::UnsubscribeAck(p) => Some(p.packet_id()),
            _ => None,
        }
    }
}

impl EncodePacket for Packet {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnectAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PublishAck(p) => p.encode(buf),
            Self::PublishReceived(p) => p.encode(buf),
            Self::PublishRelease(p) => p.encode(buf),
            Self::PublishComplete(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubscribeAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubscribeAck(p) => p.encode(buf),
            Self::PingRequest(p) => p.encode(buf),
            Self::PingResponse(p) => p.encode(buf),
            Self::Disconnect(p) => p.encode(buf),
        }
    }
}

impl PacketTrait for Packet {
    fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(p) => p.packet_type(),
            Self::ConnectAck(p) => p.packet_type(),
            Self::Publish(p) => p.packet_type(),
            Self::PublishAck(p) => p.packet_type(),
            Self::PublishReceived(p) => p.packet_type(),
            Self::PublishRelease(p) => p.packet_type(),
            Self::PublishComplete(p) => p.packet_type(),
            Self::Subscribe(p) => p.packet_type(),
            Self::SubscribeAck(p) => p.packet_type(),
            Self::Unsubscribe(p) => p.packet_type(),
            Self::UnsubscribeAck(p) => p.packet_type(),
            Self::PingRequest(p) => p.packet_type(),
            Self::PingResponse(p) => p.packet_type(),
            Self::Disconnect(p) => p.packet_type(),
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        match self {
            Self::Connect(p) => p.bytes(),
            Self::ConnectAck(p) => p.bytes(),
            Self::Publish(p) => p.bytes(),
            Self::PublishAck(p) => p.bytes(),
            Self::PublishReceived(p) => p.bytes(),
            Self::PublishRelease(p) => p.bytes(),
            Self::PublishComplete(p) => p.bytes(),
            Self::Subscribe(p) => p.bytes(),
            Self::SubscribeAck(p) => p.bytes(),
            Self::Unsubscribe(p) => p.bytes(),
            Self::UnsubscribeAck(p) => p.bytes(),
            Self::PingRequest(p) => p.bytes(),
            Self::PingResponse(p) => p.bytes(),
            Self::Disconnect(p) => p.bytes(),
        }
    }
}

macro_rules! packet_from {
    ($variant:ident, $packet:ty) => {
        impl From<$packet> for Packet {
            fn from(packet: $packet) -> Self {
                Self::$variant(packet)
            }
        }
    };
}

packet_from!(Connect, ConnectPacket);
packet_from!(ConnectAck, ConnectAckPacket);
packet_from!(Publish, PublishPacket);
packet_from!(PublishAck, PublishAckPacket);
packet_from!(PublishReceived, PublishReceivedPacket);
packet_from!(PublishRelease, PublishReleasePacket);
packet_from!(PublishComplete, PublishCompletePacket);
packet_from!(Subscribe, SubscribePacket);
packet_from!(SubscribeAck, SubscribeAckPacket);
packet_from!(Unsubscribe, UnsubscribePacket);
packet_from!(UnsubscribeAck, UnsubscribeAckPacket);
packet_from!(PingRequest, PingRequestPacket);
packet_from!(PingResponse, PingResponsePacket);
packet_from!(Disconnect, DisconnectPacket);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QoS;

    #[test]
    fn test_decode_dispatch() {
        let buf = [0x40, 0x02, 0x00, 0x07];
        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(
            packet,
            Packet::PublishAck(PublishAckPacket::new(PacketId::new(7)))
        );
        assert_eq!(packet.packet_id(), Some(PacketId::new(7)));
    }

    #[test]
    fn test_qos0_publish_has_no_packet_id() {
        let publish = PublishPacket::new("t/1", QoS::AtMostOnce, b"hi").unwrap();
        let packet = Packet::from(publish);
        assert_eq!(packet.packet_id(), None);
    }
}
