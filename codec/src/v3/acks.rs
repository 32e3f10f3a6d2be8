// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Acknowledgement packets whose whole body is one packet identifier.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketId, PacketType, VarIntError,
};

macro_rules! packet_id_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:expr) => {
        $(#[$doc])*
        ///
        /// Basic packet structure:
        /// ```txt
        ///  7                  0
        /// +--------------------+
        /// | Fixed header       |
        /// |                    |
        /// +--------------------+
        /// | Packet id          |
        /// |                    |
        /// +--------------------+
        /// ```
        ///
        /// This type of packet does not contain a payload.
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            packet_id: PacketId,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self { packet_id }
            }

            #[must_use]
            #[inline]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let old_len = buf.len();

                let fixed_header = FixedHeader::new($packet_type, PacketId::bytes())?;
                fixed_header.encode(buf)?;
                self.packet_id.encode(buf)?;
                Ok(buf.len() - old_len)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    Err(DecodeError::InvalidPacketType)
                } else if fixed_header.remaining_length() != PacketId::bytes() {
                    Err(DecodeError::InvalidRemainingLength)
                } else {
                    let packet_id = PacketId::decode(ba)?;
                    Ok(Self { packet_id })
                }
            }
        }

        impl PacketTrait for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn bytes(&self) -> Result<usize, VarIntError> {
                let fixed_header = FixedHeader::new($packet_type, PacketId::bytes())?;
                Ok(fixed_header.bytes() + PacketId::bytes())
            }
        }
    };
}

packet_id_packet!(
    /// Acknowledgement for a PUBLISH packet with `QoS` 1.
    ///
    /// Receipt of this packet completes the at-least-once flow on the
    /// sender side.
    PublishAckPacket,
    PacketType::PublishAck
);

packet_id_packet!(
    /// First acknowledgement of a `QoS` 2 PUBLISH, the receiver has stored
    /// the message.
    PublishReceivedPacket,
    PacketType::PublishReceived
);

packet_id_packet!(
    /// Second step of the `QoS` 2 flow, sent by the publisher in response
    /// to PUBREC.
    PublishReleasePacket,
    PacketType::PublishRelease
);

packet_id_packet!(
    /// Final acknowledgement of a `QoS` 2 flow.
    PublishCompletePacket,
    PacketType::PublishComplete
);

packet_id_packet!(
    /// Acknowledgement for an UNSUBSCRIBE request.
    UnsubscribeAckPacket,
    PacketType::UnsubscribeAck
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_publish_ack() {
        let packet = PublishAckPacket::new(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn test_decode_publish_release() {
        let buf = [0x62, 0x02, 0x00, 0x09];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishReleasePacket::decode(&mut ba).unwrap();
        assert_eq!(packet.packet_id(), PacketId::new(9));
    }

    #[test]
    fn test_decode_rejects_trailing_garbage_length() {
        let buf = [0x70, 0x03, 0x00, 0x09, 0xff];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishCompletePacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }
}
