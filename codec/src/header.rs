// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fmt;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, VarInt, VarIntError};

/// Behavior shared by every control packet type.
pub trait Packet: Send + fmt::Debug {
    fn packet_type(&self) -> PacketType;

    /// Get total byte length of the encoded packet.
    ///
    /// # Errors
    ///
    /// Returns error if packet size exceeds the var-int range.
    fn bytes(&self) -> Result<usize, VarIntError>;
}

/// Control packet type with the per-type fixed-header flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Request to connect to broker
    #[default]
    Connect,

    /// Broker reply to connect request
    ConnectAck,

    /// Publish message
    Publish { dup: bool, qos: QoS, retain: bool },

    /// Publish acknowledgement
    PublishAck,

    /// Publish received
    PublishReceived,

    /// Publish release
    PublishRelease,

    /// Publish complete
    PublishComplete,

    /// Client subscribe request
    Subscribe,

    /// Subscribe acknowledgement
    SubscribeAck,

    /// Unsubscribe request
    Unsubscribe,

    /// Unsubscribe acknowledgement
    UnsubscribeAck,

    /// Client ping request
    PingRequest,

    /// Server ping response
    PingResponse,

    /// Client is disconnecting
    Disconnect,
}

impl PacketType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits: u8 = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
        };

        let flag_bits: u8 = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0b0000_0000 };
                let qos = match qos {
                    QoS::AtMostOnce => 0b0000_0000,
                    QoS::AtLeastOnce => 0b0000_0010,
                    QoS::ExactOnce => 0b0000_0100,
                };
                let retain = if retain { 0b0000_0001 } else { 0b0000_0000 };
                dup | qos | retain
            }
            // Bits 3,2,1 and 0 of the fixed header in the PUBREL, SUBSCRIBE and
            // UNSUBSCRIBE Control Packets are reserved and MUST be set to
            // 0,0,1 and 0 respectively [MQTT-3.6.1-1].
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe => {
                0b0000_0010
            }
            _ => 0b0000_0000,
        };

        (type_bits << 4) | flag_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// Parse packet type from the first byte of the fixed header.
    ///
    /// Where a flag bit is marked as "Reserved", it MUST be set to the
    /// listed value; if invalid flags are received, the receiver MUST close
    /// the Network Connection [MQTT-2.2.2-2].
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacketType` for the reserved type values 0 and 15,
    /// `InvalidPacketFlags` for unexpected flag bits.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        let packet_type = match type_bits {
            1 => Self::Connect,
            2 => Self::ConnectAck,
            3 => {
                let dup = flag & 0b0000_1000 == 0b0000_1000;
                let retain = flag & 0b0000_0001 == 0b0000_0001;
                let qos = match flag & 0b0000_0110 {
                    0b0000_0000 => QoS::AtMostOnce,
                    0b0000_0010 => QoS::AtLeastOnce,
                    0b0000_0100 => QoS::ExactOnce,
                    _ => return Err(DecodeError::InvalidPacketFlags),
                };
                return Ok(Self::Publish { dup, qos, retain });
            }
            4 => Self::PublishAck,
            5 => Self::PublishReceived,
            6 => Self::PublishRelease,
            7 => Self::PublishComplete,
            8 => Self::Subscribe,
            9 => Self::SubscribeAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubscribeAck,
            12 => Self::PingRequest,
            13 => Self::PingResponse,
            14 => Self::Disconnect,
            t => {
                // Types 0 and 15 are reserved in MQTT 3.1.1.
                log::error!("header: Got reserved packet type: {t:#b}");
                return Err(DecodeError::InvalidPacketType);
            }
        };

        let expected_flag = match packet_type {
            Self::PublishRelease | Self::Subscribe | Self::Unsubscribe => 0b0000_0010,
            _ => 0b0000_0000,
        };
        if flag == expected_flag {
            Ok(packet_type)
        } else {
            log::error!("header: Got packet flag {flag:#b} in {packet_type:?}");
            Err(DecodeError::InvalidPacketFlags)
        }
    }
}

/// Fixed header part of a mqtt control packet. It consists of at least two bytes.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,

    /// Number of bytes in the current packet after the fixed header itself,
    /// variable-length encoded.
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header with `packet_type` and `remaining_length`.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` is out of range.
    pub const fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = match VarInt::from(remaining_length) {
            Ok(len) => len,
            Err(err) => return Err(err),
        };
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flag = ba.read_byte()?;
        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = VarInt::decode(ba)?;

        Ok(Self {
            packet_type,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let packet_type: u8 = self.packet_type.into();
        buf.push(packet_type);
        let len_bytes = self.remaining_length.encode(buf)?;
        Ok(PacketType::bytes() + len_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_publish_header() {
        let buf = [0x3d, 0x0e];
        let mut ba = ByteArray::new(&buf);
        let fixed_header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(
            fixed_header.packet_type(),
            PacketType::Publish {
                dup: true,
                qos: QoS::ExactOnce,
                retain: true,
            }
        );
        assert_eq!(fixed_header.remaining_length(), 14);
    }

    #[test]
    fn test_decode_reserved_type() {
        let buf = [0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidPacketType)
        );

        let buf = [0xf0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidPacketType)
        );
    }

    #[test]
    fn test_decode_bad_pubrel_flags() {
        // PUBREL with flags 0b0000 is malformed, reserved bits must be 0010.
        let buf = [0x60, 0x02, 0x00, 0x01];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
