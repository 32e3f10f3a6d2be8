// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Control packets with an empty variable header and payload.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketType, VarIntError,
};

macro_rules! empty_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:expr) => {
        $(#[$doc])*
        ///
        /// The packet consists of the fixed header only.
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {}

        impl $name {
            #[must_use]
            pub const fn new() -> Self {
                Self {}
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let fixed_header = FixedHeader::new($packet_type, 0)?;
                fixed_header.encode(buf)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    Err(DecodeError::InvalidPacketType)
                } else if fixed_header.remaining_length() != 0 {
                    Err(DecodeError::InvalidRemainingLength)
                } else {
                    Ok(Self {})
                }
            }
        }

        impl PacketTrait for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn bytes(&self) -> Result<usize, VarIntError> {
                let fixed_header = FixedHeader::new($packet_type, 0)?;
                Ok(fixed_header.bytes())
            }
        }
    };
}

empty_packet!(
    /// Sent by the client to probe that the connection is alive.
    ///
    /// In the absence of sending any other Control Packets, the Client MUST
    /// send a PINGREQ Packet [MQTT-3.1.2-23].
    PingRequestPacket,
    PacketType::PingRequest
);

empty_packet!(
    /// Broker reply to a PINGREQ packet.
    PingResponsePacket,
    PacketType::PingResponse
);

empty_packet!(
    /// Final packet sent by the client before closing the connection.
    ///
    /// After sending a DISCONNECT Packet the Client MUST NOT send any more
    /// Control Packets on that Network Connection [MQTT-3.14.4-2].
    DisconnectPacket,
    PacketType::Disconnect
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ping_request() {
        let packet = PingRequestPacket::new();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xc0, 0x00]);
    }

    #[test]
    fn test_decode_disconnect() {
        let buf = [0xe0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert!(DisconnectPacket::decode(&mut ba).is_ok());
    }
}
