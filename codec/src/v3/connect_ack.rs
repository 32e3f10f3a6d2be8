// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketType, VarIntError,
};

/// Result of a connection attempt, as reported by the broker.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The Server does not support the level of the MQTT protocol requested
    /// by the Client.
    UnacceptedProtocol = 1,

    /// The Client identifier is correct UTF-8 but not allowed by the Server.
    IdentifierRejected = 2,

    /// The Network Connection has been made but the MQTT service is
    /// unavailable.
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed.
    MalformedUsernamePassword = 4,

    /// The Client is not authorized to connect.
    Unauthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptedProtocol),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::MalformedUsernamePassword),
            5 => Ok(Self::Unauthorized),
            // Values 6-255 are reserved for future use.
            _ => Err(DecodeError::OutOfRange),
        }
    }
}

/// The packet sent by the Server in response to a CONNECT Packet.
///
/// The first packet sent from the Server to the Client MUST be a CONNACK
/// Packet [MQTT-3.2.0-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAckPacket {
    /// True if the Server already holds session state for the client id
    /// presented in CONNECT.
    ///
    /// If a server sends a CONNACK packet containing a non-zero return code
    /// it MUST set Session Present to 0 [MQTT-3.2.2-4].
    session_present: bool,

    return_code: ConnectReturnCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        let session_present = session_present && return_code == ConnectReturnCode::Accepted;
        Self {
            session_present,
            return_code,
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn return_code(&self) -> ConnectReturnCode {
        self.return_code
    }

    const fn remaining_length() -> usize {
        // Acknowledge flags byte + return code byte.
        2
    }
}

impl EncodePacket for ConnectAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::ConnectAck, Self::remaining_length())?;
        fixed_header.encode(buf)?;

        buf.push(u8::from(self.session_present));
        buf.push(self.return_code as u8);

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != Self::remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let ack_flags = ba.read_byte()?;
        // Bits 7-1 of the Connect Acknowledge Flags are reserved and MUST be
        // set to 0 [MQTT-3.2.2-1].
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 != 0;
        let return_code = ConnectReturnCode::try_from(ba.read_byte()?)?;

        Ok(Self {
            session_present,
            return_code,
        })
    }
}

impl PacketTrait for ConnectAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnectAck
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::ConnectAck, Self::remaining_length())?;
        Ok(fixed_header.bytes() + Self::remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let buf = [0x20, 0x02, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectAckPacket::decode(&mut ba).unwrap();
        assert!(packet.session_present());
        assert_eq!(packet.return_code(), ConnectReturnCode::Accepted);
    }
}
