// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet as PacketTrait, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
    PROTOCOL_NAME,
};

/// Flag byte of the CONNECT variable header.
///
/// ```txt
///  7        6        5           4  3      2     1        0
/// +--------+--------+-----------+--------+------+--------+----------+
/// |username|password|will retain|will qos|will  |clean   |reserved  |
/// |        |        |           |        |flag  |session |          |
/// +--------+--------+-----------+--------+------+--------+----------+
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags {
    clean_session: bool,
    will: bool,
    will_qos: QoS,
    will_retain: bool,
    has_username: bool,
    has_password: bool,
}

impl ConnectFlags {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_will(&mut self, will: bool) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> bool {
        self.will
    }

    pub fn set_will_qos(&mut self, qos: QoS) -> &mut Self {
        self.will_qos = qos;
        self
    }

    #[must_use]
    pub const fn will_qos(&self) -> QoS {
        self.will_qos
    }

    pub fn set_will_retain(&mut self, retain: bool) -> &mut Self {
        self.will_retain = retain;
        self
    }

    #[must_use]
    pub const fn will_retain(&self) -> bool {
        self.will_retain
    }

    pub fn set_has_username(&mut self, has_username: bool) -> &mut Self {
        self.has_username = has_username;
        self
    }

    #[must_use]
    pub const fn has_username(&self) -> bool {
        self.has_username
    }

    pub fn set_has_password(&mut self, has_password: bool) -> &mut Self {
        self.has_password = has_password;
        self
    }

    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.has_password
    }
}

impl DecodePacket for ConnectFlags {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flag = ba.read_byte()?;

        // The Server MUST validate that the reserved flag in the CONNECT
        // Control Packet is set to zero and disconnect the Client if it is
        // not zero [MQTT-3.1.2-3].
        if flag & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let clean_session = flag & 0b0000_0010 != 0;
        let will = flag & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flag & 0b0001_1000) >> 3)?;
        let will_retain = flag & 0b0010_0000 != 0;
        let has_password = flag & 0b0100_0000 != 0;
        let has_username = flag & 0b1000_0000 != 0;

        Ok(Self {
            clean_session,
            will,
            will_qos,
            will_retain,
            has_username,
            has_password,
        })
    }
}

impl EncodePacket for ConnectFlags {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut flag = 0u8;
        if self.clean_session {
            flag |= 0b0000_0010;
        }
        if self.will {
            flag |= 0b0000_0100;
        }
        flag |= (self.will_qos as u8) << 3;
        if self.will_retain {
            flag |= 0b0010_0000;
        }
        if self.has_password {
            flag |= 0b0100_0000;
        }
        if self.has_username {
            flag |= 0b1000_0000;
        }
        buf.push(flag);
        Ok(Self::bytes())
    }
}

/// First packet sent by the client after the network connection is
/// established.
///
/// The variable header carries the protocol name and level, the connect
/// flags and the keep-alive interval; the payload carries the client id and
/// the optional will topic/message and credentials, in that order.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,

    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    /// Time interval between two control packets in seconds. Zero turns the
    /// keep alive mechanism off.
    keep_alive: u16,

    /// Identifies the session on the server side. Must be a valid UTF-8
    /// string; an empty id is only allowed together with clean-session.
    client_id: StringData,

    will_topic: Option<PubTopic>,
    will_message: BinaryData,

    username: StringData,
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        let protocol_name = StringData::from(PROTOCOL_NAME).map_err(EncodeError::from)?;
        let client_id = StringData::from(client_id).map_err(EncodeError::from)?;
        Ok(Self {
            protocol_name,
            keep_alive: 60,
            client_id,
            ..Self::default()
        })
    }

    #[must_use]
    #[inline]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    pub fn set_connect_flags(&mut self, flags: ConnectFlags) -> &mut Self {
        self.connect_flags = flags;
        self
    }

    #[must_use]
    #[inline]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    #[inline]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        self.client_id = StringData::from(client_id).map_err(|_err| EncodeError::InvalidClientId)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update will topic and message, and the will flag accordingly.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `message` too long.
    pub fn set_will(&mut self, topic: &str, message: &[u8]) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.connect_flags.set_will(true);
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    /// Update username value.
    ///
    /// # Errors
    ///
    /// Returns error if `username` contains invalid chars or is too long.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username).map_err(EncodeError::from)?;
        self.connect_flags.set_has_username(!username.is_empty());
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Update password value.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too long.
    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        self.connect_flags.set_has_password(!password.is_empty());
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.protocol_name.bytes()
            + ProtocolLevel::bytes()
            + ConnectFlags::bytes()
            + 2  // keep_alive
            + self.client_id.bytes();

        if self.connect_flags.will() {
            if let Some(will_topic) = &self.will_topic {
                remaining_length += will_topic.bytes();
            }
            remaining_length += self.will_message.bytes();
        }
        if self.connect_flags.has_username() {
            remaining_length += self.username.bytes();
        }
        if self.connect_flags.has_password() {
            remaining_length += self.password.bytes();
        }
        FixedHeader::new(PacketType::Connect, remaining_length)
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;

        self.protocol_name.encode(buf)?;
        self.protocol_level.encode(buf)?;
        self.connect_flags.encode(buf)?;
        buf.write_u16::<BigEndian>(self.keep_alive)?;

        self.client_id.encode(buf)?;
        if self.connect_flags.will() {
            if let Some(will_topic) = &self.will_topic {
                will_topic.encode(buf)?;
            }
            self.will_message.encode(buf)?;
        }
        if self.connect_flags.has_username() {
            self.username.encode(buf)?;
        }
        if self.connect_flags.has_password() {
            self.password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;

        let connect_flags = ConnectFlags::decode(ba)?;

        // If the Will Flag is set to 0 the Will QoS and Will Retain fields
        // MUST be set to zero [MQTT-3.1.2-11].
        if !connect_flags.will()
            && (connect_flags.will_qos() != QoS::AtMostOnce || connect_flags.will_retain())
        {
            return Err(DecodeError::InvalidConnectFlags);
        }

        // If the User Name Flag is set to 0, the Password Flag MUST be set
        // to 0 [MQTT-3.1.2-22].
        if !connect_flags.has_username() && connect_flags.has_password() {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = ba.read_u16()?;

        let client_id = StringData::decode(ba).map_err(|_err| DecodeError::InvalidClientId)?;

        // If the Client supplies a zero-byte ClientId, the Client MUST also
        // set CleanSession to 1 [MQTT-3.1.3-7].
        if client_id.is_empty() && !connect_flags.clean_session() {
            return Err(DecodeError::InvalidClientId);
        }

        let will_topic = if connect_flags.will() {
            Some(PubTopic::decode(ba)?)
        } else {
            None
        };
        let will_message = if connect_flags.will() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        let username = if connect_flags.has_username() {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };
        let password = if connect_flags.has_password() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            connect_flags,
            keep_alive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl PacketTrait for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
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
    fn test_decode() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert_eq!(packet.keep_alive(), 60);
        assert!(packet.connect_flags().clean_session());
    }

    #[test]
    fn test_decode_reserved_flag_set() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 3, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }
}
