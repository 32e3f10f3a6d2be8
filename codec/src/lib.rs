// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Packet codec for MQTT 3.1.1.
//!
//! Every control packet implements [`EncodePacket`] and [`DecodePacket`] and
//! can be framed independently. The [`v3`] module contains one type per
//! control packet plus a [`v3::Packet`] sum type for dispatch.

mod base;
mod byte_array;
mod data;
mod error;
mod header;
mod packet_id;
pub mod topic;
pub mod utils;
pub mod v3;
mod var_int;

pub use base::{DecodePacket, EncodePacket, ProtocolLevel, QoS, PROTOCOL_NAME};
pub use byte_array::{ByteArray, ByteArrayError};
pub use data::{BinaryData, StringData};
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketId;
pub use topic::PubTopic;
pub use var_int::{VarInt, VarIntError, MAX_PACKET_LEN};
