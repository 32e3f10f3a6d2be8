// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Control packets of MQTT 3.1.1.

mod acks;
mod connect;
mod connect_ack;
mod control;
mod packet;
mod publish;
mod subscribe;
mod subscribe_ack;
mod unsubscribe;

pub use acks::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
    UnsubscribeAckPacket,
};
pub use connect::{ConnectFlags, ConnectPacket};
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use control::{DisconnectPacket, PingRequestPacket, PingResponsePacket};
pub use packet::Packet;
pub use publish::PublishPacket;
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAck, SubscribeAckPacket};
pub use unsubscribe::UnsubscribePacket;
