// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;

use crate::session::IncomingMessage;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Send packet error.
    SendError,

    /// The underlying reader or writer reported end-of-stream or reset.
    TransportClosed,

    /// Reserved packet type, malformed flags, or a duplicate waiter
    /// registration. Fatal to the connection.
    ProtocolViolation,

    /// A message with the same packet id is already in flight.
    FlowDuplicate,

    /// A publish flow exceeded its acknowledgement timeout. The in-flight
    /// entry is retained for resume.
    FlowTimeout,

    /// The awaited acknowledgement slot was dropped before completion.
    FlowCancelled,

    /// No free packet identifier is left in this session.
    PacketIdExhausted,

    /// mpsc channel error.
    ChannelError,

    /// An event listener failed or timed out.
    PluginError,

    /// Handler is in the wrong state for the requested operation.
    StatusError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        match err {
            // Reserved packet types and malformed reserved flags close the
            // connection as a protocol error [MQTT-2.2.2-2].
            codec::DecodeError::InvalidPacketType | codec::DecodeError::InvalidPacketFlags => {
                Self::from_string(ErrorKind::ProtocolViolation, format!("{err:?}"))
            }
            _ => Self::from_string(ErrorKind::DecodeError, format!("{err:?}")),
        }
    }
}

impl From<mpsc::error::SendError<IncomingMessage>> for Error {
    fn from(err: mpsc::error::SendError<IncomingMessage>) -> Self {
        Self::from_string(
            ErrorKind::ChannelError,
            format!("Delivered message queue error: {err}"),
        )
    }
}

impl From<Elapsed> for Error {
    fn from(err: Elapsed) -> Self {
        Self::from_string(ErrorKind::FlowTimeout, format!("{err}"))
    }
}
