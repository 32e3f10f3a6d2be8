// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Framed packet adapters over a raw byte stream.
//!
//! The handler never touches the transport directly. [`PacketReader`] turns
//! any ordered byte source into a stream of decoded control packets and
//! [`PacketWriter`] turns control packets into bytes on the wire. TCP, TLS
//! or in-memory pipes all plug in through [`AsyncRead`] / [`AsyncWrite`].

use codec::{v3, ByteArray, DecodeError, DecodePacket, EncodePacket, FixedHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorKind};

/// Reads one fully-framed control packet at a time.
#[derive(Debug)]
pub struct PacketReader<R> {
    reader: R,

    /// Bytes received but not yet consumed by a complete frame.
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(1024),
        }
    }

    /// Read the next control packet.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, the stream ends inside a frame,
    /// or the frame is malformed.
    pub async fn read_packet(&mut self) -> Result<Option<v3::Packet>, Error> {
        loop {
            if let Some(frame_len) = self.frame_len()? {
                if self.buf.len() >= frame_len {
                    let frame: Vec<u8> = self.buf.drain(..frame_len).collect();
                    let packet = v3::Packet::decode(&frame)?;
                    return Ok(Some(packet));
                }
            }

            let n_recv = self.reader.read_buf(&mut self.buf).await.map_err(|err| {
                Error::from_string(ErrorKind::TransportClosed, format!("Read failed: {err}"))
            })?;
            if n_recv == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::new(
                    ErrorKind::TransportClosed,
                    "stream: Got EOF with a partial packet in buffer",
                ));
            }
        }
    }

    /// Total length of the frame at the head of the buffer, if the fixed
    /// header is complete.
    fn frame_len(&self) -> Result<Option<usize>, Error> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut ba = ByteArray::new(&self.buf);
        match FixedHeader::decode(&mut ba) {
            Ok(fixed_header) => Ok(Some(fixed_header.bytes() + fixed_header.remaining_length())),
            // The length field is still incomplete, wait for more bytes.
            Err(DecodeError::OutOfRange) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Serializes control packets to the byte sink.
///
/// The writer is a single-owner resource; the handler serializes access to
/// it so that frames from different tasks never interleave.
#[derive(Debug)]
pub struct PacketWriter<W> {
    writer: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Encode `packet` and write the whole frame.
    ///
    /// # Errors
    ///
    /// Returns error if the packet cannot be encoded, the writer is closed,
    /// or the transport fails.
    pub async fn write_packet(&mut self, packet: &v3::Packet) -> Result<(), Error> {
        if self.closed {
            return Err(Error::new(
                ErrorKind::SendError,
                "stream: Cannot send packet, writer is closed",
            ));
        }

        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.writer.write_all(&buf).await.map_err(|err| {
            Error::from_string(ErrorKind::TransportClosed, format!("Write failed: {err}"))
        })?;
        self.writer.flush().await.map_err(|err| {
            Error::from_string(ErrorKind::TransportClosed, format!("Flush failed: {err}"))
        })?;
        Ok(())
    }

    /// Shut the sink down. Calling this more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to shut down.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{PacketId, QoS};

    #[tokio::test]
    async fn test_read_packet_across_partial_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(rx);

        // PUBACK(id=3) split into two writes.
        tx.write_all(&[0x40]).await.unwrap();
        let read = tokio::spawn(async move { reader.read_packet().await });
        tx.write_all(&[0x02, 0x00, 0x03]).await.unwrap();

        let packet = read.await.unwrap().unwrap().unwrap();
        assert_eq!(
            packet,
            v3::Packet::PublishAck(v3::PublishAckPacket::new(PacketId::new(3)))
        );
    }

    #[tokio::test]
    async fn test_read_packet_eof() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut reader = PacketReader::new(rx);
        assert!(reader.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserved_packet_type_is_protocol_violation() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(&[0x00, 0x00]).await.unwrap();
        let mut reader = PacketReader::new(rx);
        let err = reader.read_packet().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn test_writer_close_is_idempotent() {
        let (tx, _rx) = tokio::io::duplex(64);
        let mut writer = PacketWriter::new(tx);
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let publish = v3::PublishPacket::new("t", QoS::AtMostOnce, b"x").unwrap();
        let err = writer
            .write_packet(&v3::Packet::Publish(publish))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SendError);
    }
}
