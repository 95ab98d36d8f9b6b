//! Frame transports.
//!
//! A session starts out on a [`LengthPrefixed`] transport over the raw TCP
//! socket. Plugins may swap it for another [`Transport`] during the handshake
//! (see [`crate::session::PreSession::modify_socket`]), e.g. a WebSocket
//! transport that carries one frame per binary message.

use crate::error::WireError;
use crate::message::MAX_FRAME_SIZE;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A raw, unframed byte stream.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> RawStream for T {}

/// Boxed raw byte stream.
pub type Socket = Box<dyn RawStream>;

/// Moves whole frames over a connection.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Short transport name for logs.
    fn kind(&self) -> &'static str;

    /// Read the next frame. `Ok(None)` means the peer closed the connection
    /// cleanly.
    ///
    /// Must be cancel safe: the session loop polls it inside `select!`.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, WireError>;

    /// Write one frame.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), WireError>;

    /// Give back the raw socket so it can be re-wrapped. Transports that
    /// can't (already upgraded, or holding buffered input) return themselves.
    fn into_socket(self: Box<Self>) -> Result<Socket, Box<dyn Transport>>;
}

/// 4-byte big-endian length prefix + frame, straight on the socket.
pub struct LengthPrefixed {
    socket: Socket,
    buf: BytesMut,
}

impl LengthPrefixed {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Split a complete frame off the read buffer, if one is there.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buf.len() < 4 + len {
            self.buf.reserve(4 + len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).to_vec()))
    }
}

#[async_trait]
impl Transport for LengthPrefixed {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }
            // `read_buf` is cancel safe; partial frames stay in `buf`.
            if self.socket.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(WireError::ConnectionClosed)
                };
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), WireError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.socket
            .write_all(&(frame.len() as u32).to_be_bytes())
            .await?;
        self.socket.write_all(frame).await?;
        self.socket.flush().await?;
        Ok(())
    }

    fn into_socket(self: Box<Self>) -> Result<Socket, Box<dyn Transport>> {
        if self.buf.is_empty() {
            Ok(self.socket)
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = LengthPrefixed::new(Box::new(a));
        let mut right = LengthPrefixed::new(Box::new(b));

        let big = vec![7u8; 1000];
        let writer = tokio::spawn(async move {
            left.write_frame(b"hello").await.unwrap();
            left.write_frame(&big).await.unwrap();
            left.write_frame(b"").await.unwrap();
        });

        assert_eq!(right.read_frame().await.unwrap().unwrap(), b"hello");
        assert_eq!(right.read_frame().await.unwrap().unwrap().len(), 1000);
        assert_eq!(right.read_frame().await.unwrap().unwrap(), b"");
        writer.await.unwrap();
        // Writer half dropped: clean EOF.
        assert!(right.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut right = LengthPrefixed::new(Box::new(b));
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(
            right.read_frame().await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut right = LengthPrefixed::new(Box::new(b));
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(
            right.read_frame().await,
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_into_socket_refuses_buffered_input() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut right: Box<dyn Transport> = Box::new(LengthPrefixed::new(Box::new(b)));
        // Fresh transport hands its socket back.
        let socket = right.into_socket().ok().unwrap();
        right = Box::new(LengthPrefixed::new(socket));

        // Half a frame sitting in the buffer pins the socket.
        a.write_all(&[0, 0, 0, 5, 1]).await.unwrap();
        drop(a);
        let _ = right.read_frame().await;
        assert!(right.into_socket().is_err());
    }
}
