//! # Field Framing
//!
//! Timed primitives for reading and writing HostConnect fields.
//!
//! The stream is split once at accept time: the command loop owns the
//! [`FrameReader`] and the connection handle owns the [`FrameWriter`]. Every
//! read and every write is bounded by the half's current timeout, which the
//! session raises after authentication.
//!
//! Outbound frames are assembled in memory with [`FrameBuilder`] and written
//! with a single `write_all`, so a frame is never interleaved with another
//! writer's bytes.

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::command::Command;
use crate::error::{AuthFailure, ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;

/// Type-erased write half, so handles are not generic over the socket type.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Map a read failure to the transport taxonomy.
fn read_error(err: io::Error) -> ProtocolError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(err)
    }
}

fn decode_utf8(bytes: &[u8], field: &'static str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8(field))
}

/// Timed reader for the inbound half of a connection.
pub struct FrameReader<R> {
    inner: R,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Change the bound applied to every subsequent read.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read exactly `len` bytes.
    ///
    /// # Errors
    /// `ConnectionClosed` if the peer closes first, `Timeout` if the bound
    /// expires, `Io` for anything else.
    pub async fn read_exact_bytes(&mut self, len: usize) -> Result<Bytes> {
        let timeout = self.timeout;
        let inner = &mut self.inner;
        let mut buf = BytesMut::zeroed(len);
        with_timeout_error(
            async {
                inner.read_exact(&mut buf).await.map_err(read_error)?;
                Ok(())
            },
            timeout,
        )
        .await?;
        Ok(buf.freeze())
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let timeout = self.timeout;
        let inner = &mut self.inner;
        let mut buf = [0u8; N];
        with_timeout_error(
            async {
                inner.read_exact(&mut buf).await.map_err(read_error)?;
                Ok(())
            },
            timeout,
        )
        .await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.read_array::<1>().await?;
        Ok(byte)
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>().await?))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>().await?))
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array::<4>().await?))
    }

    /// Read `len` bytes and decode them as UTF-8.
    pub async fn read_utf8(&mut self, len: usize, field: &'static str) -> Result<String> {
        let bytes = self.read_exact_bytes(len).await?;
        decode_utf8(&bytes, field)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Timed writer for the outbound half of a connection.
pub struct FrameWriter<W> {
    inner: W,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write a complete frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let inner = &mut self.inner;
        with_timeout_error(
            async {
                inner.write_all(frame).await?;
                inner.flush().await?;
                Ok(())
            },
            timeout,
        )
        .await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Send + Unpin + 'static> FrameWriter<W> {
    /// Erase the concrete socket type.
    pub fn boxed(self) -> FrameWriter<BoxedWriter> {
        FrameWriter {
            inner: Box::new(self.inner),
            timeout: self.timeout,
        }
    }
}

/// In-memory frame assembly.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    /// Empty builder with no opcode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose first byte is `command`.
    pub fn command(command: Command) -> Self {
        let mut builder = Self::new();
        builder.put_u8(command.as_byte());
        builder
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// u8 length + UTF-8 bytes.
    pub fn put_utf8_u8(&mut self, field: &'static str, value: &str) -> Result<&mut Self> {
        let len = u8::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            length: value.len(),
            max: u8::MAX as usize,
        })?;
        self.buf.put_u8(len);
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    /// u16 length + UTF-8 bytes.
    pub fn put_utf8_u16(&mut self, field: &'static str, value: &str) -> Result<&mut Self> {
        self.put_bytes_u16(field, value.as_bytes())
    }

    /// u16 length + raw bytes.
    pub fn put_bytes_u16(&mut self, field: &'static str, value: &[u8]) -> Result<&mut Self> {
        let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            length: value.len(),
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Parser over the authentication response block.
///
/// The block is read from the socket in one piece, so running out of bytes
/// here means the host declared a block too short for its own fields.
#[derive(Debug)]
pub struct BlockReader {
    buf: Bytes,
}

impl BlockReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(AuthFailure::AuthResponseTruncated.into());
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn read_utf8(&mut self, len: usize, field: &'static str) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        decode_utf8(&bytes, field)
    }

    /// Bytes not yet consumed. Anything left after the known fields is
    /// ignored by the handshake.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}
