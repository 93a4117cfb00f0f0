use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
};

use crate::resp::{self, Resp, RespError};

const INITIAL_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error")]
    Io(#[from] tokio::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] RespError),

    #[error("Peer closed the connection in the middle of a frame")]
    Truncated,
}

/// A decoded command together with the exact bytes it was received as.
#[derive(Debug, Clone)]
pub struct Frame {
    pub args: Vec<Bytes>,
    pub raw: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Buffered RESP transport over any byte stream.
///
/// Bytes read past the end of one value stay in the buffer for the next call, so
/// replies, snapshots and streamed commands can arrive in a single read.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
}

impl<S> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
        }
    }
}

impl Connection<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }

    /// Splits off the write half. The read side keeps whatever is already buffered.
    pub fn into_split(self) -> (Connection<OwnedReadHalf>, OwnedWriteHalf) {
        let (reader, writer) = self.stream.into_split();
        (
            Connection {
                stream: reader,
                buffer: self.buffer,
            },
            writer,
        )
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Reads the next command frame. `Ok(None)` means the peer closed cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some((args, consumed)) = resp::decode_frame(&self.buffer)? {
                let raw = self.buffer.split_to(consumed).freeze();
                return Ok(Some(Frame { args, raw }));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Reads the next value of any type, typically a reply.
    pub async fn read_resp(&mut self) -> Result<Option<Resp>, ConnectionError> {
        loop {
            if let Some((value, consumed)) = Resp::parse(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some(value));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Reads a full-resync payload framed as `$<len>\r\n<bytes>`.
    pub async fn read_snapshot(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            if let Some((payload, consumed)) = resp::parse_snapshot(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some(payload));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        if self.stream.read_buf(&mut self.buffer).await? == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::Truncated);
        }
        Ok(true)
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    pub async fn write_resp(&mut self, resp: &Resp) -> Result<(), ConnectionError> {
        self.write_all(&resp.encode()).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
