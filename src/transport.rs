//! Byte transport shared by both backends.
//!
//! Connections own a [`Transport`] over any duplex stream; production code
//! uses `TcpStream`, tests use `tokio::io::duplex`.

use bytes::BytesMut;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;

pub struct Transport<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Wait for the next chunk of bytes. End of stream is an error.
    pub async fn read(&mut self) -> Result<&[u8]> {
        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(&self.buf[..n])
    }

    /// Write encoded frames and flush.
    pub async fn send<I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = BytesMut>,
    {
        for frame in frames {
            self.writer.write_all(&frame).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Open a TCP connection with Nagle disabled.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
