//! Transport layer for socket communication
//!
//! Messages travel as line-delimited JSON over TCP. The codec is shared by
//! the server and the render client; `AsyncConnection` wraps a split
//! stream with typed read/write helpers.

mod codec;

pub use codec::{decode_request, decode_response, encode_request, encode_response};

use crate::protocol::{Request, Response};
use crate::socket::SocketError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Server- and client-side connection with line-delimited messaging
pub struct AsyncConnection {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl AsyncConnection {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connect to a service endpoint
    pub async fn connect(host: &str, port: u16) -> Result<Self, SocketError> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            SocketError::Connection(format!(
                "Failed to connect to service at {}:{}: {}",
                host, port, e
            ))
        })?;
        Ok(Self::new(stream))
    }

    async fn read_line(&mut self) -> Result<Option<String>, SocketError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 { Ok(None) } else { Ok(Some(line)) }
    }

    /// Read the next request; None when the peer disconnected
    pub async fn read_request(&mut self) -> Result<Option<Request>, SocketError> {
        match self.read_line().await? {
            Some(line) => Ok(Some(decode_request(&line)?)),
            None => Ok(None),
        }
    }

    /// Read the next response; None when the peer disconnected
    pub async fn read_response(&mut self) -> Result<Option<Response>, SocketError> {
        match self.read_line().await? {
            Some(line) => Ok(Some(decode_response(&line)?)),
            None => Ok(None),
        }
    }

    pub async fn write_request(&mut self, request: &Request) -> Result<(), SocketError> {
        let encoded = encode_request(request)?;
        self.writer.write_all(encoded.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_response(&mut self, response: &Response) -> Result<(), SocketError> {
        let encoded = encode_response(response)?;
        self.writer.write_all(encoded.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
