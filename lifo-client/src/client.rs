use crate::error::{ClientError, Result};
use bytes::Bytes;
use lifo_core::protocol::{
    ADMISSION_REJECTED, LENGTH_MASK, POP_FLAG, POP_REQUEST, PUSH_ACK, encode_push_request,
};
use lifo_core::{DiagnosticSnapshot, Payload};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    /// `None` waits indefinitely; a pop on an empty stack blocks server-side.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7070"
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7070))),
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// Client for the stack server's push/pop protocol
#[derive(Debug, Clone)]
pub struct StackClient {
    config: ClientConfig,
}

impl StackClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Push one payload. Resolves once the server has stored it, which may
    /// wait for room while the stack is full.
    pub async fn push(&self, data: impl Into<Bytes>) -> Result<()> {
        let payload = Payload::new(data)?;
        let mut stream = self.connect().await?;

        trace!(addr = %self.config.addr, len = payload.len(), "Sending push");
        self.send(&mut stream, &encode_push_request(&payload)).await?;

        match self.read_status(&mut stream).await? {
            PUSH_ACK => {
                debug!(addr = %self.config.addr, len = payload.len(), "Push acknowledged");
                Ok(())
            },
            ADMISSION_REJECTED => Err(ClientError::Rejected),
            other => Err(ClientError::InvalidResponse(format!(
                "Expected push ack, got {:#04x}",
                other
            ))),
        }
    }

    /// Pop the top payload, waiting for one if the stack is empty.
    pub async fn pop(&self) -> Result<Bytes> {
        let mut stream = self.connect().await?;

        trace!(addr = %self.config.addr, "Sending pop");
        self.send(&mut stream, &[POP_REQUEST]).await?;

        let header = self.read_status(&mut stream).await?;
        if header == ADMISSION_REJECTED {
            return Err(ClientError::Rejected);
        }
        if header & POP_FLAG != 0 {
            return Err(ClientError::InvalidResponse(format!(
                "Invalid pop response header {:#04x}",
                header
            )));
        }

        let mut payload = vec![0u8; usize::from(header & LENGTH_MASK)];
        with_read_timeout(self.config.read_timeout, stream.read_exact(&mut payload)).await?;

        debug!(addr = %self.config.addr, len = payload.len(), "Pop answered");
        Ok(Bytes::from(payload))
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream =
            tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.config.addr))
                .await
                .map_err(|_| ClientError::Timeout)?
                .map_err(ClientError::ConnectionFailed)?;

        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn send(&self, stream: &mut TcpStream, request: &[u8]) -> Result<()> {
        let written = tokio::time::timeout(self.config.write_timeout, stream.write_all(request))
            .await
            .map_err(|_| ClientError::Timeout)?;

        if let Err(e) = written {
            // A rejected connection can be closed before the request lands;
            // the rejection byte may still be readable.
            let mut status = [0u8; 1];
            if matches!(stream.read(&mut status).await, Ok(1))
                && status[0] == ADMISSION_REJECTED
            {
                return Err(ClientError::Rejected);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Read the first response byte. End of stream here means the server
    /// closed without answering.
    async fn read_status(&self, stream: &mut TcpStream) -> Result<u8> {
        let mut status = [0u8; 1];
        let n = with_read_timeout(self.config.read_timeout, stream.read(&mut status)).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(status[0])
    }
}

async fn with_read_timeout<F, T>(timeout: Option<Duration>, read: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => read.await,
    };
    result.map_err(ClientError::from)
}

/// Fetch one snapshot from the diagnostic endpoint.
pub async fn fetch_diagnostics(addr: SocketAddr, timeout: Duration) -> Result<DiagnosticSnapshot> {
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::ConnectionFailed)?;

    let mut body = Vec::new();
    with_read_timeout(Some(timeout), stream.read_to_end(&mut body)).await?;

    if body.is_empty() {
        return Err(ClientError::ConnectionClosed);
    }

    serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
