//! Transport trait abstraction for pluggable network backends

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Source of incoming console connections
#[async_trait]
pub trait TransportListener: Send {
    /// The stream type this listener produces
    type Stream: TransportStream;

    /// Wait for the next client, returning its stream and a printable peer name
    async fn accept(&mut self) -> Result<(Self::Stream, String)>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
