//! Transport abstraction for the benchmark engine.
//!
//! The upload and download phases only need a small capability set from the
//! underlying multiplexed transport: open an outbound duplex stream, accept an
//! inbound duplex or receive-only stream, and read/write bytes on them. The
//! QUIC implementation lives in [`quic`]; tests use an in-memory mock.

pub mod quic;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use quic::QuicSession;

/// Session-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dial or handshake failure. Fatal for the whole run.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream open failed: {0}")]
    Open(String),

    #[error("stream accept failed: {0}")]
    Accept(String),

    #[error("no {kind} stream arrived within {timeout:?}")]
    AcceptTimedOut { kind: StreamKind, timeout: Duration },
}

/// Per-stream I/O failures
#[derive(Debug, Error)]
pub enum StreamError {
    /// Deadline expired before the operation completed
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("reset by peer (code {0})")]
    Reset(u64),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// Kind of stream carrying download data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Peer-initiated bidirectional stream
    Duplex,
    /// Peer-initiated unidirectional stream
    Receive,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplex => write!(f, "bidi"),
            Self::Receive => write!(f, "uni"),
        }
    }
}

/// Per-operation deadline for a stream.
///
/// Resolved once when a stream is opened or accepted. `Incapable` streams
/// never time out; the operation runs until the transport completes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Capable(Duration),
    Incapable,
}

impl Deadline {
    pub fn resolve(supported: bool, limit: Duration) -> Self {
        if supported {
            Self::Capable(limit)
        } else {
            Self::Incapable
        }
    }

    /// Run one I/O operation under a freshly armed deadline.
    pub async fn run<T, F>(self, op: F) -> Result<T, StreamError>
    where
        F: Future<Output = Result<T, StreamError>>,
    {
        match self {
            Self::Capable(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| StreamError::TimedOut(limit))?,
            Self::Incapable => op.await,
        }
    }
}

/// Sending half of a stream
#[async_trait]
pub trait SendStream: Send + 'static {
    /// Write some prefix of `buf`, returning how many bytes were accepted
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError>;

    /// Finish the stream; no more data will be written
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Receiving half of a stream
#[async_trait]
pub trait RecvStream: Send + 'static {
    /// Read into `buf`. `Ok(None)` signals end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError>;
}

/// An established connection to the benchmark peer
#[async_trait]
pub trait Session: Send + Sync + 'static {
    type Send: SendStream;
    type Recv: RecvStream;

    /// Open an outbound duplex stream. May wait on the peer's stream limit.
    async fn open_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError>;

    /// Wait for the next peer-initiated duplex stream
    async fn accept_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError>;

    /// Wait for the next peer-initiated receive-only stream
    async fn accept_receive(&self) -> Result<Self::Recv, TransportError>;

    /// Whether receive-only streams accept read deadlines
    fn receive_deadlines(&self) -> bool {
        true
    }
}
