//! Upload phase
//!
//! Opens one outbound duplex stream per slot and writes the shared payload in
//! bounded chunks. Slots are independent: an open or write failure ends only
//! that slot. [`run`] returns once every slot has finished.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::transport::{Deadline, SendStream, Session, StreamError, TransportError};

/// Bytes handed to the transport per write call
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Write deadline, re-armed before every chunk
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub streams: usize,
    pub chunk_size: usize,
    pub write_timeout: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            streams: 30,
            chunk_size: CHUNK_SIZE,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

/// Per-phase tallies, used for the progress trace only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub completed: usize,
    pub failed: usize,
    /// Bytes accepted by the transport, partial streams included
    pub bytes_written: u64,
}

#[derive(Debug, Error)]
enum UploadFailure {
    #[error("stream creation error: {0}")]
    Open(#[source] TransportError),

    #[error("stream write error after {written} bytes: {source}")]
    Write { written: u64, source: StreamError },
}

/// Upload `payload` on `settings.streams` concurrent streams
pub async fn run<S: Session>(
    session: Arc<S>,
    payload: Bytes,
    settings: UploadSettings,
) -> UploadSummary {
    let mut tasks = JoinSet::new();
    for index in 0..settings.streams {
        let session = session.clone();
        let payload = payload.clone();
        tasks.spawn(async move {
            let result = upload_stream(session.as_ref(), &payload, &settings).await;
            (index, result)
        });
    }

    let mut summary = UploadSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(written))) => {
                debug!("Upload stream {} finished ({} bytes)", index, written);
                summary.completed += 1;
                summary.bytes_written += written;
            }
            Ok((index, Err(failure))) => {
                warn!("Upload stream {}: {}", index, failure);
                summary.failed += 1;
                if let UploadFailure::Write { written, .. } = failure {
                    summary.bytes_written += written;
                }
            }
            Err(e) => {
                error!("Upload task panicked: {}", e);
                summary.failed += 1;
            }
        }
    }

    summary
}

async fn upload_stream<S: Session>(
    session: &S,
    payload: &[u8],
    settings: &UploadSettings,
) -> Result<u64, UploadFailure> {
    // Opening is bounded only by the peer's stream limit
    let (mut send, _recv) = session.open_duplex().await.map_err(UploadFailure::Open)?;

    let deadline = Deadline::Capable(settings.write_timeout);
    let chunk_size = settings.chunk_size.max(1);
    let mut offset = 0;

    while offset < payload.len() {
        let end = (offset + chunk_size).min(payload.len());
        match deadline.run(send.write(&payload[offset..end])).await {
            Ok(0) => {
                let _ = send.close().await;
                return Err(UploadFailure::Write {
                    written: offset as u64,
                    source: StreamError::Write("transport accepted zero bytes".into()),
                });
            }
            Ok(n) => offset += n,
            Err(source) => {
                let _ = send.close().await;
                return Err(UploadFailure::Write {
                    written: offset as u64,
                    source,
                });
            }
        }
    }

    send.close()
        .await
        .map_err(|source| UploadFailure::Write {
            written: offset as u64,
            source,
        })?;

    Ok(offset as u64)
}
