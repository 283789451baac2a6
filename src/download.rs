//! Download phase
//!
//! The peer answers the upload with one stream per slot, either as a
//! bidirectional stream or as a server-initiated unidirectional one. Each slot
//! runs its own acceptance state machine:
//!
//! ```text
//! AttemptDuplex ──timeout/error──> AttemptReceive ──timeout/error──> Failed
//!       │                               │
//!       v                               v
//!   ReadDuplex                      ReadReceive
//!       │                               │
//!       └──────────> Done <─────────────┘
//! ```
//!
//! With [`AcceptOrder::ReceiveFirst`] the two attempts are swapped. Reads add
//! to the shared [`Measurements`] as they arrive; the elapsed read time of a
//! stream is recorded when it reaches `Done`, whether it ended cleanly or not.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::stats::Measurements;
use crate::transport::{
    Deadline, RecvStream, SendStream, Session, StreamError, StreamKind, TransportError,
};

/// Read buffer size per stream
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long each accept attempt waits for the peer
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Which stream kind a slot waits for first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOrder {
    #[default]
    DuplexFirst,
    ReceiveFirst,
}

impl AcceptOrder {
    fn attempts(self) -> [StreamKind; 2] {
        match self {
            Self::DuplexFirst => [StreamKind::Duplex, StreamKind::Receive],
            Self::ReceiveFirst => [StreamKind::Receive, StreamKind::Duplex],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    /// Streams the peer is expected to send
    pub streams: usize,
    pub read_timeout: Duration,
    pub accept_timeout: Duration,
    pub order: AcceptOrder,
    /// Give up on a stream after this many consecutive read timeouts.
    /// `None` waits on a stalled peer indefinitely.
    pub max_read_timeouts: Option<u32>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            streams: 30,
            read_timeout: DEFAULT_READ_TIMEOUT,
            accept_timeout: ACCEPT_TIMEOUT,
            order: AcceptOrder::default(),
            max_read_timeouts: None,
        }
    }
}

/// How a stream's read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadEnd {
    Finished,
    Error,
    TimeoutLimit,
}

/// Result of one download slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotOutcome {
    pub index: usize,
    /// `None` when no stream was accepted
    pub kind: Option<StreamKind>,
    pub bytes: u64,
    pub elapsed_ms: Option<f64>,
    pub end: Option<ReadEnd>,
}

impl SlotOutcome {
    fn failed(index: usize) -> Self {
        Self {
            index,
            kind: None,
            bytes: 0,
            elapsed_ms: None,
            end: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.kind.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadSummary {
    /// One entry per slot, ordered by index
    pub slots: Vec<SlotOutcome>,
}

impl DownloadSummary {
    pub fn completed(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.slots.iter().filter(|s| s.is_failed()).count()
    }
}

/// An accepted inbound stream, with its deadline resolved at accept time
enum Accepted<S: Session> {
    Duplex {
        send: S::Send,
        recv: S::Recv,
        deadline: Deadline,
    },
    Receive {
        recv: S::Recv,
        deadline: Deadline,
    },
}

/// Receive `settings.streams` peer streams concurrently
pub async fn run<S: Session>(
    session: Arc<S>,
    settings: DownloadSettings,
    measurements: Arc<Measurements>,
) -> DownloadSummary {
    let mut tasks = JoinSet::new();
    for index in 0..settings.streams {
        let session = session.clone();
        let measurements = measurements.clone();
        tasks.spawn(async move {
            receive_slot(index, session.as_ref(), &settings, &measurements).await
        });
    }

    let mut slots = Vec::with_capacity(settings.streams);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => slots.push(outcome),
            Err(e) => error!("Download task panicked: {}", e),
        }
    }
    slots.sort_by_key(|s| s.index);

    DownloadSummary { slots }
}

async fn receive_slot<S: Session>(
    index: usize,
    session: &S,
    settings: &DownloadSettings,
    measurements: &Measurements,
) -> SlotOutcome {
    let accepted = match accept(session, settings).await {
        Ok(accepted) => accepted,
        Err(errors) => {
            let causes: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            warn!(
                "Stream {} accept error ({}): {}",
                index,
                settings
                    .order
                    .attempts()
                    .map(|k| k.to_string())
                    .join("+"),
                causes.join(" / ")
            );
            return SlotOutcome::failed(index);
        }
    };

    match accepted {
        Accepted::Duplex {
            mut send,
            mut recv,
            deadline,
        } => {
            debug!("Stream {} accepted as {}", index, StreamKind::Duplex);
            let read = read_to_end(index, &mut recv, deadline, settings, measurements).await;
            if let Err(e) = send.close().await {
                debug!("Stream {} close error: {}", index, e);
            }
            read.into_outcome(index, StreamKind::Duplex)
        }
        Accepted::Receive { mut recv, deadline } => {
            debug!("Stream {} accepted as {}", index, StreamKind::Receive);
            let read = read_to_end(index, &mut recv, deadline, settings, measurements).await;
            read.into_outcome(index, StreamKind::Receive)
        }
    }
}

/// Try each stream kind in order, each bounded by the accept timeout.
/// On failure, returns the error of every attempt.
async fn accept<S: Session>(
    session: &S,
    settings: &DownloadSettings,
) -> Result<Accepted<S>, Vec<TransportError>> {
    let mut errors = Vec::with_capacity(2);

    for kind in settings.order.attempts() {
        match accept_kind(session, kind, settings).await {
            Ok(accepted) => return Ok(accepted),
            Err(e) => {
                debug!("{} accept attempt failed: {}", kind, e);
                errors.push(e);
            }
        }
    }

    Err(errors)
}

async fn accept_kind<S: Session>(
    session: &S,
    kind: StreamKind,
    settings: &DownloadSettings,
) -> Result<Accepted<S>, TransportError> {
    let timeout = settings.accept_timeout;
    let timed_out = || TransportError::AcceptTimedOut { kind, timeout };

    match kind {
        StreamKind::Duplex => {
            let (send, recv) = tokio::time::timeout(timeout, session.accept_duplex())
                .await
                .map_err(|_| timed_out())??;
            Ok(Accepted::Duplex {
                send,
                recv,
                deadline: Deadline::Capable(settings.read_timeout),
            })
        }
        StreamKind::Receive => {
            let recv = tokio::time::timeout(timeout, session.accept_receive())
                .await
                .map_err(|_| timed_out())??;
            Ok(Accepted::Receive {
                recv,
                deadline: Deadline::resolve(session.receive_deadlines(), settings.read_timeout),
            })
        }
    }
}

struct ReadResult {
    bytes: u64,
    elapsed: Duration,
    end: ReadEnd,
}

impl ReadResult {
    fn into_outcome(self, index: usize, kind: StreamKind) -> SlotOutcome {
        SlotOutcome {
            index,
            kind: Some(kind),
            bytes: self.bytes,
            elapsed_ms: Some(self.elapsed.as_secs_f64() * 1000.0),
            end: Some(self.end),
        }
    }
}

async fn read_to_end<R: RecvStream>(
    index: usize,
    recv: &mut R,
    deadline: Deadline,
    settings: &DownloadSettings,
    measurements: &Measurements,
) -> ReadResult {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut bytes = 0u64;
    let mut consecutive_timeouts = 0u32;
    let start = Instant::now();

    let end = loop {
        match deadline.run(recv.read(&mut buffer)).await {
            Ok(Some(n)) => {
                consecutive_timeouts = 0;
                if n > 0 {
                    measurements.add_bytes(n as u64);
                    bytes += n as u64;
                }
            }
            Ok(None) => break ReadEnd::Finished,
            Err(e) if e.is_timeout() => {
                consecutive_timeouts += 1;
                if let Some(max) = settings.max_read_timeouts
                    && consecutive_timeouts >= max
                {
                    warn!(
                        "Stream {} gave up after {} consecutive read timeouts",
                        index, consecutive_timeouts
                    );
                    break ReadEnd::TimeoutLimit;
                }
                debug!("Stream {} read timed out, waiting again", index);
            }
            Err(e) => {
                log_read_error(index, bytes, &e);
                break ReadEnd::Error;
            }
        }
    };

    let elapsed = start.elapsed();
    measurements.record_duration(elapsed);
    debug!("Stream {} done: {} bytes in {:?}", index, bytes, elapsed);

    ReadResult {
        bytes,
        elapsed,
        end,
    }
}

fn log_read_error(index: usize, bytes: u64, e: &StreamError) {
    match e {
        StreamError::Reset(_) => info!("Stream {} {} after {} bytes", index, e, bytes),
        _ => warn!("Stream {} read error after {} bytes: {}", index, bytes, e),
    }
}
