//! Scripted in-memory transport for exercising the phases without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{RecvStream, SendStream, Session, StreamError, TransportError};

/// Shared record of what happened on the mock session.
///
/// Events are stamped with a logical clock so ordering checks do not depend
/// on timer resolution.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    clock: AtomicU64,
    pub bytes_written: AtomicU64,
    pub writes: Mutex<Vec<usize>>,
    pub upload_closes: Mutex<Vec<u64>>,
    pub download_reads: Mutex<Vec<u64>>,
    pub duplex_closes: AtomicU64,
}

impl EventLog {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }
}

/// Behaviour of one scripted write stream
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteScript {
    /// Largest prefix accepted per write call
    pub max_write: Option<usize>,
    /// Fail once this many bytes have been written
    pub fail_after: Option<usize>,
    /// Block every write for this long
    pub stall: Option<Duration>,
}

pub(crate) struct MockSend {
    script: WriteScript,
    written: usize,
    log: Arc<EventLog>,
}

#[async_trait]
impl SendStream for MockSend {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        if let Some(stall) = self.script.stall {
            tokio::time::sleep(stall).await;
        }
        if let Some(limit) = self.script.fail_after
            && self.written >= limit
        {
            return Err(StreamError::Write("injected write failure".into()));
        }
        let n = self.script.max_write.map_or(buf.len(), |m| m.min(buf.len()));
        self.written += n;
        self.log.bytes_written.fetch_add(n as u64, Ordering::SeqCst);
        self.log.writes.lock().push(n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        let tick = self.log.tick();
        self.log.upload_closes.lock().push(tick);
        Ok(())
    }
}

/// Send half handed out with accepted duplex streams
pub(crate) struct PeerSend {
    log: Arc<EventLog>,
}

#[async_trait]
impl SendStream for PeerSend {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.log.duplex_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ReadStep {
    Data(usize),
    /// Block for the duration before moving on
    Stall(Duration),
    /// Block forever
    Hang,
    Fail(StepError),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StepError {
    Timeout,
    Reset,
    Other,
}

pub(crate) struct MockRecv {
    steps: VecDeque<ReadStep>,
    stall_until: Option<Instant>,
    log: Arc<EventLog>,
}

impl MockRecv {
    pub fn new(log: &Arc<EventLog>, steps: impl IntoIterator<Item = ReadStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            stall_until: None,
            log: log.clone(),
        }
    }

    /// A stream delivering `total` bytes in `chunk`-sized reads, then EOF
    pub fn with_bytes(log: &Arc<EventLog>, total: usize, chunk: usize) -> Self {
        let mut steps = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(chunk);
            steps.push(ReadStep::Data(n));
            remaining -= n;
        }
        Self::new(log, steps)
    }
}

#[async_trait]
impl RecvStream for MockRecv {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        loop {
            let Some(step) = self.steps.front().cloned() else {
                let tick = self.log.tick();
                self.log.download_reads.lock().push(tick);
                return Ok(None);
            };
            match step {
                ReadStep::Data(n) => {
                    self.steps.pop_front();
                    let n = n.min(buf.len());
                    let tick = self.log.tick();
                    self.log.download_reads.lock().push(tick);
                    return Ok(Some(n));
                }
                ReadStep::Stall(d) => {
                    // Survives cancellation: a timed-out read resumes the same stall
                    let until = *self.stall_until.get_or_insert_with(|| Instant::now() + d);
                    tokio::time::sleep_until(until).await;
                    self.stall_until = None;
                    self.steps.pop_front();
                }
                ReadStep::Hang => std::future::pending::<()>().await,
                ReadStep::Fail(kind) => {
                    self.steps.pop_front();
                    return Err(match kind {
                        StepError::Timeout => StreamError::TimedOut(Duration::from_secs(1)),
                        StepError::Reset => StreamError::Reset(7),
                        StepError::Other => StreamError::Read("injected read failure".into()),
                    });
                }
            }
        }
    }
}

pub(crate) enum OpenScript {
    Ok(WriteScript),
    Fail,
}

/// Scripted session.
///
/// Inbound streams are queued through [`MockSession::push_duplex`] and
/// [`MockSession::push_receive`]; an empty queue blocks the accept call.
pub(crate) struct MockSession {
    pub log: Arc<EventLog>,
    opens: Mutex<VecDeque<OpenScript>>,
    duplex_tx: mpsc::UnboundedSender<MockRecv>,
    duplex_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRecv>>,
    receive_tx: mpsc::UnboundedSender<MockRecv>,
    receive_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRecv>>,
    receive_deadlines: bool,
    refuse_duplex: bool,
}

impl MockSession {
    pub fn new() -> Self {
        let (duplex_tx, duplex_rx) = mpsc::unbounded_channel();
        let (receive_tx, receive_rx) = mpsc::unbounded_channel();
        Self {
            log: Arc::new(EventLog::default()),
            opens: Mutex::new(VecDeque::new()),
            duplex_tx,
            duplex_rx: tokio::sync::Mutex::new(duplex_rx),
            receive_tx,
            receive_rx: tokio::sync::Mutex::new(receive_rx),
            receive_deadlines: true,
            refuse_duplex: false,
        }
    }

    /// Receive-only streams will not honour read deadlines
    pub fn without_receive_deadlines(mut self) -> Self {
        self.receive_deadlines = false;
        self
    }

    /// Duplex accepts fail immediately instead of waiting
    pub fn refusing_duplex(mut self) -> Self {
        self.refuse_duplex = true;
        self
    }

    /// Script the next outbound opens, in order; unscripted opens succeed
    pub fn script_opens(&self, scripts: impl IntoIterator<Item = OpenScript>) {
        self.opens.lock().extend(scripts);
    }

    pub fn push_duplex(&self, recv: MockRecv) {
        let _ = self.duplex_tx.send(recv);
    }

    pub fn push_receive(&self, recv: MockRecv) {
        let _ = self.receive_tx.send(recv);
    }
}

#[async_trait]
impl Session for MockSession {
    type Send = Box<dyn SendStream>;
    type Recv = MockRecv;

    async fn open_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError> {
        let script = self.opens.lock().pop_front();
        match script.unwrap_or(OpenScript::Ok(WriteScript::default())) {
            OpenScript::Ok(script) => {
                let send = MockSend {
                    script,
                    written: 0,
                    log: self.log.clone(),
                };
                Ok((Box::new(send), MockRecv::new(&self.log, Vec::new())))
            }
            OpenScript::Fail => Err(TransportError::Open("injected open failure".into())),
        }
    }

    async fn accept_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError> {
        if self.refuse_duplex {
            return Err(TransportError::Accept("duplex streams refused".into()));
        }
        let recv = self
            .duplex_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Accept("session closed".into()))?;
        let send = PeerSend {
            log: self.log.clone(),
        };
        Ok((Box::new(send), recv))
    }

    async fn accept_receive(&self) -> Result<Self::Recv, TransportError> {
        self.receive_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Accept("session closed".into()))
    }

    fn receive_deadlines(&self) -> bool {
        self.receive_deadlines
    }
}

#[async_trait]
impl SendStream for Box<dyn SendStream> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        (**self).write(buf).await
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        (**self).close().await
    }
}
