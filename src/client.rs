//! Client mode implementation
//!
//! Connects to a benchmark server, runs the upload phase, then the download
//! phase, and computes the download throughput. The two phases never overlap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::download::{self, AcceptOrder, DownloadSettings, DownloadSummary};
use crate::net::{self, AddressFamily};
use crate::payload;
use crate::stats::{Measurements, Outcome};
use crate::transport::quic::{self, ConnectOptions};
use crate::transport::{QuicSession, Session, TransportError};
use crate::upload::{self, UploadSettings, UploadSummary};

pub const DEFAULT_HOST: &str = "emes.bj";
pub const DEFAULT_PORT: u16 = 4447;
pub const DEFAULT_STREAMS: usize = 30;
pub const DEFAULT_DATA_SIZE: usize = 262_144;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Streams per phase
    pub streams: usize,
    /// Payload bytes per upload stream
    pub data_size: usize,
    /// Expect server-initiated unidirectional streams first
    pub uni: bool,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
    pub accept_timeout: Duration,
    pub max_read_timeouts: Option<u32>,
    pub address_family: AddressFamily,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            streams: DEFAULT_STREAMS,
            data_size: DEFAULT_DATA_SIZE,
            uni: false,
            read_timeout: download::DEFAULT_READ_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            accept_timeout: download::ACCEPT_TIMEOUT,
            max_read_timeouts: None,
            address_family: AddressFamily::default(),
        }
    }
}

impl ClientConfig {
    fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            streams: self.streams,
            ..Default::default()
        }
    }

    fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            streams: self.streams,
            read_timeout: self.read_timeout,
            accept_timeout: self.accept_timeout,
            order: if self.uni {
                AcceptOrder::ReceiveFirst
            } else {
                AcceptOrder::DuplexFirst
            },
            max_read_timeouts: self.max_read_timeouts,
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchResult {
    pub remote: Option<SocketAddr>,
    pub streams: usize,
    pub data_size: usize,
    pub upload: UploadSummary,
    pub download: DownloadSummary,
    pub outcome: Outcome,
}

pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect over QUIC and run both phases.
    ///
    /// Only connection setup errors are returned; per-stream failures are
    /// absorbed into the result.
    pub async fn run(&self) -> anyhow::Result<BenchResult> {
        let addr = net::resolve_host(
            &self.config.host,
            self.config.port,
            self.config.address_family,
        )
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Connect(format!("no address for {}", self.config.host)))?;

        info!("QUIC client connecting to: {}", addr);
        let options = ConnectOptions {
            addr,
            server_name: self.config.host.clone(),
            alpn: quic::alpn_for_port(self.config.port),
            idle_timeout: self.config.idle_timeout,
        };
        let session = Arc::new(QuicSession::connect(&options).await?);
        info!("Connected to server: {}", session.remote_address());

        let mut result = self.run_on(session.clone()).await;
        result.remote = Some(session.remote_address());

        session.close().await;
        Ok(result)
    }

    /// Run the upload and download phases over an established session
    pub async fn run_on<S: Session>(&self, session: Arc<S>) -> BenchResult {
        let payload = payload::generate(self.config.data_size);
        info!(
            "Upload test: {} bytes per stream x {} streams",
            self.config.data_size, self.config.streams
        );

        let upload = upload::run(session.clone(), payload, self.config.upload_settings()).await;
        info!(
            "Upload complete ({} ok, {} failed)",
            upload.completed, upload.failed
        );

        info!("Download testing");
        let measurements = Arc::new(Measurements::new());
        let download =
            download::run(session, self.config.download_settings(), measurements.clone()).await;
        info!(
            "Download complete ({} ok, {} failed)",
            download.completed(),
            download.failed()
        );

        let outcome = measurements.outcome();
        debug!("Outcome: {:?}", outcome);

        BenchResult {
            remote: None,
            streams: self.config.streams,
            data_size: self.config.data_size,
            upload,
            download,
            outcome,
        }
    }
}
