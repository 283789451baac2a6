//! quicbench - QUIC multi-stream throughput benchmark
//!
//! Opens one QUIC connection, uploads a payload on N concurrent streams, then
//! receives N streams back from the server and reports the average download
//! throughput.
//!
//! # Library Usage
//!
//! ```ignore
//! use quicbench::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig {
//!         host: "192.168.1.1".to_string(),
//!         streams: 8,
//!         ..Default::default()
//!     };
//!
//!     let result = Client::new(config).run().await?;
//!     if let Some(report) = result.outcome.report() {
//!         println!("Throughput: {:.3} Mbps", report.throughput_mbps);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`client`] - Phase orchestration
//! - [`upload`], [`download`] - The two benchmark phases
//! - [`transport`] - Stream abstraction and the QUIC implementation
//! - [`stats`] - Measurement aggregation and throughput
//! - [`payload`] - Upload payload generation

pub mod client;
pub mod config;
pub mod download;
pub mod net;
pub mod output;
pub mod payload;
pub mod stats;
pub mod transport;
pub mod upload;

pub use client::{BenchResult, Client, ClientConfig};
pub use stats::{Outcome, Report};
