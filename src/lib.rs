//! tus-uploadr Library
//!
//! Resumable file uploads over HTTP, speaking tus 1.0.0.
//!
//! # Features
//!
//! - **Resumable**: interrupted transfers continue from the last durable offset
//! - **Chunked PATCH engine**: fixed-buffer streaming with per-chunk offset commits
//! - **Extensions**: before/after hook pipeline, checksum verification included
//! - **Client**: a resumable upload driver mirroring the server state machine
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod extension;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod server;
pub mod storage;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use client::TusClient;
pub use config::Config;
pub use server::{Dispatcher, Server};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
