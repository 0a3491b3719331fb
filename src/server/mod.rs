//! tus server
//!
//! [`Dispatcher`] implements the protocol over any `AsyncRead` body;
//! [`Server`] puts it behind a hyper HTTP/1.1 listener.

use crate::protocol::TusError;
use thiserror::Error;

mod dispatch;
mod handlers;
pub mod http;

pub use dispatch::{DispatchSettings, Dispatcher, TusRequest};
pub use http::Server;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to set up the upload endpoint: {0}")]
    Setup(#[from] TusError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::ConfigLoader;

    fn test_config(directory: &std::path::Path, address: &str) -> Config {
        ConfigLoader::from_yaml(&format!(
            "server:\n  address: \"{}\"\nstorage:\n  directory: {}\n",
            address,
            directory.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_server_binds_port_zero() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::new(test_config(dir.path(), "127.0.0.1:0"))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_server_invalid_address() {
        let dir = tempfile::tempdir().unwrap();
        let result = Server::new(test_config(dir.path(), "invalid")).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[tokio::test]
    async fn test_missing_storage_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = Server::new(test_config(&missing, "127.0.0.1:0")).await;
        assert!(matches!(result, Err(ServerError::Setup(_))));
    }
}
