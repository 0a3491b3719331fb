//! Resumable upload client
//!
//! Mirrors the server state machine from the caller's side. The first
//! [`TusClient::upload`] creates the resource (POST) unless a fingerprint is
//! known; later calls query the authoritative remote offset (HEAD) and send
//! the next chunk (PATCH) straight from disk.

use crate::protocol::{OFFSET_OCTET_STREAM, TUS_VERSION};
use base64::Engine;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use sha1::{Digest, Sha1};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{method} request failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned {actual}, expected {expected}")]
    UnexpectedStatus {
        method: &'static str,
        expected: u16,
        actual: u16,
    },

    #[error("{method} response has no {header} header")]
    MissingHeader {
        method: &'static str,
        header: &'static str,
    },

    #[error("{method} response has an invalid {header} header: {value}")]
    InvalidHeader {
        method: &'static str,
        header: &'static str,
        value: String,
    },
}

impl ClientError {
    /// HTTP status involved in the failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::UnexpectedStatus { actual, .. } => Some(*actual),
            ClientError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn transport(method: &'static str) -> impl FnOnce(reqwest::Error) -> ClientError {
    move |source| ClientError::Transport { method, source }
}

fn expect_status(
    method: &'static str,
    response: &reqwest::Response,
    expected: StatusCode,
) -> Result<(), ClientError> {
    if response.status() != expected {
        return Err(ClientError::UnexpectedStatus {
            method,
            expected: expected.as_u16(),
            actual: response.status().as_u16(),
        });
    }
    Ok(())
}

fn header_value<'r>(
    method: &'static str,
    response: &'r reqwest::Response,
    header: &'static str,
) -> Result<&'r str, ClientError> {
    let value = response
        .headers()
        .get(header)
        .ok_or(ClientError::MissingHeader { method, header })?;
    value.to_str().map_err(|_| ClientError::InvalidHeader {
        method,
        header,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}

/// Driver for one file and one remote endpoint
#[derive(Debug)]
pub struct TusClient {
    http: reqwest::Client,
    filename: PathBuf,
    file_size: u64,
    endpoint: Url,
    fingerprint: Option<String>,
    location: Option<Url>,
    offset: u64,
    checksum: bool,
}

impl TusClient {
    /// Configure an upload of `filename` to the creation `endpoint`
    ///
    /// The file size is read once, here.
    pub fn new(filename: impl AsRef<Path>, endpoint: &str) -> Result<Self, ClientError> {
        let filename = filename.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&filename).map_err(|source| ClientError::File {
            path: filename.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(ClientError::InvalidArgument(format!(
                "{} is not a file",
                filename.display()
            )));
        }

        // A trailing slash makes `join` append instead of replacing the last segment
        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| ClientError::InvalidArgument(format!("invalid endpoint: {}", e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClientError::InvalidArgument(format!(
                "endpoint must be http or https: {}",
                endpoint
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            filename,
            file_size: metadata.len(),
            endpoint,
            fingerprint: None,
            location: None,
            offset: 0,
            checksum: false,
        })
    }

    /// Resume the upload identified by `fingerprint` instead of creating one
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Send `Upload-Checksum: sha1 …` with every chunk
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    /// Remote offset as of the last call
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Send the next chunk and return the number of bytes sent
    ///
    /// `None` sends the rest of the file; a length past the end of the file
    /// is clamped. Nothing is sent once the remote offset equals the file size.
    #[tracing::instrument(
        name = "tus.client.upload",
        skip(self),
        fields(file = %self.filename.display(), upload.offset = tracing::field::Empty),
        err
    )]
    pub async fn upload(&mut self, length: Option<u64>) -> Result<u64, ClientError> {
        let location = match self.fingerprint.clone() {
            Some(fingerprint) => {
                let location = self.endpoint.join(&fingerprint).map_err(|e| {
                    ClientError::InvalidArgument(format!("invalid fingerprint: {}", e))
                })?;
                self.offset = self.query_offset(&location).await?;
                location
            }
            None => {
                let location = self.create().await?;
                self.fingerprint = location
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string);
                self.offset = 0;
                location
            }
        };
        self.location = Some(location.clone());
        tracing::Span::current().record("upload.offset", self.offset);

        let remaining = self.file_size.saturating_sub(self.offset);
        let length = length.map_or(remaining, |requested| requested.min(remaining));
        if length == 0 {
            debug!("Nothing left to send");
            return Ok(0);
        }

        self.send_chunk(&location, self.offset, length).await?;
        self.offset += length;

        info!(sent = length, offset = self.offset, "Chunk uploaded");
        Ok(length)
    }

    async fn create(&self) -> Result<Url, ClientError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("Final-Length", self.file_size)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .map_err(transport("POST"))?;
        expect_status("POST", &response, StatusCode::CREATED)?;

        let location = header_value("POST", &response, "Location")?;
        self.endpoint
            .join(location)
            .map_err(|_| ClientError::InvalidHeader {
                method: "POST",
                header: "Location",
                value: location.to_string(),
            })
    }

    async fn query_offset(&self, location: &Url) -> Result<u64, ClientError> {
        let response = self
            .http
            .head(location.clone())
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .map_err(transport("HEAD"))?;
        expect_status("HEAD", &response, StatusCode::OK)?;

        let value = header_value("HEAD", &response, "Offset")?;
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| ClientError::InvalidHeader {
                method: "HEAD",
                header: "Offset",
                value: value.to_string(),
            })
    }

    async fn send_chunk(&self, location: &Url, offset: u64, length: u64) -> Result<(), ClientError> {
        let mut request = self
            .http
            .patch(location.clone())
            .header("Tus-Resumable", TUS_VERSION)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header("Offset", offset)
            .header(CONTENT_LENGTH, length);

        if self.checksum {
            let digest = self.chunk_digest(offset, length).await?;
            request = request.header("Upload-Checksum", format!("sha1 {}", digest));
        }

        let chunk = self.open_chunk(offset).await?.take(length);
        let response = request
            .body(reqwest::Body::wrap_stream(ReaderStream::new(chunk)))
            .send()
            .await
            .map_err(transport("PATCH"))?;
        expect_status("PATCH", &response, StatusCode::OK)
    }

    async fn open_chunk(&self, offset: u64) -> Result<File, ClientError> {
        let file_error = |source| ClientError::File {
            path: self.filename.clone(),
            source,
        };
        let mut file = File::open(&self.filename).await.map_err(file_error)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(file_error)?;
        Ok(file)
    }

    // Base64 SHA-1 of the chunk, read in a separate pass so the body can stream
    async fn chunk_digest(&self, offset: u64, length: u64) -> Result<String, ClientError> {
        let mut chunk = self.open_chunk(offset).await?.take(length);
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; crate::protocol::READ_BUFFER_SIZE];
        loop {
            let n = chunk.read(&mut buf).await.map_err(|source| ClientError::File {
                path: self.filename.clone(),
                source,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![b'x'; len]).unwrap();
        file
    }

    #[test]
    fn test_reads_file_size_once() {
        let file = temp_file(42);
        let client = TusClient::new(file.path(), "http://localhost:1080/files").unwrap();
        assert_eq!(client.file_size(), 42);
        assert_eq!(client.endpoint().as_str(), "http://localhost:1080/files/");
        assert!(client.fingerprint().is_none());
        assert!(client.location().is_none());
    }

    #[test]
    fn test_missing_file() {
        let result = TusClient::new("/nonexistent/tus/file", "http://localhost/files/");
        assert!(matches!(result, Err(ClientError::File { .. })));
    }

    #[test]
    fn test_invalid_endpoint() {
        let file = temp_file(1);
        assert!(matches!(
            TusClient::new(file.path(), "ftp://localhost/files/"),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            TusClient::new(file.path(), "not a url"),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unexpected_status_carries_code() {
        let err = ClientError::UnexpectedStatus {
            method: "HEAD",
            expected: 200,
            actual: 404,
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HEAD returned 404, expected 200");
    }
}
