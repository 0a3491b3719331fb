//! Request dispatcher
//!
//! Resolves the protocol method and upload id of a request, runs the
//! before-hook, the method handler and the after-hook, and is the only place
//! where a [`TusError`] becomes an HTTP status.

use crate::config::{Config, MetadataBackend};
use crate::extension::{ChecksumExtension, ExtensionPipeline, Hook, ObservedBody};
use crate::metrics;
use crate::protocol::{
    ResponseBody, TusError, TusResponse, ALLOWED_METHODS, CORS_ALLOW_HEADERS,
    CORS_EXPOSE_HEADERS, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    TUS_VERSION_HEADER,
};
use crate::router::{RequestParser, TusMethod};
use crate::storage::FileStorage;
use crate::store::{FileStore, MemoryStore, MetadataStore};
use crate::upload::{UploadId, UploadLeases, Uploads};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, field, warn, Span};

/// Per-deployment knobs of the protocol handlers
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Scheme and host prefixed to `Location`
    pub public_url: Option<String>,
    /// Largest accepted `Final-Length`
    pub max_size: Option<u64>,
    /// Per-iteration budget of the transfer loop
    pub chunk_timeout: Duration,
    /// Hold a per-id lease for the duration of a PATCH
    pub exclusive_patch: bool,
    /// Sync each chunk to disk before its offset is recorded
    pub sync_writes: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            public_url: None,
            max_size: None,
            chunk_timeout: crate::upload::transfer::DEFAULT_CHUNK_TIMEOUT,
            exclusive_patch: true,
            sync_writes: false,
        }
    }
}

/// Transport-independent view of an inbound request
pub struct TusRequest<B> {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: B,
    pub cancel: CancellationToken,
}

impl<B> TusRequest<B> {
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: B) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HeaderMap::new(),
            body,
            cancel: CancellationToken::new(),
        }
    }

    /// Add a header; invalid names or values are ignored
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// What the after-hook gets to see once a handler has finished
pub(super) enum AfterHook {
    /// Run it, with what the extensions observed of the request body
    Run(Option<ObservedBody>),
    /// Nothing was processed that extensions could check
    Skip,
}

/// Routes requests to the method handlers
pub struct Dispatcher {
    pub(super) uploads: Uploads,
    pub(super) extensions: ExtensionPipeline,
    pub(super) parser: RequestParser,
    pub(super) leases: UploadLeases,
    pub(super) settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        uploads: Uploads,
        extensions: ExtensionPipeline,
        parser: RequestParser,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            uploads,
            extensions,
            parser,
            leases: UploadLeases::new(),
            settings,
        }
    }

    /// Build storage, metadata store and extensions from configuration
    pub fn from_config(config: &Config) -> Result<Self, TusError> {
        let storage = FileStorage::new(&config.storage.directory)?;

        let metadata: Arc<dyn MetadataStore> = match config.metadata.backend {
            MetadataBackend::Memory => Arc::new(MemoryStore::new(config.metadata.prefix.clone())),
            MetadataBackend::File => {
                let directory = config.metadata.directory.as_ref().ok_or_else(|| {
                    TusError::Misconfiguration(
                        "metadata.directory is required for the file backend".into(),
                    )
                })?;
                Arc::new(FileStore::open(directory, config.metadata.prefix.clone())?)
            }
        };

        let mut extensions = ExtensionPipeline::new();
        if config.checksum.enabled {
            let checksum = match config.checksum.algorithms {
                Some(ref names) => ChecksumExtension::with_algorithms(names.as_slice())?,
                None => ChecksumExtension::new(),
            };
            extensions.register(Arc::new(checksum));
        }

        let settings = DispatchSettings {
            public_url: config.server.public_url.clone(),
            max_size: config.server.max_size,
            chunk_timeout: config.server.chunk_timeout(),
            exclusive_patch: config.server.exclusive_patch,
            sync_writes: config.server.sync_writes,
        };

        Ok(Self::new(
            Uploads::new(metadata, storage),
            extensions,
            RequestParser::new(config.server.base_path.clone())?,
            settings,
        ))
    }

    pub fn uploads(&self) -> &Uploads {
        &self.uploads
    }

    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    pub fn extensions(&self) -> &ExtensionPipeline {
        &self.extensions
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Serve one request; never fails, errors become error responses
    #[tracing::instrument(
        name = "tus.request",
        skip(self, request),
        fields(
            http.method = %request.method,
            http.path = %request.path,
            tus.method = field::Empty,
            upload.id = field::Empty,
            http.status_code = field::Empty
        )
    )]
    pub async fn dispatch<B>(&self, request: TusRequest<B>) -> TusResponse
    where
        B: AsyncRead + Unpin,
    {
        let start = Instant::now();
        let TusRequest {
            method,
            path,
            headers,
            body,
            cancel,
        } = request;

        let resolved = TusMethod::from_request(&method, &headers);
        let label = match &resolved {
            Ok(m) => m.as_str(),
            Err(_) => "OTHER",
        };

        let mut response = match resolved {
            Ok(m) => self.route(m, &path, &headers, body, cancel).await,
            Err(e) => Err(e),
        }
        .unwrap_or_else(|e| error_response(&e));

        self.apply_common_headers(&mut response);

        let status = response.status().as_u16();
        Span::current().record("http.status_code", status);
        metrics::record_request(label, status, start.elapsed().as_secs_f64());

        response
    }

    async fn route<B>(
        &self,
        method: TusMethod,
        path: &str,
        headers: &HeaderMap,
        body: B,
        cancel: CancellationToken,
    ) -> Result<TusResponse, TusError>
    where
        B: AsyncRead + Unpin,
    {
        let span = Span::current();
        span.record("tus.method", method.as_str());

        let id = match method {
            TusMethod::Options => {
                if !self.parser.matches(path) {
                    return Err(TusError::NotFound(format!(
                        "{} is not under {}",
                        path,
                        self.parser.base_path()
                    )));
                }
                None
            }
            // Uploads are only created on the endpoint itself, never on a resource path
            TusMethod::Post => {
                if !self.parser.is_endpoint(path) {
                    return Err(TusError::NotFound(format!(
                        "uploads are created at {}, not {}",
                        self.parser.base_path(),
                        path
                    )));
                }
                Some(UploadId::generate())
            }
            _ => Some(self.parser.upload_id(path)?),
        };
        if let Some(ref id) = id {
            span.record("upload.id", id.as_str());
        }

        let mut response = TusResponse::default();
        if !self
            .extensions
            .run(Hook::Before, method, headers, &mut response, None)?
        {
            return Ok(response);
        }

        let after = match (method, id) {
            (TusMethod::Options, _) => self.options(&mut response),
            (TusMethod::Post, Some(id)) => self.post(&id, headers, &mut response).await,
            (TusMethod::Head, Some(id)) => self.head(&id, &mut response).await,
            (TusMethod::Patch, Some(id)) => {
                self.patch(&id, headers, body, cancel, &mut response).await
            }
            (TusMethod::Get, Some(id)) => self.get(&id, &mut response).await,
            (_, None) => Err(TusError::InvalidArgument(format!(
                "no upload id resolved for {}",
                method
            ))),
        }?;

        if let AfterHook::Run(observed) = after {
            self.extensions.run(
                Hook::After,
                method,
                headers,
                &mut response,
                observed.as_ref(),
            )?;
        }

        Ok(response)
    }

    // Protocol and CORS headers carried by every response
    fn apply_common_headers(&self, response: &mut TusResponse) {
        let headers = response.headers_mut();
        headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
        headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(CORS_EXPOSE_HEADERS),
        );

        let names = self.extensions.names();
        if !names.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&names.join(",")) {
                headers.insert(TUS_EXTENSION, value);
            }
        }

        if let Some(max_size) = self.settings.max_size {
            headers.insert(TUS_MAX_SIZE, HeaderValue::from(max_size));
        }
    }
}

fn error_response(err: &TusError) -> TusResponse {
    let status = err.status();
    if status.is_server_error() {
        error!(error = %err, kind = err.kind(), "Request failed");
    } else {
        warn!(error = %err, kind = err.kind(), "Request rejected");
    }
    metrics::record_error(err.kind());

    let mut response = TusResponse::new(status);
    response.set_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response.set_body(ResponseBody::Text(err.to_string()));
    response
}
