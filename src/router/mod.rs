//! tus request router
//!
//! Resolves the protocol method of an incoming request (honouring
//! `X-HTTP-Method-Override`) and maps the request path to an upload id.

use crate::protocol::{optional_header, TusError, METHOD_OVERRIDE};
use crate::upload::UploadId;
use hyper::header::HeaderMap;
use std::fmt;

/// Protocol methods this server implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TusMethod {
    Options,
    Post,
    Head,
    Patch,
    Get,
}

impl TusMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TusMethod::Options => "OPTIONS",
            TusMethod::Post => "POST",
            TusMethod::Head => "HEAD",
            TusMethod::Patch => "PATCH",
            TusMethod::Get => "GET",
        }
    }

    /// Parse a method name (case-insensitive)
    pub fn parse(name: &str) -> Result<Self, TusError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "OPTIONS" => Ok(TusMethod::Options),
            "POST" => Ok(TusMethod::Post),
            "HEAD" => Ok(TusMethod::Head),
            "PATCH" => Ok(TusMethod::Patch),
            "GET" => Ok(TusMethod::Get),
            other => Err(TusError::MethodNotAllowed(format!(
                "Method {} not allowed",
                other
            ))),
        }
    }

    /// Method a request should be dispatched as
    ///
    /// `X-HTTP-Method-Override` wins over the transport verb when present.
    pub fn from_request(method: &str, headers: &HeaderMap) -> Result<Self, TusError> {
        match optional_header(headers, &METHOD_OVERRIDE) {
            Some(overridden) => Self::parse(overridden),
            None => Self::parse(method),
        }
    }
}

impl fmt::Display for TusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps request paths under the configured base path to upload ids
#[derive(Debug, Clone)]
pub struct RequestParser {
    base_path: String,
}

impl RequestParser {
    /// `base_path` must start and end with `/`
    pub fn new(base_path: impl Into<String>) -> Result<Self, TusError> {
        let base_path = base_path.into();
        if !base_path.starts_with('/') || !base_path.ends_with('/') {
            return Err(TusError::InvalidArgument(format!(
                "base path must start and end with '/': {}",
                base_path
            )));
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether `path` targets the upload endpoint or one of its resources
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.base_path) || path == self.base_path.trim_end_matches('/')
    }

    /// Whether `path` is the upload endpoint itself
    pub fn is_endpoint(&self, path: &str) -> bool {
        path == self.base_path || path == self.base_path.trim_end_matches('/')
    }

    /// Extract the upload id from a resource path
    pub fn upload_id(&self, path: &str) -> Result<UploadId, TusError> {
        let suffix = path.strip_prefix(&self.base_path).ok_or_else(|| {
            TusError::NotFound(format!(
                "{} is not under {}",
                path, self.base_path
            ))
        })?;

        UploadId::parse(suffix)
            .ok_or_else(|| TusError::NotFound(format!("invalid upload id '{}'", suffix)))
    }

    /// Resource path of an upload
    pub fn resource_path(&self, id: &UploadId) -> String {
        format!("{}{}", self.base_path, id)
    }
}
