//! Mutable response object threaded through handlers and extensions

use super::TusError;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;

/// Body of a tus response
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    File {
        file: tokio::fs::File,
        length: u64,
    },
}

/// Response under construction
///
/// Handlers set the status and headers; extensions may rewrite them (a
/// checksum mismatch replaces the status and reason phrase).
#[derive(Debug)]
pub struct TusResponse {
    status: StatusCode,
    reason: Option<&'static str>,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Default for TusResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl TusResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Custom reason phrase, if one was set with the status
    pub fn reason(&self) -> Option<&'static str> {
        self.reason
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.reason = None;
    }

    /// Set a status paired with a non-canonical reason phrase
    pub fn set_status_with_reason(&mut self, status: StatusCode, reason: &'static str) {
        self.status = status;
        self.reason = Some(reason);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Set a header from a runtime string
    pub fn set_header_str(&mut self, name: HeaderName, value: &str) -> Result<(), TusError> {
        let value = HeaderValue::from_str(value).map_err(|_| {
            TusError::InvalidArgument(format!("'{}' is not a valid value for {}", value, name))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Header value as a string, mostly useful in tests
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Split into parts for conversion into a transport response
    pub fn into_parts(self) -> (StatusCode, Option<&'static str>, HeaderMap, ResponseBody) {
        (self.status, self.reason, self.headers, self.body)
    }
}
