//! tus protocol vocabulary
//!
//! Header names, version constants and the shared error/response types used by
//! every method handler.

use hyper::header::HeaderName;
use hyper::StatusCode;

mod error;
mod headers;
mod response;

pub use error::TusError;
pub use headers::{optional_header, required_header, required_u64};
pub use response::{ResponseBody, TusResponse};

/// Protocol version spoken by this server (only one version is supported)
pub const TUS_VERSION: &str = "1.0.0";

/// Media type a PATCH body must declare
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Methods advertised in `Allow` and the CORS allow-methods header
pub const ALLOWED_METHODS: &str = "OPTIONS,GET,HEAD,POST,PATCH";

/// Size of the read buffer used by the chunked transfer loop
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Non-standard status sent when an `Upload-Checksum` does not match the received bytes
pub const CHECKSUM_MISMATCH_CODE: u16 = 460;

/// Reason phrase paired with [`CHECKSUM_MISMATCH_CODE`]
pub const CHECKSUM_MISMATCH_REASON: &str = "Checksum Mismatch";

/// Status code for a checksum mismatch
pub fn checksum_mismatch_status() -> StatusCode {
    StatusCode::from_u16(CHECKSUM_MISMATCH_CODE).expect("460 is within the valid status range")
}

// Request headers
pub const FINAL_LENGTH: HeaderName = HeaderName::from_static("final-length");
pub const OFFSET: HeaderName = HeaderName::from_static("offset");
pub const UPLOAD_CHECKSUM: HeaderName = HeaderName::from_static("upload-checksum");
pub const METHOD_OVERRIDE: HeaderName = HeaderName::from_static("x-http-method-override");

// Response headers
pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const TUS_CHECKSUM_ALGORITHM: HeaderName = HeaderName::from_static("tus-checksum-algorithm");
pub const CONTENT_TRANSFER_ENCODING: HeaderName =
    HeaderName::from_static("content-transfer-encoding");

/// Request headers a browser client may send cross-origin
pub const CORS_ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, \
     Final-Length, Offset, Upload-Checksum, X-HTTP-Method-Override";

/// Response headers exposed to cross-origin clients
pub const CORS_EXPOSE_HEADERS: &str = "Location, Range, Content-Disposition, Offset, \
     Tus-Resumable, Tus-Version, Tus-Extension, Tus-Max-Size, Tus-Checksum-Algorithm";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_status() {
        assert_eq!(checksum_mismatch_status().as_u16(), 460);
    }

    #[test]
    fn test_header_names_are_lowercase() {
        assert_eq!(FINAL_LENGTH.as_str(), "final-length");
        assert_eq!(METHOD_OVERRIDE.as_str(), "x-http-method-override");
    }
}
