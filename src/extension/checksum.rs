//! Checksum extension
//!
//! `OPTIONS` advertises the available algorithms in `Tus-Checksum-Algorithm`.
//! A `PATCH` carrying `Upload-Checksum: <algorithm> <base64 digest>` is
//! verified after the body has been written: the digest of exactly the bytes
//! received by that request must match, otherwise the response becomes
//! `460 Checksum Mismatch`. The written bytes are not rolled back.
//!
//! The digest is computed while the body streams, so verification needs no
//! copy of the body.

use super::{BodyObserver, Extension, Hook, Support};
use crate::protocol::{
    checksum_mismatch_status, optional_header, TusError, TusResponse, CHECKSUM_MISMATCH_REASON,
    TUS_CHECKSUM_ALGORITHM, UPLOAD_CHECKSUM,
};
use crate::router::TusMethod;
use base64::Engine;
use hyper::header::{HeaderMap, HeaderValue};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Digest algorithms the server can verify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Every algorithm compiled into the server
    pub const ALL: [ChecksumAlgorithm; 5] = [
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha224,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha384,
        ChecksumAlgorithm::Sha512,
    ];

    /// Algorithm every server must offer
    pub const MANDATORY: ChecksumAlgorithm = ChecksumAlgorithm::Sha1;

    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha224 => "sha224",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }

    /// Raw digest of `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }

    /// Base64 digest of `data`, as carried in `Upload-Checksum`
    pub fn encoded_digest(&self, data: &[u8]) -> String {
        encode(&self.digest(data))
    }
}

fn encode(digest: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(digest)
}

enum Hasher {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha224 => Hasher::Sha224(Sha224::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Running digest of one PATCH body
pub struct DigestObserver {
    algorithm: ChecksumAlgorithm,
    hasher: Option<Hasher>,
}

impl DigestObserver {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            hasher: Some(Hasher::new(algorithm)),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }
}

impl BodyObserver for DigestObserver {
    fn update(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
    }

    // Raw digest; a second call yields the digest of nothing
    fn finish(&mut self) -> Vec<u8> {
        self.hasher
            .replace(Hasher::new(self.algorithm))
            .map(Hasher::finalize)
            .unwrap_or_default()
    }
}

// Algorithm names may only use lowercase ASCII letters and digits
fn is_valid_algorithm_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// The checksum extension
#[derive(Debug, Clone)]
pub struct ChecksumExtension {
    algorithms: Vec<ChecksumAlgorithm>,
}

impl ChecksumExtension {
    /// Extension offering every compiled-in algorithm
    pub fn new() -> Self {
        Self {
            algorithms: ChecksumAlgorithm::ALL.to_vec(),
        }
    }

    /// Extension offering only the named algorithms
    ///
    /// Unknown names and a set without the mandatory `sha1` are deployment
    /// mistakes and fail with [`TusError::Misconfiguration`].
    pub fn with_algorithms<S: AsRef<str>>(names: &[S]) -> Result<Self, TusError> {
        let mut algorithms = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !is_valid_algorithm_name(name) {
                tracing::warn!(algorithm = name, "Skipping checksum algorithm with invalid name");
                continue;
            }
            let alg = ChecksumAlgorithm::from_name(name).ok_or_else(|| {
                TusError::Misconfiguration(format!("unknown checksum algorithm '{}'", name))
            })?;
            if !algorithms.contains(&alg) {
                algorithms.push(alg);
            }
        }

        if !algorithms.contains(&ChecksumAlgorithm::MANDATORY) {
            return Err(TusError::Misconfiguration(format!(
                "the server must support the {} checksum algorithm",
                ChecksumAlgorithm::MANDATORY.name()
            )));
        }

        Ok(Self { algorithms })
    }

    pub fn algorithms(&self) -> &[ChecksumAlgorithm] {
        &self.algorithms
    }

    /// Comma-joined names for `Tus-Checksum-Algorithm`
    pub fn advertised(&self) -> String {
        self.algorithms
            .iter()
            .map(ChecksumAlgorithm::name)
            .collect::<Vec<_>>()
            .join(",")
    }

    // Split `Upload-Checksum` into a supported algorithm and the client digest
    fn parse_header<'h>(
        &self,
        value: &'h str,
    ) -> Result<(ChecksumAlgorithm, &'h str), TusError> {
        let parts: Vec<&str> = value.split(' ').collect();
        let [name, digest] = parts.as_slice() else {
            return Err(TusError::HeaderValidation(
                "Upload-Checksum must contain the algorithm and the hash value".into(),
            ));
        };

        match ChecksumAlgorithm::from_name(name) {
            Some(alg) if self.algorithms.contains(&alg) => Ok((alg, *digest)),
            _ => Err(TusError::HeaderValidation(format!(
                "{} is not a supported hash algorithm",
                name
            ))),
        }
    }
}

impl Default for ChecksumExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for ChecksumExtension {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn has_support(
        &self,
        method: TusMethod,
        headers: &HeaderMap,
        hook: Hook,
    ) -> Result<Support, TusError> {
        match (method, hook) {
            (TusMethod::Options, Hook::Before) => Ok(Support::Soft),
            (TusMethod::Patch, Hook::After) => {
                let Some(value) = headers.get(&UPLOAD_CHECKSUM) else {
                    return Ok(Support::None);
                };
                let value = value.to_str().map_err(|_| {
                    TusError::HeaderValidation("Upload-Checksum must be ASCII".into())
                })?;
                self.parse_header(value)?;
                Ok(Support::Strict)
            }
            _ => Ok(Support::None),
        }
    }

    fn body_observer(
        &self,
        method: TusMethod,
        headers: &HeaderMap,
    ) -> Option<Box<dyn BodyObserver>> {
        if method != TusMethod::Patch {
            return None;
        }
        let value = optional_header(headers, &UPLOAD_CHECKSUM)?;
        let (algorithm, _) = self.parse_header(value).ok()?;
        Some(Box::new(DigestObserver::new(algorithm)))
    }

    fn process(
        &self,
        headers: &HeaderMap,
        response: &mut TusResponse,
        observed: Option<&[u8]>,
    ) -> bool {
        let Some(digest) = observed else {
            // OPTIONS: advertise what we can verify
            match HeaderValue::from_str(&self.advertised()) {
                Ok(advertised) => response.set_header(TUS_CHECKSUM_ALGORITHM, advertised),
                Err(_) => return false,
            }
            return true;
        };

        let Some(value) = optional_header(headers, &UPLOAD_CHECKSUM) else {
            return true;
        };

        let Ok((algorithm, expected)) = self.parse_header(value) else {
            return false;
        };

        let actual = encode(digest);
        if actual != expected {
            tracing::warn!(
                algorithm = algorithm.name(),
                expected,
                actual = %actual,
                "Upload-Checksum mismatch"
            );
            crate::metrics::record_checksum_mismatch();
            response.set_status_with_reason(checksum_mismatch_status(), CHECKSUM_MISMATCH_REASON);
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn checksum_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(UPLOAD_CHECKSUM, HeaderValue::from_str(value).unwrap());
        headers
    }

    // Stream `chunks` through the extension's observer for this request
    fn observe(ext: &ChecksumExtension, headers: &HeaderMap, chunks: &[&[u8]]) -> Vec<u8> {
        let mut observer = ext.body_observer(TusMethod::Patch, headers).unwrap();
        for chunk in chunks {
            observer.update(chunk);
        }
        observer.finish()
    }

    #[test]
    fn test_known_sha1_digest() {
        assert_eq!(
            ChecksumAlgorithm::Sha1.encoded_digest(b"test"),
            "qUqP5cyxm6YcTAhz05Hph5gvu9M="
        );
    }

    #[test]
    fn test_no_support_without_client_header() {
        let ext = ChecksumExtension::new();
        let headers = HeaderMap::new();
        for method in [
            TusMethod::Get,
            TusMethod::Post,
            TusMethod::Head,
            TusMethod::Patch,
        ] {
            for hook in [Hook::Before, Hook::After] {
                assert_eq!(ext.has_support(method, &headers, hook).unwrap(), Support::None);
            }
        }
    }

    #[test]
    fn test_support_matrix_with_header() {
        let ext = ChecksumExtension::new();
        let headers = checksum_headers("sha1 qUqP5cyxm6YcTAhz05Hph5gvu9M=");

        assert_eq!(
            ext.has_support(TusMethod::Patch, &headers, Hook::After).unwrap(),
            Support::Strict
        );
        assert_eq!(
            ext.has_support(TusMethod::Patch, &headers, Hook::Before).unwrap(),
            Support::None
        );
        assert_eq!(
            ext.has_support(TusMethod::Options, &headers, Hook::Before).unwrap(),
            Support::Soft
        );
        assert_eq!(
            ext.has_support(TusMethod::Options, &headers, Hook::After).unwrap(),
            Support::None
        );
        assert_eq!(
            ext.has_support(TusMethod::Get, &headers, Hook::After).unwrap(),
            Support::None
        );
    }

    #[test]
    fn test_header_without_digest_is_rejected() {
        let ext = ChecksumExtension::new();
        let headers = checksum_headers("sha1");
        assert!(matches!(
            ext.has_support(TusMethod::Patch, &headers, Hook::After),
            Err(TusError::HeaderValidation(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let ext = ChecksumExtension::new();
        let headers = checksum_headers("## qUqP5cyxm6YcTAhz05Hph5gvu9M=");
        assert!(ext
            .has_support(TusMethod::Patch, &headers, Hook::After)
            .is_err());

        let restricted = ChecksumExtension::with_algorithms(&["sha1"]).unwrap();
        let headers = checksum_headers("sha256 abc=");
        assert!(restricted
            .has_support(TusMethod::Patch, &headers, Hook::After)
            .is_err());
    }

    #[test]
    fn test_matching_digest_leaves_response_untouched() {
        let ext = ChecksumExtension::new();
        let headers = checksum_headers("sha1 qUqP5cyxm6YcTAhz05Hph5gvu9M=");
        let mut response = TusResponse::default();

        let digest = observe(&ext, &headers, &[b"te", b"st"]);
        assert!(ext.process(&headers, &mut response, Some(&digest)));
        assert!(response.header("Tus-Checksum-Algorithm").is_none());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_mismatching_digest_sets_460() {
        let ext = ChecksumExtension::new();
        let digest = ChecksumAlgorithm::Sha1.encoded_digest(b"bad-content");
        let headers = checksum_headers(&format!("sha1 {}", digest));
        let mut response = TusResponse::default();

        let digest = observe(&ext, &headers, &[b"test"]);
        assert!(!ext.process(&headers, &mut response, Some(&digest)));
        assert_eq!(response.status().as_u16(), 460);
        assert_eq!(response.reason(), Some("Checksum Mismatch"));
    }

    #[test]
    fn test_sha256_digest() {
        let ext = ChecksumExtension::new();
        let digest = ChecksumAlgorithm::Sha256.encoded_digest(b"payload");
        let headers = checksum_headers(&format!("sha256 {}", digest));
        let mut response = TusResponse::default();
        let digest = observe(&ext, &headers, &[b"pay", b"lo", b"ad"]);
        assert!(ext.process(&headers, &mut response, Some(&digest)));
    }

    #[test]
    fn test_streamed_digest_matches_one_shot_digest() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        for algorithm in ChecksumAlgorithm::ALL {
            let mut observer = DigestObserver::new(algorithm);
            for chunk in data.chunks(8 * 1024) {
                observer.update(chunk);
            }
            assert_eq!(observer.finish(), algorithm.digest(&data), "{}", algorithm.name());
        }
    }

    #[test]
    fn test_observer_only_for_patch_with_header() {
        let ext = ChecksumExtension::new();
        let headers = checksum_headers("sha256 abc=");
        assert!(ext.body_observer(TusMethod::Patch, &HeaderMap::new()).is_none());
        assert!(ext.body_observer(TusMethod::Options, &headers).is_none());
        assert!(ext.body_observer(TusMethod::Patch, &headers).is_some());
    }

    #[test]
    fn test_options_advertises_algorithms() {
        let ext = ChecksumExtension::with_algorithms(&["sha256", "sha1"]).unwrap();
        let mut response = TusResponse::default();

        assert!(ext.process(&HeaderMap::new(), &mut response, None));
        assert_eq!(response.header("Tus-Checksum-Algorithm"), Some("sha256,sha1"));
    }

    #[test]
    fn test_mandatory_algorithm_required() {
        assert!(matches!(
            ChecksumExtension::with_algorithms(&["sha256"]),
            Err(TusError::Misconfiguration(_))
        ));
        assert!(matches!(
            ChecksumExtension::with_algorithms(&["sha1", "md4"]),
            Err(TusError::Misconfiguration(_))
        ));
        // Names outside [a-z0-9] are filtered rather than rejected
        let ext = ChecksumExtension::with_algorithms(&["sha1", "SHA-512"]).unwrap();
        assert_eq!(ext.algorithms(), &[ChecksumAlgorithm::Sha1]);
    }
}
