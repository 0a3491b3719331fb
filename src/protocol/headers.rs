//! Header extraction helpers

use super::TusError;
use hyper::header::{AsHeaderName, HeaderMap};

/// Value of a header, if present and valid UTF-8
pub fn optional_header<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Value of a header that must be present and non-blank
pub fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, TusError> {
    match optional_header(headers, name).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(TusError::HeaderValidation(format!("{} can't be empty", name))),
    }
}

/// Parse a required header as a non-negative integer
pub fn required_u64(headers: &HeaderMap, name: &str) -> Result<u64, TusError> {
    let value = required_header(headers, name)?;
    value.parse::<u64>().map_err(|_| {
        TusError::HeaderValidation(format!("{} must be a positive integer, got '{}'", name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_required_header_missing() {
        let map = HeaderMap::new();
        assert!(matches!(
            required_header(&map, "Final-Length"),
            Err(TusError::HeaderValidation(_))
        ));
    }

    #[test]
    fn test_required_header_blank() {
        let map = headers(&[("final-length", "   ")]);
        assert!(required_header(&map, "Final-Length").is_err());
    }

    #[test]
    fn test_required_u64_is_case_insensitive() {
        let map = headers(&[("final-length", "180")]);
        assert_eq!(required_u64(&map, "Final-Length").unwrap(), 180);
    }

    #[test]
    fn test_required_u64_rejects_negative_and_garbage() {
        let map = headers(&[("offset", "-1")]);
        assert!(required_u64(&map, "Offset").is_err());

        let map = headers(&[("offset", "ten")]);
        assert!(required_u64(&map, "Offset").is_err());
    }
}
