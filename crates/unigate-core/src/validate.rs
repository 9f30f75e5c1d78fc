use unigate_common::{ErrorKind, GatewayError, LimitsConfig};

/// Request admission checks: size limits, media types, header hygiene, and
/// path-traversal rejection. Pure; the router middleware feeds it raw
/// request parts.
pub struct Validator {
    limits: LimitsConfig,
}

const ALLOWED_CONTENT_TYPES: [&str; 4] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

impl Validator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.limits.max_body_bytes
    }

    /// Declared body size gate; runs before any body read.
    pub fn check_content_length(&self, declared: Option<u64>) -> Result<(), GatewayError> {
        match declared {
            Some(length) if length > self.limits.max_body_bytes as u64 => Err(GatewayError::new(
                ErrorKind::PayloadTooLarge,
                "request body exceeds limit",
            )),
            _ => Ok(()),
        }
    }

    pub fn check_query(&self, raw_query: &str) -> Result<(), GatewayError> {
        if raw_query.len() > self.limits.max_query_bytes {
            return Err(GatewayError::new(
                ErrorKind::UriTooLong,
                "query string exceeds limit",
            ));
        }
        Ok(())
    }

    /// Each header's name+value must fit the limit; values must not carry
    /// control bytes (tab excepted) or NUL.
    pub fn check_header(&self, name: &str, value: &[u8]) -> Result<(), GatewayError> {
        if name.len() + value.len() > self.limits.max_header_bytes {
            return Err(GatewayError::new(
                ErrorKind::RequestHeaderTooLarge,
                format!("header {name:?} exceeds limit"),
            ));
        }
        if value
            .iter()
            .any(|byte| (*byte < 0x20 && *byte != b'\t') || *byte == 0x7f)
        {
            return Err(GatewayError::invalid_request(format!(
                "header {name:?} contains control characters"
            )));
        }
        Ok(())
    }

    /// Content-Type gate for body-carrying methods.
    pub fn check_content_type(&self, method: &str, content_type: Option<&str>) -> Result<(), GatewayError> {
        if matches!(method, "GET" | "HEAD" | "OPTIONS" | "DELETE") {
            return Ok(());
        }
        let Some(content_type) = content_type else {
            return Ok(());
        };
        let normalized = content_type.trim().to_ascii_lowercase();
        if ALLOWED_CONTENT_TYPES
            .iter()
            .any(|allowed| normalized.starts_with(allowed))
        {
            Ok(())
        } else {
            Err(GatewayError::new(
                ErrorKind::UnsupportedMediaType,
                format!("content type {content_type:?} not allowed"),
            ))
        }
    }

    /// Rejects traversal attempts. The path is percent-decoded twice (so
    /// `%252e` folds like `%2e`) with lossy UTF-8 handling, then matched
    /// against the canonical `../` and `..\` forms; the raw overlong UTF-8
    /// encodings are rejected before decoding since they never appear in
    /// legitimate paths.
    pub fn check_path(&self, path: &str) -> Result<(), GatewayError> {
        let lowered = path.to_ascii_lowercase();
        for overlong in ["%c0%ae", "%c0%af", "%e0%80%ae"] {
            if lowered.contains(overlong) {
                return Err(traversal_error());
            }
        }
        let once = percent_decode_lossy(&lowered);
        let twice = percent_decode_lossy(&once);
        for decoded in [once, twice] {
            if decoded.contains("../") || decoded.contains("..\\") {
                return Err(traversal_error());
            }
        }
        Ok(())
    }
}

fn traversal_error() -> GatewayError {
    GatewayError::invalid_request("path traversal pattern in request path")
}

fn percent_decode_lossy(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(LimitsConfig::default())
    }

    #[test]
    fn body_boundary_is_inclusive() {
        let v = validator();
        let max = v.max_body_bytes() as u64;
        assert!(v.check_content_length(Some(max)).is_ok());
        assert!(v.check_content_length(Some(max + 1)).is_err());
        assert!(v.check_content_length(None).is_ok());
    }

    #[test]
    fn query_boundary_is_inclusive() {
        let v = validator();
        let exact = "q".repeat(2 * 1024);
        assert!(v.check_query(&exact).is_ok());
        let over = "q".repeat(2 * 1024 + 1);
        assert_eq!(
            v.check_query(&over).unwrap_err().kind,
            ErrorKind::UriTooLong
        );
    }

    #[test]
    fn oversized_header_and_control_chars() {
        let v = validator();
        let big = vec![b'a'; 9 * 1024];
        assert_eq!(
            v.check_header("x-big", &big).unwrap_err().kind,
            ErrorKind::RequestHeaderTooLarge
        );
        assert!(v.check_header("x-ok", b"plain\tvalue").is_ok());
        assert_eq!(
            v.check_header("x-bad", b"a\x00b").unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            v.check_header("x-bad", b"a\rb").unwrap_err().kind,
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn content_type_gate() {
        let v = validator();
        assert!(v
            .check_content_type("POST", Some("application/json; charset=utf-8"))
            .is_ok());
        assert!(v.check_content_type("GET", Some("image/png")).is_ok());
        assert_eq!(
            v.check_content_type("POST", Some("application/xml"))
                .unwrap_err()
                .kind,
            ErrorKind::UnsupportedMediaType
        );
    }

    #[test]
    fn traversal_variants_fold_to_one_form() {
        let v = validator();
        for path in [
            "/v1/../etc/passwd",
            "/v1/%2e%2e/etc",
            "/v1/%252e%252e/etc",
            "/v1/..%5cwindows",
            "/v1/%c0%ae%c0%ae/boot",
        ] {
            assert!(v.check_path(path).is_err(), "{path} should be rejected");
        }
        assert!(v.check_path("/v1/chat/completions").is_ok());
        assert!(v.check_path("/v1/models/gpt-4.1").is_ok());
    }
}
