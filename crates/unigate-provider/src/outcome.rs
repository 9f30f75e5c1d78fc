use std::time::{Duration, SystemTime};

/// Broad failure class used by the retry policy and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    HttpStatus(u16),
    Connect,
    Dns,
    Tls,
    Io,
}

impl OutcomeKind {
    pub fn label(&self) -> String {
        match self {
            OutcomeKind::HttpStatus(status) => format!("http_{status}"),
            OutcomeKind::Connect => "connect".to_string(),
            OutcomeKind::Dns => "dns".to_string(),
            OutcomeKind::Tls => "tls".to_string(),
            OutcomeKind::Io => "io".to_string(),
        }
    }
}

/// Closed set of attempt outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable(OutcomeKind),
    Fatal(OutcomeKind),
    /// 429 or an explicit quota signal; carries the upstream's reset hint.
    QuotaExceeded { retry_after: Option<Duration> },
    Timeout,
    Canceled,
}

/// Quota fallback when the upstream gives no reset hint.
pub const QUOTA_FALLBACK: Duration = Duration::from_secs(60);

impl Outcome {
    /// Classifies an upstream HTTP status per the dispatch table:
    /// 2xx success; 400/401/404/422 fatal; 403 and 408/5xx retryable;
    /// 429 quota.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            200..=299 => Outcome::Success,
            400 | 401 | 404 | 422 => Outcome::Fatal(OutcomeKind::HttpStatus(status)),
            403 => Outcome::Retryable(OutcomeKind::HttpStatus(status)),
            408 | 500 | 502 | 503 | 504 => Outcome::Retryable(OutcomeKind::HttpStatus(status)),
            429 => Outcome::QuotaExceeded { retry_after },
            500..=599 => Outcome::Retryable(OutcomeKind::HttpStatus(status)),
            _ => Outcome::Fatal(OutcomeKind::HttpStatus(status)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::Retryable(_) | Outcome::QuotaExceeded { .. } | Outcome::Timeout
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Whether the breaker counts this attempt as a failure. Cancellation
    /// says nothing about upstream health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Outcome::Success | Outcome::Canceled)
    }

    pub fn label(&self) -> String {
        match self {
            Outcome::Success => "success".to_string(),
            Outcome::Retryable(kind) => format!("retryable_{}", kind.label()),
            Outcome::Fatal(kind) => format!("fatal_{}", kind.label()),
            Outcome::QuotaExceeded { .. } => "quota_exceeded".to_string(),
            Outcome::Timeout => "timeout".to_string(),
            Outcome::Canceled => "canceled".to_string(),
        }
    }
}

/// Parses `Retry-After`, accepting both delta-seconds and HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert!(Outcome::from_status(200, None).is_success());
        assert_eq!(
            Outcome::from_status(404, None),
            Outcome::Fatal(OutcomeKind::HttpStatus(404))
        );
        assert!(Outcome::from_status(403, None).is_retryable());
        assert!(Outcome::from_status(503, None).is_retryable());
        assert!(matches!(
            Outcome::from_status(429, Some(Duration::from_secs(30))),
            Outcome::QuotaExceeded {
                retry_after: Some(d)
            } if d.as_secs() == 30
        ));
    }

    #[test]
    fn canceled_is_not_retryable_and_not_a_failure() {
        assert!(!Outcome::Canceled.is_retryable());
        assert!(!Outcome::Canceled.counts_as_failure());
    }

    #[test]
    fn retry_after_delta_seconds() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("soon"), None);
    }
}
