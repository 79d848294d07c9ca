pub mod completion;
pub mod synthesis;

pub use completion::AnthropicCompletionService;
pub use synthesis::HttpSpeechService;

use crate::types::ServiceFailure;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

/// Longest retry-after hint honoured.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Seconds from a `retry-after` header, capped at `MAX_RETRY_AFTER`.
/// HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_or(MAX_RETRY_AFTER, |hint| hint.min(MAX_RETRY_AFTER))
        })
}

/// Map a non-success HTTP status onto the failure taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ServiceFailure {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate_body(body));
    match status.as_u16() {
        429 => ServiceFailure::RateLimited {
            retry_after,
            message,
        },
        408 | 500..=599 => ServiceFailure::Transient {
            retry_after,
            message,
        },
        _ => ServiceFailure::fatal(message),
    }
}

/// Map a transport-level error onto the failure taxonomy.
pub fn classify_transport(error: &reqwest::Error) -> ServiceFailure {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        ServiceFailure::transient(error.to_string())
    } else if error.is_decode() {
        ServiceFailure::fatal(format!("malformed response: {}", error))
    } else {
        ServiceFailure::fatal(error.to_string())
    }
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn statuses_map_to_failure_kinds() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            ServiceFailure::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, ""),
            ServiceFailure::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::from_u16(529).unwrap(), None, "overloaded"),
            ServiceFailure::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            ServiceFailure::Fatal { .. }
        ));
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn huge_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(parse_retry_after(&headers), Some(MAX_RETRY_AFTER));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(parse_retry_after(&headers), Some(MAX_RETRY_AFTER));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
