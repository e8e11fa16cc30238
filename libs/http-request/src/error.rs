use crate::response::ResponseHead;
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for transport, body and caller-supplied failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a [`RequestError`].
///
/// Every variant of [`RequestError`] maps to exactly one kind, which lets
/// callers branch on the failure family without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid option combination or malformed input, raised before any I/O
    Config,
    /// Network, DNS, TLS, proxy tunnel or header timeout failure
    Transport,
    /// The abort predicate vetoed the response or failed itself
    Abort,
    /// Body drain or decompression failure, or status-triggered rejection
    BodyRead,
    /// The body could not be parsed as JSON
    Parse,
}

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
    /// URL scheme is neither `http` nor `https`
    UnsupportedScheme,
}

/// Errors returned by [`http_request`](crate::http_request).
///
/// Variants raised after response headers arrived carry the originating
/// [`ResponseHead`], reachable through [`RequestError::head`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RequestError {
    /// Invalid option combination
    #[error("invalid request configuration: {0}")]
    Config(String),

    /// Invalid target URL
    ///
    /// Use the `kind` field for programmatic matching; `reason` is a
    /// diagnostic message with an unstable format.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request payload could not be serialized
    #[error("Failed to encode request payload: {0}")]
    PayloadEncode(#[source] BoxError),

    /// No response headers arrived within the configured timeout
    #[error("Timeout awaiting response headers after {0:?}")]
    Timeout(Duration),

    /// Transport error (connection, DNS, TLS, proxy tunnel, protocol)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The abort predicate returned `true`
    #[error("request for {} aborted by abort predicate", .head.url())]
    Aborted { head: Box<ResponseHead> },

    /// The abort predicate itself failed; the caller's error is kept as-is
    #[error(transparent)]
    AbortPredicate(BoxError),

    /// The response declared a content coding outside the supported set
    #[error(
        "Invalid Content-Encoding header. Expected gzip, deflate, br or identity, but received: {encoding}"
    )]
    UnsupportedEncoding {
        encoding: String,
        head: Box<ResponseHead>,
    },

    /// Status >= 400 with `throw_on_http_status` enabled
    #[error("{message}")]
    HttpStatus {
        message: String,
        head: Box<ResponseHead>,
    },

    /// The response body could not be read or decoded
    #[error("could not read response body: {message}")]
    BodyRead {
        message: String,
        head: Option<Box<ResponseHead>>,
        #[source]
        source: BoxError,
    },

    /// The body was read but is not valid JSON
    #[error("could not parse the response body as JSON: {source}")]
    Parse {
        head: Box<ResponseHead>,
        /// The unparsed body text
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// The failure family of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Config(_)
            | RequestError::InvalidUri { .. }
            | RequestError::InvalidHeaderName(_)
            | RequestError::InvalidHeaderValue(_)
            | RequestError::PayloadEncode(_) => ErrorKind::Config,
            RequestError::Timeout(_) | RequestError::Transport(_) => ErrorKind::Transport,
            RequestError::Aborted { .. } | RequestError::AbortPredicate(_) => ErrorKind::Abort,
            RequestError::UnsupportedEncoding { .. }
            | RequestError::HttpStatus { .. }
            | RequestError::BodyRead { .. } => ErrorKind::BodyRead,
            RequestError::Parse { .. } => ErrorKind::Parse,
        }
    }

    /// The response metadata this error originated from, when headers had
    /// already been received.
    #[must_use]
    pub fn head(&self) -> Option<&ResponseHead> {
        match self {
            RequestError::Aborted { head }
            | RequestError::UnsupportedEncoding { head, .. }
            | RequestError::HttpStatus { head, .. }
            | RequestError::Parse { head, .. } => Some(head),
            RequestError::BodyRead { head, .. } => head.as_deref(),
            _ => None,
        }
    }

    /// Shortcut for `self.head().map(ResponseHead::status)`.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.head().map(ResponseHead::status)
    }

    /// Returns `true` if the response headers did not arrive in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }

    /// Recover the exact error raised by the abort predicate.
    ///
    /// The returned box is the one the predicate produced, so it can be
    /// downcast to the caller's own error type.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged for every other variant.
    pub fn into_predicate_error(self) -> Result<BoxError, Self> {
        match self {
            RequestError::AbortPredicate(err) => Ok(err),
            other => Err(other),
        }
    }
}

impl From<hyper::Error> for RequestError {
    fn from(err: hyper::Error) -> Self {
        RequestError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for RequestError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        RequestError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{HeaderMap, Version};
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    fn head() -> Box<ResponseHead> {
        Box::new(ResponseHead::new(
            "http://example.com/page".to_owned(),
            StatusCode::INTERNAL_SERVER_ERROR,
            Version::HTTP_11,
            HeaderMap::new(),
        ))
    }

    #[test]
    fn test_transport_error_preserves_source() {
        let err = RequestError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.unwrap().0, "connection refused");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_abort_message_names_url() {
        let err = RequestError::Aborted { head: head() };
        assert_eq!(
            err.to_string(),
            "request for http://example.com/page aborted by abort predicate"
        );
        assert_eq!(err.kind(), ErrorKind::Abort);
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_predicate_error_is_transparent() {
        let err = RequestError::AbortPredicate(Box::new(TestError("custom")));
        assert_eq!(err.to_string(), "custom");
        assert!(err.head().is_none());

        let original = err.into_predicate_error().unwrap();
        assert_eq!(original.downcast_ref::<TestError>().unwrap().0, "custom");
    }

    #[test]
    fn test_into_predicate_error_rejects_other_variants() {
        let err = RequestError::Timeout(Duration::from_secs(1));
        let back = err.into_predicate_error().unwrap_err();
        assert!(back.is_timeout());
    }

    #[test]
    fn test_body_read_keeps_head_and_source() {
        let err = RequestError::BodyRead {
            message: "truncated".to_owned(),
            head: Some(head()),
            source: Box::new(TestError("eof")),
        };
        assert_eq!(err.kind(), ErrorKind::BodyRead);
        assert_eq!(err.head().unwrap().url(), "http://example.com/page");
        assert_eq!(err.source().unwrap().to_string(), "eof");
    }

    #[test]
    fn test_unsupported_encoding_names_token() {
        let err = RequestError::UnsupportedEncoding {
            encoding: "compress".to_owned(),
            head: head(),
        };
        let msg = err.to_string();
        assert!(msg.contains("compress"));
        assert!(msg.contains("gzip, deflate, br or identity"));
        assert_eq!(err.kind(), ErrorKind::BodyRead);
    }
}
