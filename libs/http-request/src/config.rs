use crate::abort::AbortPredicate;
use crate::builder::RequestSpecBuilder;
use crate::error::RequestError;
use crate::payload::Payload;
use crate::proxy::ProxyConfig;
use crate::request::RequestHeaders;
use crate::response::RequestOutput;
use http::{Method, StatusCode, Uri};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default User-Agent string for requests
pub const DEFAULT_USER_AGENT: &str = concat!("http-request/", env!("CARGO_PKG_VERSION"));

/// Default cap on followed redirects
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Default time to wait for response headers
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Character encoding used to turn the drained body into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced with U+FFFD
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    /// ISO-8859-1, every byte maps to the code point of the same value
    #[serde(
        rename = "latin1",
        alias = "iso-8859-1",
        alias = "ISO-8859-1",
        alias = "binary"
    )]
    Latin1,
}

impl TextEncoding {
    /// Decode `bytes` into a string.
    #[must_use]
    pub fn decode(self, bytes: Vec<u8>) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
            TextEncoding::Latin1 => bytes.into_iter().map(char::from).collect(),
        }
    }
}

/// TLS root certificate strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// The five orthogonal switches that shape the response pipeline.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    /// Run the response through the content decoder (default: true)
    pub decode_body: bool,
    /// Parse the decoded body as JSON; requires `decode_body` (default: false)
    pub parse_as_structured: bool,
    /// Hand back a live stream instead of a buffered envelope (default: false)
    pub stream_output: bool,
    /// Advertise and decode brotli (default: false)
    ///
    /// Only sets the default `Accept-Encoding`. A caller-supplied
    /// `Accept-Encoding` is sent as-is, so `br` can be advertised while this
    /// flag is off; such bodies are then returned undecoded.
    pub use_advanced_compression: bool,
    /// Write header names with the caller's exact spelling (default: false)
    pub use_case_sensitive_headers: bool,
}

impl Default for OutputFlags {
    fn default() -> Self {
        Self {
            decode_body: true,
            parse_as_structured: false,
            stream_output: false,
            use_advanced_compression: false,
            use_case_sensitive_headers: false,
        }
    }
}

/// A redirect the transport is about to follow.
#[derive(Debug, Clone)]
pub struct RedirectAttempt {
    /// Status of the redirect response
    pub status: StatusCode,
    /// Resolved target of the `Location` header
    pub location: Uri,
    /// URL of the request that produced the redirect
    pub previous: Uri,
}

/// Caller-supplied decision over each redirect hop.
#[derive(Clone)]
pub struct RedirectPredicate(Arc<dyn Fn(&RedirectAttempt) -> bool + Send + Sync>);

impl RedirectPredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RedirectAttempt) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[must_use]
    pub fn allows(&self, attempt: &RedirectAttempt) -> bool {
        (self.0)(attempt)
    }
}

impl fmt::Debug for RedirectPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RedirectPredicate(..)")
    }
}

/// How 3xx responses are handled.
#[derive(Debug, Clone, Default)]
pub enum RedirectPolicy {
    /// Follow every redirect up to the hop limit (default)
    #[default]
    Follow,
    /// Return the 3xx response as-is
    Never,
    /// Follow only the hops the predicate accepts
    Predicate(RedirectPredicate),
}

/// Declarative request options.
///
/// This is the serializable form of a request, suitable for loading from
/// JSON or YAML configuration. Every field except `url` has a default.
/// Closures (abort and redirect predicates) and binary or form payloads
/// are only available through [`RequestSpec::builder`].
///
/// ```ignore
/// let options: RequestOptions = serde_json::from_str(r#"{
///     "url": "https://example.com/api",
///     "method": "POST",
///     "payload": {"name": "test"},
///     "parseAsStructured": true,
///     "timeoutSecs": 5
/// }"#)?;
/// let output = RequestSpec::from_options(options)?.send().await?;
/// ```
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Target URL (http or https)
    pub url: String,
    /// HTTP method (default: GET)
    pub method: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request body; a JSON string is sent as text, anything else as JSON
    pub payload: Option<serde_json::Value>,
    /// Follow 3xx responses (default: true)
    pub follow_redirect: bool,
    /// Maximum number of redirects to follow (default: 20)
    pub max_redirects: usize,
    /// Seconds to wait for response headers (default: 30)
    pub timeout_secs: f64,
    /// HTTP proxy, credentials in the userinfo part
    pub proxy_url: Option<String>,
    /// Skip certificate validation (default: false)
    pub ignore_ssl_errors: bool,
    /// Trust store for certificate validation (default: webpki)
    pub tls_roots: TlsRootConfig,
    /// Reject buffered responses with status >= 400 (default: false)
    pub throw_on_http_status: bool,
    /// See [`OutputFlags::decode_body`]
    pub decode_body: bool,
    /// See [`OutputFlags::parse_as_structured`]
    pub parse_as_structured: bool,
    /// See [`OutputFlags::stream_output`]
    pub stream_output: bool,
    /// See [`OutputFlags::use_advanced_compression`]
    pub use_advanced_compression: bool,
    /// See [`OutputFlags::use_case_sensitive_headers`]
    pub use_case_sensitive_headers: bool,
    /// Encoding of the materialized body text (default: utf-8)
    pub text_encoding: TextEncoding,
    /// User-Agent sent unless a header sets one
    pub user_agent: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        let flags = OutputFlags::default();
        Self {
            url: String::new(),
            method: Method::GET.as_str().to_owned(),
            headers: BTreeMap::new(),
            payload: None,
            follow_redirect: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            proxy_url: None,
            ignore_ssl_errors: false,
            tls_roots: TlsRootConfig::default(),
            throw_on_http_status: false,
            decode_body: flags.decode_body,
            parse_as_structured: flags.parse_as_structured,
            stream_output: flags.stream_output,
            use_advanced_compression: flags.use_advanced_compression,
            use_case_sensitive_headers: flags.use_case_sensitive_headers,
            text_encoding: TextEncoding::default(),
            user_agent: None,
        }
    }
}

/// A validated, immutable description of one request.
///
/// Built with [`RequestSpec::builder`] or [`RequestSpec::from_options`];
/// both run the same validation, so an existing `RequestSpec` never holds
/// a contradictory option set.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub(crate) url: Uri,
    pub(crate) method: Method,
    pub(crate) headers: RequestHeaders,
    pub(crate) payload: Option<Payload>,
    pub(crate) redirect: RedirectPolicy,
    pub(crate) max_redirects: usize,
    pub(crate) timeout: Duration,
    pub(crate) proxy: Option<ProxyConfig>,
    pub(crate) ignore_ssl_errors: bool,
    pub(crate) tls_roots: TlsRootConfig,
    pub(crate) abort_predicate: Option<AbortPredicate>,
    pub(crate) throw_on_http_status: bool,
    pub(crate) flags: OutputFlags,
    pub(crate) text_encoding: TextEncoding,
    pub(crate) user_agent: String,
}

impl RequestSpec {
    /// Start a fluent builder for `url`.
    pub fn builder(url: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder::new(url)
    }

    /// Validate declarative options into a spec.
    ///
    /// # Errors
    /// Returns a `Config`-kind error for invalid URLs, methods, headers,
    /// proxy settings, timeouts, or `parse_as_structured` without
    /// `decode_body`.
    pub fn from_options(options: RequestOptions) -> Result<Self, RequestError> {
        RequestSpecBuilder::from_options(options).build()
    }

    /// Execute the request.
    ///
    /// # Errors
    /// See [`http_request`](crate::http_request).
    pub async fn send(self) -> Result<RequestOutput, RequestError> {
        crate::pipeline::execute(self).await
    }

    #[must_use]
    pub fn url(&self) -> &Uri {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    #[must_use]
    pub fn flags(&self) -> OutputFlags {
        self.flags
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    #[must_use]
    pub fn redirect_policy(&self) -> &RedirectPolicy {
        &self.redirect
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    #[must_use]
    pub fn text_encoding(&self) -> TextEncoding {
        self.text_encoding
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
