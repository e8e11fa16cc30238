use crate::abort::AbortPredicate;
use crate::config::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, OutputFlags, RedirectAttempt,
    RedirectPolicy, RedirectPredicate, RequestOptions, RequestSpec, TextEncoding, TlsRootConfig,
};
use crate::error::{BoxError, InvalidUriKind, RequestError};
use crate::payload::{MultipartForm, Payload};
use crate::proxy::ProxyConfig;
use crate::request::RequestHeaders;
use crate::response::{RequestOutput, ResponseHead};
use http::{HeaderValue, Method, Uri};
use serde::Serialize;
use std::time::Duration;

/// Fluent builder for [`RequestSpec`]
///
/// Created by [`RequestSpec::builder`]. Errors from individual setters
/// (bad header names, unserializable payloads) are deferred and reported
/// by [`build()`](Self::build), so the chain never has to be interrupted.
///
/// # Example
///
/// ```ignore
/// use http_request::RequestSpec;
///
/// let output = RequestSpec::builder("https://api.example.com/users")
///     .method(http::Method::POST)
///     .header("X-Request-Id", "123")
///     .json(&NewUser { name: "Alice" })
///     .parse_as_structured(true)
///     .throw_on_http_status(true)
///     .send()
///     .await?;
/// ```
#[must_use = "RequestSpecBuilder does nothing until .build() or .send() is called"]
#[derive(Debug)]
pub struct RequestSpecBuilder {
    url: String,
    method: Method,
    headers: RequestHeaders,
    payload: Option<Payload>,
    redirect: RedirectPolicy,
    max_redirects: usize,
    timeout: Duration,
    proxy_url: Option<String>,
    ignore_ssl_errors: bool,
    tls_roots: TlsRootConfig,
    abort_predicate: Option<AbortPredicate>,
    throw_on_http_status: bool,
    flags: OutputFlags,
    text_encoding: TextEncoding,
    user_agent: String,
    /// Error captured during building (deferred to `build()`)
    error: Option<RequestError>,
}

impl RequestSpecBuilder {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: RequestHeaders::new(),
            payload: None,
            redirect: RedirectPolicy::Follow,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            timeout: DEFAULT_TIMEOUT,
            proxy_url: None,
            ignore_ssl_errors: false,
            tls_roots: TlsRootConfig::default(),
            abort_predicate: None,
            throw_on_http_status: false,
            flags: OutputFlags::default(),
            text_encoding: TextEncoding::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            error: None,
        }
    }

    /// Seed a builder from declarative options.
    pub(crate) fn from_options(options: RequestOptions) -> Self {
        let mut builder = Self::new(options.url)
            .max_redirects(options.max_redirects)
            .ignore_ssl_errors(options.ignore_ssl_errors)
            .tls_roots(options.tls_roots)
            .throw_on_http_status(options.throw_on_http_status)
            .decode_body(options.decode_body)
            .parse_as_structured(options.parse_as_structured)
            .stream_output(options.stream_output)
            .use_advanced_compression(options.use_advanced_compression)
            .use_case_sensitive_headers(options.use_case_sensitive_headers)
            .text_encoding(options.text_encoding)
            .follow_redirect(options.follow_redirect);

        builder = match Method::from_bytes(options.method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => builder.method(method),
            Err(_) => builder.fail(RequestError::Config(format!(
                "invalid HTTP method: {:?}",
                options.method
            ))),
        };

        builder = match Duration::try_from_secs_f64(options.timeout_secs) {
            Ok(timeout) => builder.timeout(timeout),
            Err(_) => builder.fail(RequestError::Config(format!(
                "timeout must be a positive number of seconds, got {}",
                options.timeout_secs
            ))),
        };

        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        if let Some(payload) = options.payload {
            builder = builder.payload(Payload::from(payload));
        }
        if let Some(proxy_url) = options.proxy_url {
            builder = builder.proxy_url(proxy_url);
        }
        if let Some(user_agent) = options.user_agent {
            builder = builder.user_agent(user_agent);
        }
        builder
    }

    fn fail(mut self, err: RequestError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    /// HTTP method (default: GET)
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set a request header; a later value for the same name replaces the
    /// earlier one.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.headers.insert(name, value) {
            self.error = Some(e);
        }
        self
    }

    /// Set several request headers in order.
    pub fn headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    /// Request body
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// JSON request body; sets `Content-Type: application/json` unless a
    /// header overrides it.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Self {
        match Payload::json(value) {
            Ok(payload) => self.payload(payload),
            Err(e) => self.fail(e),
        }
    }

    /// URL-encoded form body
    pub fn form<T: Serialize + ?Sized>(self, fields: &T) -> Self {
        match Payload::form(fields) {
            Ok(payload) => self.payload(payload),
            Err(e) => self.fail(e),
        }
    }

    /// `multipart/form-data` body
    pub fn multipart(self, form: MultipartForm) -> Self {
        self.payload(Payload::Multipart(form))
    }

    /// Follow 3xx responses (default: true)
    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.redirect = if follow {
            RedirectPolicy::Follow
        } else {
            RedirectPolicy::Never
        };
        self
    }

    /// Follow only redirects accepted by `predicate`.
    pub fn redirect_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RedirectAttempt) -> bool + Send + Sync + 'static,
    {
        self.redirect = RedirectPolicy::Predicate(RedirectPredicate::new(predicate));
        self
    }

    /// Maximum number of redirects to follow (default: 20)
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Time to wait for response headers (default: 30 seconds)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route the request through an HTTP proxy.
    ///
    /// Credentials in the URL userinfo are sent as `Proxy-Authorization: Basic`.
    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    /// Skip TLS certificate validation (default: false)
    pub fn ignore_ssl_errors(mut self, ignore: bool) -> Self {
        self.ignore_ssl_errors = ignore;
        self
    }

    /// Trust store used for certificate validation (default: webpki)
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.tls_roots = roots;
        self
    }

    /// Veto the response from its head; `Ok(true)` aborts.
    pub fn abort_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResponseHead) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.abort_predicate = Some(AbortPredicate::new(predicate));
        self
    }

    /// Reject buffered responses with status >= 400 (default: false)
    pub fn throw_on_http_status(mut self, throw: bool) -> Self {
        self.throw_on_http_status = throw;
        self
    }

    /// Run the content decoder on the body (default: true)
    pub fn decode_body(mut self, decode: bool) -> Self {
        self.flags.decode_body = decode;
        self
    }

    /// Parse the body as JSON (default: false); requires `decode_body`
    pub fn parse_as_structured(mut self, parse: bool) -> Self {
        self.flags.parse_as_structured = parse;
        self
    }

    /// Return a live stream instead of a buffered envelope (default: false)
    pub fn stream_output(mut self, stream: bool) -> Self {
        self.flags.stream_output = stream;
        self
    }

    /// Advertise and decode brotli (default: false)
    ///
    /// The flag drives the default `Accept-Encoding` only; a caller-supplied
    /// `Accept-Encoding` header wins. Advertising `br` through that header
    /// without this flag leaves brotli bodies undecoded.
    pub fn use_advanced_compression(mut self, enabled: bool) -> Self {
        self.flags.use_advanced_compression = enabled;
        self
    }

    /// Write header names with the caller's exact spelling (default: false)
    pub fn use_case_sensitive_headers(mut self, enabled: bool) -> Self {
        self.flags.use_case_sensitive_headers = enabled;
        self
    }

    /// Encoding used to decode the body text (default: UTF-8)
    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.text_encoding = encoding;
        self
    }

    /// User-Agent sent unless a `User-Agent` header is set
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate and freeze the request.
    ///
    /// # Errors
    ///
    /// Returns a `Config`-kind error, before any I/O, if:
    /// - a setter recorded an error (header, payload, method, timeout)
    /// - `parse_as_structured` is set while `decode_body` is not
    /// - the timeout is zero
    /// - the URL is not an absolute `http`/`https` URL
    /// - the proxy URL is invalid
    /// - the user agent is not a valid header value
    pub fn build(mut self) -> Result<RequestSpec, RequestError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        if self.flags.parse_as_structured && !self.flags.decode_body {
            return Err(RequestError::Config(
                "if \"parse_as_structured\" is true, \"decode_body\" must be true as well"
                    .to_owned(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(RequestError::Config("timeout must be greater than zero".to_owned()));
        }

        let url = validate_url(&self.url)?;
        let proxy = self
            .proxy_url
            .as_deref()
            .map(ProxyConfig::parse)
            .transpose()?;
        HeaderValue::try_from(self.user_agent.as_str())?;

        Ok(RequestSpec {
            url,
            method: self.method,
            headers: self.headers,
            payload: self.payload,
            redirect: self.redirect,
            max_redirects: self.max_redirects,
            timeout: self.timeout,
            proxy,
            ignore_ssl_errors: self.ignore_ssl_errors,
            tls_roots: self.tls_roots,
            abort_predicate: self.abort_predicate,
            throw_on_http_status: self.throw_on_http_status,
            flags: self.flags,
            text_encoding: self.text_encoding,
            user_agent: self.user_agent,
        })
    }

    /// Build and execute the request.
    ///
    /// # Errors
    /// See [`build()`](Self::build) and [`http_request`](crate::http_request).
    pub async fn send(self) -> Result<RequestOutput, RequestError> {
        self.build()?.send().await
    }
}

/// Parse `url` and require an `http` or `https` scheme with an authority.
fn validate_url(url: &str) -> Result<Uri, RequestError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| RequestError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        Some(scheme) => {
            return Err(RequestError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::UnsupportedScheme,
                reason: format!("unsupported scheme '{scheme}', expected http or https"),
            });
        }
        None => {
            return Err(RequestError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            });
        }
    }

    if uri.authority().is_none() {
        return Err(RequestError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    Ok(uri)
}
