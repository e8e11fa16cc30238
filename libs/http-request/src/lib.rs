#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Single-shot HTTP requests with a controllable response pipeline
//!
//! This crate sends one HTTP/1.1 or HTTP/2 request and turns the response
//! into either a fully materialized envelope or a live decoded stream:
//! - Redirect following with a hop limit and an optional predicate
//! - HTTP proxies via `CONNECT`, with Basic auth taken from the proxy URL
//! - TLS via rustls (webpki or native roots, validation can be disabled)
//! - An abort predicate that may veto the response once headers arrive
//! - **Response decoding** (gzip, deflate, and brotli when enabled)
//! - Optional rejection of error statuses with a message built from the body
//! - Header names sent with their original spelling on request
//!
//! # Pipeline
//!
//! ```text
//! Sent → HeadersReceived → {Aborted | Decompressing} → {Streaming | Buffering} → Resolved | Rejected
//! ```
//!
//! # Example
//!
//! ```ignore
//! use http_request::{RequestSpec, http_request};
//! use std::time::Duration;
//!
//! let spec = RequestSpec::builder("https://example.com/api")
//!     .header("Accept", "application/json")
//!     .timeout(Duration::from_secs(10))
//!     .parse_as_structured(true)
//!     .throw_on_http_status(true)
//!     .build()?;
//!
//! let envelope = http_request(spec).await?.into_envelope().unwrap();
//! let data: MyData = envelope.json_as()?;
//! ```

mod abort;
mod body;
mod builder;
mod classify;
mod config;
mod decompress;
mod error;
mod header_case;
mod layers;
mod payload;
mod pipeline;
mod proxy;
mod request;
mod response;
mod tls;
mod transport;
mod tunnel_guard;

pub use abort::AbortPredicate;
pub use builder::RequestSpecBuilder;
pub use config::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, OutputFlags, RedirectAttempt,
    RedirectPolicy, RedirectPredicate, RequestOptions, RequestSpec, TextEncoding, TlsRootConfig,
};
pub use decompress::{ContentCoding, DecodeError};
pub use error::{BoxError, ErrorKind, InvalidUriKind, RequestError};
pub use layers::{ACCEPT_ENCODING_ADVANCED, ACCEPT_ENCODING_DEFAULT};
pub use payload::{MultipartForm, Payload};
pub use pipeline::PipelineState;
pub use proxy::ProxyConfig;
pub use request::RequestHeaders;
pub use response::{Body, RequestOutput, ResponseEnvelope, ResponseHead, ResponseStream};
pub use tunnel_guard::{TunnelGuard, is_tunnel_assertion};

/// Execute one request described by `spec`.
///
/// Resolves to [`RequestOutput::Buffered`] by default, or to
/// [`RequestOutput::Stream`] when `stream_output` is set.
///
/// # Errors
///
/// Returns a [`RequestError`]; see [`RequestError::kind`] for the failure
/// family. Errors raised after headers arrived carry the [`ResponseHead`].
pub async fn http_request(spec: RequestSpec) -> Result<RequestOutput, RequestError> {
    pipeline::execute(spec).await
}
