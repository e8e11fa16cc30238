//! Per-request transport stack.
//!
//! Every request gets its own connector and client, assembled from the
//! request's proxy, TLS and header-case options:
//!
//! ```text
//! HttpConnector → [Tunnel (proxy)] → HttpsConnector → [HeaderCaseConnector]
//! ```
//!
//! The client keeps no idle connections, so dropping a response body
//! closes its connection. Request flow through the tower stack (outer to
//! inner): `Timeout → DefaultHeaders → FollowRedirect → hyper client`.
//! HTTP status codes never become errors here and nothing is retried.

use crate::classify;
use crate::config::RequestSpec;
use crate::error::RequestError;
use crate::header_case::HeaderCaseConnector;
use crate::layers::{DefaultHeadersLayer, FollowPolicy};
use crate::response::RawBody;
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::follow_redirect::FollowRedirectLayer;

/// Type-erased transport for one request.
pub type TransportService = BoxCloneService<Request<Full<Bytes>>, Response<RawBody>, RequestError>;

/// Build the transport stack for `spec`.
///
/// # Errors
///
/// Returns `RequestError::Transport` if the TLS configuration cannot be
/// built, or `InvalidHeaderValue` for an unusable user agent.
pub fn build(spec: &RequestSpec) -> Result<TransportService, RequestError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);

    let http1_only = spec.flags.use_case_sensitive_headers;

    match &spec.proxy {
        Some(proxy) => {
            tracing::debug!(proxy = %proxy.uri(), "tunneling through proxy");
            let mut tunnel = Tunnel::new(proxy.uri().clone(), http);
            if let Some(auth) = proxy.authorization() {
                tunnel = tunnel.with_auth(auth.clone());
            }
            let https =
                tls::https_connector(tunnel, spec.tls_roots, spec.ignore_ssl_errors, http1_only)?;
            with_header_case(https, spec)
        }
        None => {
            let https =
                tls::https_connector(http, spec.tls_roots, spec.ignore_ssl_errors, http1_only)?;
            with_header_case(https, spec)
        }
    }
}

fn with_header_case<C>(connector: C, spec: &RequestSpec) -> Result<TransportService, RequestError>
where
    C: Connect + Clone + Send + Sync + 'static,
    HeaderCaseConnector<C>: Connect + Clone + Send + Sync + 'static,
{
    if !spec.flags.use_case_sensitive_headers {
        return into_service(connector, spec);
    }
    let spellings = spec.headers.spellings();
    if spellings.is_empty() {
        tracing::debug!("no caller headers to preserve, skipping header case rewriting");
        return into_service(connector, spec);
    }
    into_service(HeaderCaseConnector::new(connector, spellings), spec)
}

fn into_service<C>(connector: C, spec: &RequestSpec) -> Result<TransportService, RequestError>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let mut client_builder = Client::builder(TokioExecutor::new());
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(0)
        .http2_only(false);
    let client = client_builder.build::<_, Full<Bytes>>(connector);

    let default_headers =
        DefaultHeadersLayer::try_new(&spec.user_agent, spec.flags.use_advanced_compression)?;
    let redirect_policy = FollowPolicy::new(spec.redirect.clone(), spec.max_redirects);
    let timeout = spec.timeout;

    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .layer(default_headers)
        .layer(FollowRedirectLayer::with_policy(redirect_policy))
        .service(client)
        .map_response(box_response)
        .map_err(move |e: tower::BoxError| classify::transport_error(e, timeout));

    Ok(service.boxed_clone())
}

fn box_response<B>(response: Response<B>) -> Response<RawBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}
