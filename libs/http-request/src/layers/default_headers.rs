use crate::error::RequestError;
use http::header::{ACCEPT_ENCODING, USER_AGENT};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// `Accept-Encoding` advertised by default
pub const ACCEPT_ENCODING_DEFAULT: &str = "gzip, deflate";

/// `Accept-Encoding` advertised with advanced compression enabled
pub const ACCEPT_ENCODING_ADVANCED: &str = "gzip, deflate, br";

/// Tower layer that fills in `User-Agent` and `Accept-Encoding` when the
/// caller did not set them
#[derive(Clone)]
pub struct DefaultHeadersLayer {
    user_agent: HeaderValue,
    accept_encoding: HeaderValue,
}

impl DefaultHeadersLayer {
    /// # Errors
    /// Returns `RequestError::InvalidHeaderValue` if the user agent string is not valid
    pub fn try_new(user_agent: impl AsRef<str>, advanced_compression: bool) -> Result<Self, RequestError> {
        let user_agent = HeaderValue::from_str(user_agent.as_ref())?;
        let accept_encoding = HeaderValue::from_static(if advanced_compression {
            ACCEPT_ENCODING_ADVANCED
        } else {
            ACCEPT_ENCODING_DEFAULT
        });
        Ok(Self {
            user_agent,
            accept_encoding,
        })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            user_agent: self.user_agent.clone(),
            accept_encoding: self.accept_encoding.clone(),
        }
    }
}

/// Service that adds default headers to requests
#[derive(Clone)]
pub struct DefaultHeadersService<S> {
    inner: S,
    user_agent: HeaderValue,
    accept_encoding: HeaderValue,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }
        if !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, self.accept_encoding.clone());
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Test service that echoes the request headers back in the response.
    #[derive(Clone)]
    struct EchoHeaders;

    impl Service<Request<Full<Bytes>>> for EchoHeaders {
        type Response = Response<HeaderMap>;
        type Error = Box<dyn std::error::Error + Send + Sync>;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(req.headers().clone())
                .unwrap()))
        }
    }

    fn request(headers: &[(&str, &str)]) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method(Method::GET).uri("http://example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_added() {
        let layer = DefaultHeadersLayer::try_new("test-agent/1.0", false).unwrap();
        let response = layer.layer(EchoHeaders).oneshot(request(&[])).await.unwrap();
        let headers = response.body();
        assert_eq!(headers[USER_AGENT], "test-agent/1.0");
        assert_eq!(headers[ACCEPT_ENCODING], "gzip, deflate");
    }

    #[tokio::test]
    async fn test_advanced_compression_adds_br() {
        let layer = DefaultHeadersLayer::try_new("test-agent/1.0", true).unwrap();
        let response = layer.layer(EchoHeaders).oneshot(request(&[])).await.unwrap();
        assert_eq!(response.body()[ACCEPT_ENCODING], "gzip, deflate, br");
    }

    #[tokio::test]
    async fn test_caller_values_not_overwritten() {
        let layer = DefaultHeadersLayer::try_new("test-agent/1.0", true).unwrap();
        let response = layer
            .layer(EchoHeaders)
            .oneshot(request(&[("user-agent", "custom/2.0"), ("accept-encoding", "identity")]))
            .await
            .unwrap();
        let headers = response.body();
        assert_eq!(headers[USER_AGENT], "custom/2.0");
        assert_eq!(headers[ACCEPT_ENCODING], "identity");
    }

    #[test]
    fn test_invalid_user_agent() {
        assert!(DefaultHeadersLayer::try_new("bad\nagent", false).is_err());
    }
}
