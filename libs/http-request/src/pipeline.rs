//! Response pipeline
//!
//! Drives one request from dispatch to a resolved output:
//!
//! ```text
//! Sent → HeadersReceived → {Aborted | Decompressing} → {Streaming | Buffering} → Resolved | Rejected
//! ```
//!
//! The abort predicate sees the head exactly once, before any body byte is
//! decoded. Rejections after headers always drop the body, which closes the
//! connection since the transport keeps no idle connections.

use crate::abort::{self, AbortDecision};
use crate::body;
use crate::classify::{self, ERROR_BODY_PREVIEW_LIMIT};
use crate::config::RequestSpec;
use crate::decompress::{self, ContentCoding, DecodedBody};
use crate::error::RequestError;
use crate::request::build_request;
use crate::response::{Body, RequestOutput, ResponseEnvelope, ResponseHead, ResponseStream};
use crate::transport;
use crate::tunnel_guard::TunnelGuard;
use tower::ServiceExt;
use tower_http::follow_redirect::RequestUri;

/// Stage of a request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Request dispatched, awaiting headers
    Sent,
    /// Status and headers available
    HeadersReceived,
    /// Vetoed by the abort predicate
    Aborted,
    /// Content coding selected and decoder wired
    Decompressing,
    /// Decoded body handed to the caller as a stream
    Streaming,
    /// Draining the decoded body into memory
    Buffering,
    Resolved,
    Rejected,
}

struct Pipeline {
    url: String,
    state: Option<PipelineState>,
}

impl Pipeline {
    fn new(spec: &RequestSpec) -> Self {
        Self {
            url: spec.url.to_string(),
            state: None,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(url = %self.url, from = ?self.state, to = ?next, "pipeline transition");
        self.state = Some(next);
    }
}

/// Run `spec` to completion.
///
/// A proxied request holds a [`TunnelGuard`] until the output is resolved,
/// or for the lifetime of the returned stream.
pub(crate) async fn execute(spec: RequestSpec) -> Result<RequestOutput, RequestError> {
    let guard = spec.proxy.is_some().then(TunnelGuard::acquire);
    let mut pipeline = Pipeline::new(&spec);

    let result = run(&spec, &mut pipeline, guard).await;
    if let Err(err) = &result {
        tracing::debug!(url = %pipeline.url, kind = ?err.kind(), error = %err, "request rejected");
        pipeline.transition(PipelineState::Rejected);
    }
    result
}

async fn run(
    spec: &RequestSpec,
    pipeline: &mut Pipeline,
    guard: Option<TunnelGuard>,
) -> Result<RequestOutput, RequestError> {
    let request = build_request(spec)?;
    let service = transport::build(spec)?;

    pipeline.transition(PipelineState::Sent);
    let response = service.oneshot(request).await?;

    let (parts, raw) = response.into_parts();
    let url = parts
        .extensions
        .get::<RequestUri>()
        .map_or_else(|| spec.url.to_string(), |uri| uri.0.to_string());
    let head = ResponseHead::from_parts(url, &parts);
    pipeline.transition(PipelineState::HeadersReceived);

    match abort::evaluate(spec.abort_predicate.as_ref(), &head) {
        Ok(AbortDecision::Continue) => {}
        Ok(AbortDecision::Abort) => {
            drop(raw);
            pipeline.transition(PipelineState::Aborted);
            return Err(RequestError::Aborted {
                head: Box::new(head),
            });
        }
        Err(err) => {
            drop(raw);
            return Err(RequestError::AbortPredicate(err));
        }
    }

    let coding = if spec.flags.decode_body {
        pipeline.transition(PipelineState::Decompressing);
        decompress::select(&head, spec.flags.use_advanced_compression)?
    } else {
        ContentCoding::Identity
    };
    let decoded = DecodedBody::new(raw, coding);

    if spec.flags.stream_output {
        pipeline.transition(PipelineState::Streaming);
        let stream = ResponseStream::new(head, decoded, guard);
        pipeline.transition(PipelineState::Resolved);
        return Ok(RequestOutput::Stream(stream));
    }

    if spec.throw_on_http_status && head.status().as_u16() >= 400 {
        let preview = body::read_preview(decoded, ERROR_BODY_PREVIEW_LIMIT)
            .await
            .ok();
        let message =
            classify::status_error_message(&head, preview.as_deref(), spec.text_encoding);
        return Err(RequestError::HttpStatus {
            message,
            head: Box::new(head),
        });
    }

    pipeline.transition(PipelineState::Buffering);
    let text = body::materialize(decoded, spec.text_encoding)
        .await
        .map_err(|err| classify::body_read_error(err, &head))?;

    let body = if spec.flags.parse_as_structured {
        match body::parse_structured(&text) {
            Ok(value) => Body::Json(value),
            Err(source) => {
                return Err(RequestError::Parse {
                    head: Box::new(head),
                    body: text,
                    source,
                });
            }
        }
    } else {
        Body::Text(text)
    };

    drop(guard);
    pipeline.transition(PipelineState::Resolved);
    Ok(RequestOutput::Buffered(ResponseEnvelope::new(head, body)))
}
