//! Draining response bodies into text and JSON.

use crate::config::TextEncoding;
use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

/// Drain `body` completely and decode it as text.
///
/// The partial buffer is dropped when any frame fails.
///
/// # Errors
/// Returns the first body error.
pub async fn materialize<B>(body: B, encoding: TextEncoding) -> Result<String, B::Error>
where
    B: HttpBody<Data = Bytes>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(chunk) = frame.data_ref() {
            buf.extend_from_slice(chunk);
        }
    }

    Ok(encoding.decode(buf))
}

/// Read at most `limit` bytes from the start of `body`.
///
/// Used to build error messages without draining arbitrarily large bodies.
///
/// # Errors
/// Returns the first body error.
pub async fn read_preview<B>(body: B, limit: usize) -> Result<Vec<u8>, B::Error>
where
    B: HttpBody<Data = Bytes>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(chunk) = frame.data_ref() {
            let remaining = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if buf.len() >= limit {
                break;
            }
        }
    }

    Ok(buf)
}

/// Parse materialized text as JSON.
///
/// # Errors
/// Returns the `serde_json` error for malformed input.
pub fn parse_structured(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use http_body::Frame;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Body replaying scripted frames; `Err` entries become error frames.
    struct Scripted(VecDeque<Result<&'static str, &'static str>>);

    impl HttpBody for Scripted {
        type Data = Bytes;
        type Error = BoxError;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.pop_front().map(|item| match item {
                Ok(s) => Ok(Frame::data(Bytes::from_static(s.as_bytes()))),
                Err(e) => Err(BoxError::from(e)),
            }))
        }
    }

    fn body_from(chunks: Vec<Result<&'static str, &'static str>>) -> Scripted {
        Scripted(chunks.into())
    }

    #[tokio::test]
    async fn test_materialize_concatenates_chunks() {
        let text = materialize(body_from(vec![Ok("hel"), Ok("lo")]), TextEncoding::Utf8)
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_materialize_fails_on_error_frame() {
        let err = materialize(body_from(vec![Ok("partial"), Err("reset")]), TextEncoding::Utf8)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "reset");
    }

    #[tokio::test]
    async fn test_read_preview_stops_at_limit() {
        let preview = read_preview(body_from(vec![Ok("abcdef"), Ok("ghij"), Err("never read")]), 8)
            .await
            .unwrap();
        assert_eq!(preview, b"abcdefgh");
    }

    #[test]
    fn test_parse_structured() {
        assert_eq!(parse_structured(r#"{"ok":true}"#).unwrap()["ok"], true);
        assert!(parse_structured("{not json").is_err());
    }
}
