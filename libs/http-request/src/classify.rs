//! Turning failures into [`RequestError`]s that keep their context.

use crate::config::TextEncoding;
use crate::decompress::DecodeError;
use crate::error::{BoxError, RequestError};
use crate::response::ResponseHead;
use std::time::Duration;

/// Characters of body text kept in a status error message.
pub const ERROR_MESSAGE_TRUNCATE_AT: usize = 100;

/// Maximum bytes read from an error body to build its message.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Map a tower stack error to a `RequestError`.
///
/// `Elapsed` from the timeout layer becomes [`RequestError::Timeout`]; a
/// `RequestError` raised inside the stack is passed through; anything else
/// is a transport failure.
pub fn transport_error(err: tower::BoxError, timeout: Duration) -> RequestError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return RequestError::Timeout(timeout);
    }

    match err.downcast::<RequestError>() {
        Ok(request_err) => *request_err,
        Err(other) => RequestError::Transport(other),
    }
}

/// Wrap a body error raised after headers arrived.
///
/// Decoder failures get a hint about `Accept-Encoding`, since the usual
/// cause is a server that mislabels its content coding.
pub fn body_read_error(err: BoxError, head: &ResponseHead) -> RequestError {
    let message = match err.downcast_ref::<DecodeError>() {
        Some(decode) => format!(
            "{decode}. The response could not be decoded as {coding}; consider changing the Accept-Encoding header or disabling decode_body",
            coding = decode.coding()
        ),
        None => err.to_string(),
    };
    RequestError::BodyRead {
        message,
        head: Some(Box::new(head.clone())),
        source: err,
    }
}

/// Message for a response rejected by `throw_on_http_status`.
///
/// `preview` is the first bytes of the decoded body, or `None` when it
/// could not be read.
pub fn status_error_message(
    head: &ResponseHead,
    preview: Option<&[u8]>,
    encoding: TextEncoding,
) -> String {
    let fallback = || format!("request failed with status {}", head.status().as_u16());

    let Some(preview) = preview.filter(|p| !p.is_empty()) else {
        return fallback();
    };

    if is_json_content_type(head.content_type()) {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(preview) {
            if let Some(message) = value.get("message").and_then(serde_json::Value::as_str) {
                return message.to_owned();
            }
            return truncate(&value.to_string());
        }
    }

    let text = encoding.decode(preview.to_vec());
    let text = text.trim();
    if text.is_empty() {
        return fallback();
    }
    truncate(text)
}

/// Keep the first `ERROR_MESSAGE_TRUNCATE_AT` characters, marking the cut
/// with `...`.
fn truncate(text: &str) -> String {
    match text.char_indices().nth(ERROR_MESSAGE_TRUNCATE_AT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}
