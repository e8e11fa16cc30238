use crate::error::RequestError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Request body
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Payload {
    /// Raw bytes, no default Content-Type
    Bytes(Bytes),
    /// UTF-8 text, no default Content-Type
    Text(String),
    /// JSON-serialized body (stored as bytes after serialization)
    Json(Bytes),
    /// Form URL-encoded body
    Form(String),
    /// `multipart/form-data` body
    Multipart(MultipartForm),
}

impl Payload {
    /// Serialize `value` as a JSON payload.
    ///
    /// # Errors
    /// Returns `RequestError::PayloadEncode` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        let bytes = serde_json::to_vec(value).map_err(|e| RequestError::PayloadEncode(Box::new(e)))?;
        Ok(Payload::Json(Bytes::from(bytes)))
    }

    /// Serialize `fields` as an `application/x-www-form-urlencoded` payload.
    ///
    /// # Errors
    /// Returns `RequestError::PayloadEncode` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(fields: &T) -> Result<Self, RequestError> {
        let encoded =
            serde_urlencoded::to_string(fields).map_err(|e| RequestError::PayloadEncode(Box::new(e)))?;
        Ok(Payload::Form(encoded))
    }

    /// Content-Type sent when the caller did not set one.
    pub(crate) fn default_content_type(&self) -> Option<String> {
        match self {
            Payload::Bytes(_) | Payload::Text(_) => None,
            Payload::Json(_) => Some("application/json".to_owned()),
            Payload::Form(_) => Some("application/x-www-form-urlencoded".to_owned()),
            Payload::Multipart(form) => Some(form.content_type()),
        }
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        match self {
            Payload::Bytes(b) | Payload::Json(b) => b,
            Payload::Text(s) | Payload::Form(s) => Bytes::from(s),
            Payload::Multipart(form) => form.encode(),
        }
    }
}

impl From<serde_json::Value> for Payload {
    /// A JSON string becomes a text payload, anything else is sent as JSON.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Payload::Text(text),
            other => Payload::Json(Bytes::from(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// A `multipart/form-data` body under construction.
///
/// ```ignore
/// let form = MultipartForm::new()
///     .text("title", "report")
///     .file("attachment", "report.csv", "text/csv", csv_bytes);
/// let spec = RequestSpec::builder(url).method(Method::POST).multipart(form).build()?;
/// ```
#[derive(Clone, Debug)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// Empty form with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        let boundary = format!(
            "----------------http-request-{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>()
        );
        Self::with_boundary(boundary)
    }

    /// Empty form with a fixed boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Append a plain text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    /// Append a file field.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        });
        self
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `multipart/form-data; boundary=...`
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Serialize the form body.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\nContent-Disposition: form-data; name=\"");
            buf.put_slice(escape_quoted(&part.name).as_bytes());
            buf.put_u8(b'"');
            if let Some(filename) = &part.filename {
                buf.put_slice(b"; filename=\"");
                buf.put_slice(escape_quoted(filename).as_bytes());
                buf.put_u8(b'"');
            }
            buf.put_slice(b"\r\n");
            if let Some(content_type) = &part.content_type {
                buf.put_slice(b"Content-Type: ");
                buf.put_slice(content_type.as_bytes());
                buf.put_slice(b"\r\n");
            }
            buf.put_slice(b"\r\n");
            buf.put_slice(&part.data);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

/// Percent-escape the characters that would break a quoted
/// `Content-Disposition` parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
