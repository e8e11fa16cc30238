use crate::config::RequestSpec;
use crate::error::RequestError;
use crate::header_case::HeaderSpellings;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request};
use http_body_util::Full;

/// Caller-supplied request headers.
///
/// Names are matched case-insensitively. Setting a name again replaces the
/// earlier value but keeps the spelling and position of the first
/// occurrence, which is the spelling written on the wire in
/// case-sensitive mode.
#[derive(Clone, Debug, Default)]
pub struct RequestHeaders {
    entries: Vec<(String, HeaderName, HeaderValue)>,
}

impl RequestHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` or `InvalidHeaderValue` for malformed input.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), RequestError> {
        let header_name = HeaderName::try_from(name)?;
        let header_value = HeaderValue::try_from(value)?;

        match self.entries.iter_mut().find(|(_, n, _)| *n == header_name) {
            Some(entry) => entry.2 = header_value,
            None => self.entries.push((name.to_owned(), header_name, header_value)),
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(_, n, _)| n == name)
            .map(|(_, _, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Headers in insertion order, with the caller's spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(s, _, v)| (s.as_str(), v))
    }

    pub(crate) fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (_, name, value) in &self.entries {
            map.insert(name.clone(), value.clone());
        }
        map
    }

    pub(crate) fn spellings(&self) -> HeaderSpellings {
        let mut spellings = HeaderSpellings::default();
        for (spelling, _, _) in &self.entries {
            spellings.insert(spelling);
        }
        spellings
    }
}

/// Build the `http::Request` sent to the transport.
///
/// Content-Type defaults come from the payload kind, or `application/json`
/// when the response is parsed as JSON; a caller-supplied Content-Type
/// always wins.
pub(crate) fn build_request(spec: &RequestSpec) -> Result<Request<Full<Bytes>>, RequestError> {
    let mut headers = spec.headers.to_header_map();

    if !headers.contains_key(CONTENT_TYPE) {
        let default = match &spec.payload {
            Some(payload) => payload.default_content_type(),
            None => None,
        };
        let default = default.or_else(|| {
            spec.flags
                .parse_as_structured
                .then(|| "application/json".to_owned())
        });
        if let Some(content_type) = default {
            headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
        }
    }

    let body = spec
        .payload
        .clone()
        .map(crate::payload::Payload::into_bytes)
        .unwrap_or_default();

    let mut request = Request::builder()
        .method(spec.method.clone())
        .uri(spec.url.clone())
        .body(Full::new(body))
        .map_err(|e| RequestError::Config(e.to_string()))?;
    *request.headers_mut() = headers;
    Ok(request)
}
