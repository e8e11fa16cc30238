//! Content-coding selection and streaming decoders.
//!
//! The decoders run inline on the body frames: each compressed chunk is fed
//! to a push-style decoder and whatever it produced is emitted as the next
//! data frame. Corrupted or truncated input surfaces as an error frame on
//! the same body the caller reads.

use crate::error::{BoxError, RequestError};
use crate::response::{RawBody, ResponseHead};
use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};
use http::{HeaderMap, HeaderValue, header};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Output buffer growth step for the deflate decoder.
const DEFLATE_CHUNK: usize = 16 * 1024;

/// Internal buffer size of the brotli decoder.
const BROTLI_BUFFER: usize = 4096;

/// A content coding this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    /// zlib-wrapped or raw deflate, detected from the first bytes
    Deflate,
    Brotli,
}

impl ContentCoding {
    /// Resolve a `Content-Encoding` header value.
    ///
    /// A missing or blank header is `identity`. `br` resolves to
    /// [`ContentCoding::Identity`] unless `advanced` is set, so the raw bytes
    /// pass through untouched.
    ///
    /// # Errors
    /// Returns the offending token when the coding is not supported.
    pub fn from_header(value: Option<&HeaderValue>, advanced: bool) -> Result<Self, String> {
        let Some(value) = value else {
            return Ok(ContentCoding::Identity);
        };
        let token = match value.to_str() {
            Ok(token) => token.trim(),
            Err(_) => return Err(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        };

        if token.is_empty() || token.eq_ignore_ascii_case("identity") {
            Ok(ContentCoding::Identity)
        } else if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Ok(ContentCoding::Gzip)
        } else if token.eq_ignore_ascii_case("deflate") {
            Ok(ContentCoding::Deflate)
        } else if token.eq_ignore_ascii_case("br") {
            Ok(if advanced {
                ContentCoding::Brotli
            } else {
                ContentCoding::Identity
            })
        } else {
            Err(token.to_owned())
        }
    }

    /// Token as it appears in `Content-Encoding`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentCoding::Identity => "identity",
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Brotli => "br",
        }
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the decoder for a response.
///
/// # Errors
/// Returns [`RequestError::UnsupportedEncoding`] naming the token when the
/// response declares a coding outside gzip, deflate, br and identity.
pub fn select(head: &ResponseHead, advanced: bool) -> Result<ContentCoding, RequestError> {
    let coding = ContentCoding::from_header(head.headers().get(header::CONTENT_ENCODING), advanced)
        .map_err(|encoding| RequestError::UnsupportedEncoding {
            encoding,
            head: Box::new(head.clone()),
        })?;
    tracing::debug!(coding = %coding, advanced, "selected response decoder");
    Ok(coding)
}

/// The decoder rejected the response bytes.
///
/// Travels as the boxed error of a [`DecodedBody`] frame so the error
/// classifier can tell a corrupt stream apart from a network failure.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode {coding} response body: {source}")]
pub struct DecodeError {
    coding: ContentCoding,
    #[source]
    source: io::Error,
}

impl DecodeError {
    fn new(coding: ContentCoding, source: io::Error) -> Self {
        Self { coding, source }
    }

    /// The coding whose decoder failed.
    #[must_use]
    pub fn coding(&self) -> ContentCoding {
        self.coding
    }
}

/// Deflate decoder that accepts both zlib-wrapped and raw streams.
///
/// Servers disagree on what `deflate` means, so the zlib header is sniffed
/// from the first two bytes before the inflater is created.
struct DeflateDecoder {
    pending: Vec<u8>,
    inflater: Option<Decompress>,
    done: bool,
}

impl DeflateDecoder {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            inflater: None,
            done: false,
        }
    }

    fn has_zlib_header(b0: u8, b1: u8) -> bool {
        b0 & 0x0f == 8 && ((u16::from(b0) << 8) | u16::from(b1)) % 31 == 0
    }

    fn feed(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        if self.inflater.is_none() {
            self.pending.extend_from_slice(chunk);
            if self.pending.len() < 2 {
                return Ok(Vec::new());
            }
            let zlib = Self::has_zlib_header(self.pending[0], self.pending[1]);
            self.inflater = Some(Decompress::new(zlib));
            let input = std::mem::take(&mut self.pending);
            return self.inflate(&input);
        }
        self.inflate(chunk)
    }

    fn inflate(&mut self, mut input: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(out);
        };

        // Keep going while input remains or the last call filled the
        // buffer: the inflater may still hold output for consumed input.
        while !self.done {
            out.reserve(DEFLATE_CHUNK.max(input.len() * 2));
            let before_in = inflater.total_in();
            let before_out = out.len();
            let status = inflater
                .decompress_vec(input, &mut out, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = usize::try_from(inflater.total_in() - before_in)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => self.done = true,
                Status::Ok | Status::BufError => {
                    let progressed = consumed > 0 || out.len() > before_out;
                    let filled = out.len() == out.capacity();
                    if !progressed || (input.is_empty() && !filled) {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        if self.done {
            return Ok(Vec::new());
        }
        let Some(inflater) = self.inflater.as_mut() else {
            if self.pending.is_empty() {
                return Ok(Vec::new());
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "deflate stream ended after one byte",
            ));
        };

        let mut out = Vec::new();
        loop {
            out.reserve(DEFLATE_CHUNK);
            let before_out = out.len();
            let status = inflater
                .decompress_vec(&[], &mut out, FlushDecompress::Finish)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            match status {
                Status::StreamEnd => {
                    self.done = true;
                    return Ok(out);
                }
                Status::Ok | Status::BufError => {
                    if out.len() == before_out {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "deflate stream ended before the final block",
                        ));
                    }
                }
            }
        }
    }
}

enum Decoder {
    Gzip {
        inner: flate2::write::GzDecoder<Vec<u8>>,
        fed: bool,
    },
    Deflate(DeflateDecoder),
    Brotli {
        inner: Box<brotli::DecompressorWriter<Vec<u8>>>,
        fed: bool,
    },
}

impl Decoder {
    fn new(coding: ContentCoding) -> Option<Self> {
        match coding {
            ContentCoding::Identity => None,
            ContentCoding::Gzip => Some(Decoder::Gzip {
                inner: flate2::write::GzDecoder::new(Vec::new()),
                fed: false,
            }),
            ContentCoding::Deflate => Some(Decoder::Deflate(DeflateDecoder::new())),
            ContentCoding::Brotli => Some(Decoder::Brotli {
                inner: Box::new(brotli::DecompressorWriter::new(Vec::new(), BROTLI_BUFFER)),
                fed: false,
            }),
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Decoder::Gzip { inner, fed } => {
                *fed = true;
                inner.write_all(chunk)?;
                Ok(std::mem::take(inner.get_mut()))
            }
            Decoder::Deflate(inner) => inner.feed(chunk),
            Decoder::Brotli { inner, fed } => {
                *fed = true;
                inner.write_all(chunk)?;
                Ok(std::mem::take(inner.get_mut()))
            }
        }
    }

    /// Flush the decoder at end of body, failing on a truncated stream.
    ///
    /// A body that carried no bytes at all decodes to nothing.
    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Decoder::Gzip { inner, fed } => {
                if !*fed {
                    return Ok(Vec::new());
                }
                inner.try_finish()?;
                Ok(std::mem::take(inner.get_mut()))
            }
            Decoder::Deflate(inner) => inner.finish(),
            Decoder::Brotli { inner, fed } => {
                if !*fed {
                    return Ok(Vec::new());
                }
                inner.close()?;
                Ok(std::mem::take(inner.get_mut()))
            }
        }
    }
}

pin_project! {
    /// Response body run through the selected content decoder.
    ///
    /// For [`ContentCoding::Identity`] frames are forwarded untouched.
    /// Otherwise every data frame is decoded, trailers are passed through
    /// after the decoder has been flushed, and a decoder failure ends the
    /// body with a boxed [`DecodeError`].
    pub struct DecodedBody {
        #[pin]
        inner: RawBody,
        coding: ContentCoding,
        decoder: Option<Decoder>,
        trailers: Option<HeaderMap>,
        finished: bool,
    }
}

impl DecodedBody {
    /// Wrap `inner` with the decoder for `coding`.
    #[must_use]
    pub fn new(inner: RawBody, coding: ContentCoding) -> Self {
        Self {
            inner,
            coding,
            decoder: Decoder::new(coding),
            trailers: None,
            finished: false,
        }
    }

    /// The coding this body decodes.
    #[must_use]
    pub fn coding(&self) -> ContentCoding {
        self.coding
    }
}

impl fmt::Debug for DecodedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBody")
            .field("coding", &self.coding)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl HttpBody for DecodedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let coding = *this.coding;

        let Some(decoder) = this.decoder.as_mut() else {
            return this.inner.poll_frame(cx);
        };

        loop {
            if let Some(trailers) = this.trailers.take() {
                return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let decoded = match frame.into_data() {
                        Ok(data) => decoder.feed(&data),
                        Err(frame) => {
                            *this.finished = true;
                            *this.trailers = frame.into_trailers().ok();
                            decoder.finish()
                        }
                    };
                    match decoded {
                        Ok(out) if out.is_empty() => {}
                        Ok(out) => return Poll::Ready(Some(Ok(Frame::data(Bytes::from(out))))),
                        Err(e) => {
                            *this.finished = true;
                            *this.trailers = None;
                            return Poll::Ready(Some(Err(Box::new(DecodeError::new(coding, e)))));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    match decoder.finish() {
                        Ok(out) if out.is_empty() => return Poll::Ready(None),
                        Ok(out) => return Poll::Ready(Some(Ok(Frame::data(Bytes::from(out))))),
                        Err(e) => {
                            return Poll::Ready(Some(Err(Box::new(DecodeError::new(coding, e)))));
                        }
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        if self.decoder.is_none() {
            return self.inner.is_end_stream();
        }
        self.finished && self.trailers.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        if self.decoder.is_none() {
            return self.inner.size_hint();
        }
        SizeHint::default()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{StatusCode, Version};
    use http_body_util::BodyExt;
    use std::collections::VecDeque;

    const TEXT: &str = "The quick brown fox jumps over the lazy dog. Pack my box with five dozen liquor jugs.";

    /// Body yielding the given chunks one frame at a time.
    struct Chunks(VecDeque<Bytes>);

    impl HttpBody for Chunks {
        type Data = Bytes;
        type Error = BoxError;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.pop_front().map(|chunk| Ok(Frame::data(chunk))))
        }
    }

    fn raw(chunks: Vec<Vec<u8>>) -> RawBody {
        Chunks(chunks.into_iter().map(Bytes::from).collect()).boxed()
    }

    /// Split `data` into `n`-byte chunks.
    fn split(data: &[u8], n: usize) -> Vec<Vec<u8>> {
        data.chunks(n).map(<[u8]>::to_vec).collect()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut encoder = brotli::CompressorWriter::new(Vec::new(), 4096, 5, 22);
        encoder.write_all(data).unwrap();
        encoder.into_inner()
    }

    async fn decode(chunks: Vec<Vec<u8>>, coding: ContentCoding) -> Result<Vec<u8>, BoxError> {
        let body = DecodedBody::new(raw(chunks), coding);
        Ok(body.collect().await?.to_bytes().to_vec())
    }

    fn head_with_encoding(value: &str) -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_str(value).unwrap());
        ResponseHead::new(
            "http://example.com/".to_owned(),
            StatusCode::OK,
            Version::HTTP_11,
            headers,
        )
    }

    #[test]
    fn test_from_header_recognizes_codings() {
        let v = |s: &'static str| HeaderValue::from_static(s);
        assert_eq!(ContentCoding::from_header(None, false), Ok(ContentCoding::Identity));
        assert_eq!(ContentCoding::from_header(Some(&v("")), false), Ok(ContentCoding::Identity));
        assert_eq!(ContentCoding::from_header(Some(&v(" GZIP ")), false), Ok(ContentCoding::Gzip));
        assert_eq!(ContentCoding::from_header(Some(&v("Deflate")), false), Ok(ContentCoding::Deflate));
        assert_eq!(ContentCoding::from_header(Some(&v("identity")), true), Ok(ContentCoding::Identity));
        assert_eq!(ContentCoding::from_header(Some(&v("br")), true), Ok(ContentCoding::Brotli));
        assert_eq!(ContentCoding::from_header(Some(&v("br")), false), Ok(ContentCoding::Identity));
        assert_eq!(
            ContentCoding::from_header(Some(&v("compress")), true),
            Err("compress".to_owned())
        );
    }

    #[test]
    fn test_select_unknown_coding_names_token() {
        let err = select(&head_with_encoding("zstd"), true).unwrap_err();
        match &err {
            RequestError::UnsupportedEncoding { encoding, head } => {
                assert_eq!(encoding, "zstd");
                assert_eq!(head.status(), StatusCode::OK);
            }
            other => panic!("expected UnsupportedEncoding, got {other:?}"),
        }
        assert!(err.to_string().contains("zstd"));
    }

    /// Highly compressible payload of exactly `len` bytes.
    fn repetitive(len: usize) -> Vec<u8> {
        b"abcab".iter().copied().cycle().take(len).collect()
    }

    #[tokio::test]
    async fn test_large_compressible_bodies_round_trip() {
        let encoders: [(ContentCoding, fn(&[u8]) -> Vec<u8>); 4] = [
            (ContentCoding::Gzip, gzip),
            (ContentCoding::Deflate, zlib),
            (ContentCoding::Deflate, raw_deflate),
            (ContentCoding::Brotli, brotli),
        ];

        for len in [983_202, 2_200_000] {
            let payload = repetitive(len);
            for (coding, encode) in encoders {
                let encoded = encode(&payload);

                let out = decode(vec![encoded.clone()], coding).await.unwrap();
                assert_eq!(out.len(), payload.len(), "{coding}, {len} bytes, one frame");
                assert!(out == payload, "{coding}, {len} bytes, one frame");

                let out = decode(split(&encoded, 97), coding).await.unwrap();
                assert_eq!(out.len(), payload.len(), "{coding}, {len} bytes, chunked");
                assert!(out == payload, "{coding}, {len} bytes, chunked");
            }
        }
    }

    #[test]
    fn test_deflate_finish_drains_buffered_output() {
        let payload = repetitive(983_202);
        for encoded in [raw_deflate(&payload), zlib(&payload)] {
            let mut decoder = DeflateDecoder::new();
            let mut out = decoder.feed(&encoded).unwrap();
            out.extend(decoder.finish().unwrap());
            assert_eq!(out.len(), payload.len());
            assert!(out == payload);
        }
    }

    #[tokio::test]
    async fn test_gzip_decodes_across_frames() {
        let out = decode(split(&gzip(TEXT.as_bytes()), 7), ContentCoding::Gzip)
            .await
            .unwrap();
        assert_eq!(out, TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_deflate_decodes_zlib_and_raw() {
        let out = decode(split(&zlib(TEXT.as_bytes()), 1), ContentCoding::Deflate)
            .await
            .unwrap();
        assert_eq!(out, TEXT.as_bytes());

        let out = decode(split(&raw_deflate(TEXT.as_bytes()), 5), ContentCoding::Deflate)
            .await
            .unwrap();
        assert_eq!(out, TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_brotli_decodes() {
        let out = decode(split(&brotli(TEXT.as_bytes()), 9), ContentCoding::Brotli)
            .await
            .unwrap();
        assert_eq!(out, TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_identity_passes_bytes_through() {
        let compressed = brotli(TEXT.as_bytes());
        let out = decode(vec![compressed.clone()], ContentCoding::Identity)
            .await
            .unwrap();
        assert_eq!(out, compressed);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_to_empty() {
        for coding in [ContentCoding::Gzip, ContentCoding::Deflate, ContentCoding::Brotli] {
            let out = decode(Vec::new(), coding).await.unwrap();
            assert!(out.is_empty(), "{coding} should decode an empty body");
        }
    }

    #[tokio::test]
    async fn test_gzip_bad_magic_is_decode_error() {
        let err = decode(vec![b"definitely not gzip".to_vec()], ContentCoding::Gzip)
            .await
            .unwrap_err();
        let decode_err = err.downcast_ref::<DecodeError>().unwrap();
        assert_eq!(decode_err.coding(), ContentCoding::Gzip);
    }

    #[tokio::test]
    async fn test_truncated_streams_fail_at_end_of_body() {
        let gz = gzip(TEXT.as_bytes());
        let err = decode(vec![gz[..gz.len() / 2].to_vec()], ContentCoding::Gzip)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some());

        let zl = zlib(TEXT.as_bytes());
        let err = decode(vec![zl[..zl.len() / 2].to_vec()], ContentCoding::Deflate)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some());
    }
}
