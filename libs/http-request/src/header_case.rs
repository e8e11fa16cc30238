//! Case-preserving header names for HTTP/1 requests.
//!
//! hyper always writes header names in lower case. When a request asks for
//! case-sensitive headers, the connection IO is wrapped in a
//! [`HeaderCaseStream`] that rewrites each header name of the outgoing
//! request head to the caller's spelling as the bytes are written. The
//! rewrite only changes letter case, so the byte count never changes and
//! hyper's bookkeeping stays valid.
//!
//! Only HTTP/1 is supported; the connector is built without HTTP/2 ALPN in
//! this mode and such connections are never pooled, so each connection
//! carries exactly one request head.

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

/// Caller spellings keyed by lower-cased header name.
///
/// The first spelling registered for a name wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderSpellings {
    map: HashMap<Vec<u8>, Vec<u8>>,
}

impl HeaderSpellings {
    pub fn insert(&mut self, spelling: &str) {
        let key = spelling.as_bytes().to_ascii_lowercase();
        self.map
            .entry(key)
            .or_insert_with(|| spelling.as_bytes().to_vec());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn lookup(&self, lowercase: &[u8]) -> Option<&[u8]> {
        self.map
            .get(lowercase)
            .map(Vec::as_slice)
            .filter(|spelling| spelling.len() == lowercase.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RequestLine,
    LineStart,
    Name,
    Value,
    EmptyLine,
    Done,
}

/// What to write next: a prefix of the caller's buffer with header names
/// rewritten.
#[derive(Debug)]
struct Plan {
    bytes: Vec<u8>,
    /// The buffer is the start of a name with no `:` yet; it is written
    /// without rewriting.
    unknown_trailing_name: bool,
}

/// Incremental request-head scanner.
///
/// `plan` computes the rewritten bytes for a buffer without changing
/// state; `commit` advances over the bytes the IO actually accepted.
#[derive(Debug)]
struct HeadRewriter {
    spellings: Arc<HeaderSpellings>,
    phase: Phase,
    /// Lower-cased bytes of the current name already written
    name: Vec<u8>,
    /// The current name is written as-is
    passthrough: bool,
}

impl HeadRewriter {
    fn new(spellings: Arc<HeaderSpellings>) -> Self {
        Self {
            spellings,
            phase: Phase::RequestLine,
            name: Vec::new(),
            passthrough: false,
        }
    }

    fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn step(phase: Phase, byte: u8) -> Phase {
        match (phase, byte) {
            (Phase::RequestLine | Phase::Value, b'\n') | (Phase::Name, b'\n') => Phase::LineStart,
            (Phase::RequestLine, _) => Phase::RequestLine,
            (Phase::LineStart, b'\r') => Phase::EmptyLine,
            (Phase::LineStart | Phase::EmptyLine, b'\n') | (Phase::Done, _) => Phase::Done,
            (Phase::LineStart, _) => Phase::Name,
            (Phase::Name, b':') => Phase::Value,
            (Phase::Name, _) => Phase::Name,
            (Phase::Value, _) => Phase::Value,
            (Phase::EmptyLine, _) => Phase::Done,
        }
    }

    fn plan(&self, buf: &[u8]) -> Plan {
        let mut out = buf.to_vec();
        let mut phase = self.phase;
        let mut pending: &[u8] = &self.name;
        let mut passthrough = self.passthrough;
        // Start of the current name inside `buf`; 0 when it began earlier
        let mut name_start = 0;

        for (i, &byte) in buf.iter().enumerate() {
            let next = Self::step(phase, byte);
            if phase == Phase::LineStart && next == Phase::Name {
                name_start = i;
                pending = &[];
                passthrough = false;
            }
            if phase == Phase::Name && next == Phase::Value {
                if !passthrough {
                    let mut full = pending.to_vec();
                    full.extend(buf[name_start..i].iter().map(u8::to_ascii_lowercase));
                    if let Some(spelling) = self.spellings.lookup(&full) {
                        out[name_start..i].copy_from_slice(&spelling[pending.len()..]);
                    }
                }
                pending = &[];
            }
            phase = next;
            if phase == Phase::Done {
                break;
            }
        }

        if phase == Phase::Name && pending.is_empty() && !passthrough {
            if name_start > 0 {
                out.truncate(name_start);
            } else {
                return Plan {
                    bytes: out,
                    unknown_trailing_name: true,
                };
            }
        }

        Plan {
            bytes: out,
            unknown_trailing_name: false,
        }
    }

    fn commit(&mut self, written: &[u8], plan: &Plan) {
        for &byte in written {
            let next = Self::step(self.phase, byte);
            if self.phase == Phase::LineStart && next == Phase::Name {
                self.name.clear();
                self.passthrough = false;
            }
            if next == Phase::Name {
                self.name.push(byte.to_ascii_lowercase());
            } else if self.phase == Phase::Name {
                self.name.clear();
            }
            self.phase = next;
            if self.phase == Phase::Done {
                self.name = Vec::new();
                return;
            }
        }
        // The whole buffer was one unknown name; whatever part of it went
        // out did so unchanged.
        if self.phase == Phase::Name && plan.unknown_trailing_name {
            self.passthrough = true;
        }
    }
}

pin_project! {
    /// Connection IO that rewrites request header names to the caller's
    /// spelling.
    pub struct HeaderCaseStream<T> {
        #[pin]
        inner: T,
        rewriter: HeadRewriter,
    }
}

impl<T> HeaderCaseStream<T> {
    pub fn new(inner: T, spellings: Arc<HeaderSpellings>) -> Self {
        Self {
            inner,
            rewriter: HeadRewriter::new(spellings),
        }
    }
}

impl<T: Read> Read for HeaderCaseStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<T: Write> Write for HeaderCaseStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if this.rewriter.is_done() {
            return this.inner.poll_write(cx, buf);
        }

        let plan = this.rewriter.plan(buf);
        let written = ready!(this.inner.poll_write(cx, &plan.bytes))?;
        this.rewriter.commit(&buf[..written], &plan);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        false
    }
}

impl<T: Connection> Connection for HeaderCaseStream<T> {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}

/// Connector wrapping every connection in a [`HeaderCaseStream`].
#[derive(Debug, Clone)]
pub struct HeaderCaseConnector<C> {
    inner: C,
    spellings: Arc<HeaderSpellings>,
}

impl<C> HeaderCaseConnector<C> {
    pub fn new(inner: C, spellings: HeaderSpellings) -> Self {
        Self {
            inner,
            spellings: Arc::new(spellings),
        }
    }
}

impl<C> tower::Service<http::Uri> for HeaderCaseConnector<C>
where
    C: tower::Service<http::Uri>,
{
    type Response = HeaderCaseStream<C::Response>;
    type Error = C::Error;
    type Future = HeaderCaseConnecting<C::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: http::Uri) -> Self::Future {
        HeaderCaseConnecting {
            inner: self.inner.call(dst),
            spellings: Arc::clone(&self.spellings),
        }
    }
}

pin_project! {
    /// Future returned by [`HeaderCaseConnector`].
    pub struct HeaderCaseConnecting<F> {
        #[pin]
        inner: F,
        spellings: Arc<HeaderSpellings>,
    }
}

impl<F, T, E> Future for HeaderCaseConnecting<F>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Result<HeaderCaseStream<T>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let io = ready!(this.inner.poll(cx))?;
        Poll::Ready(Ok(HeaderCaseStream::new(io, Arc::clone(this.spellings))))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn spellings(names: &[&str]) -> Arc<HeaderSpellings> {
        let mut s = HeaderSpellings::default();
        for name in names {
            s.insert(name);
        }
        Arc::new(s)
    }

    /// Feed `buf` through plan/commit, simulating an IO that accepts at
    /// most `max_write` bytes per call.
    fn write_all(rewriter: &mut HeadRewriter, mut buf: &[u8], max_write: usize) -> Vec<u8> {
        let mut wire = Vec::new();
        while !buf.is_empty() {
            let plan = rewriter.plan(buf);
            let n = plan.bytes.len().min(max_write);
            assert!(n > 0, "plan must make progress");
            wire.extend_from_slice(&plan.bytes[..n]);
            rewriter.commit(&buf[..n], &plan);
            buf = &buf[n..];
        }
        wire
    }

    const HEAD: &[u8] = b"GET /x HTTP/1.1\r\nuser-agent: ua\r\nhost: example.com\r\nx-other: 1\r\n\r\nbody: not-a-header";

    #[test]
    fn test_rewrites_names_in_one_write() {
        let mut rewriter = HeadRewriter::new(spellings(&["User-Agent", "Host"]));
        let wire = write_all(&mut rewriter, HEAD, usize::MAX);
        assert_eq!(
            wire,
            b"GET /x HTTP/1.1\r\nUser-Agent: ua\r\nHost: example.com\r\nx-other: 1\r\n\r\nbody: not-a-header"
        );
        assert!(rewriter.is_done());
    }

    #[test]
    fn test_rewrites_across_partial_writes() {
        for max_write in [1, 3, 7, 20] {
            let mut rewriter = HeadRewriter::new(spellings(&["User-Agent", "Host"]));
            let wire = write_all(&mut rewriter, HEAD, max_write);
            assert_eq!(
                wire,
                b"GET /x HTTP/1.1\r\nUser-Agent: ua\r\nHost: example.com\r\nx-other: 1\r\n\r\nbody: not-a-header",
                "max_write = {max_write}"
            );
        }
    }

    #[test]
    fn test_name_straddling_buffer_end_is_deferred() {
        let rewriter = HeadRewriter::new(spellings(&["User-Agent"]));
        let plan = rewriter.plan(b"GET / HTTP/1.1\r\nuser-ag");
        assert_eq!(plan.bytes, b"GET / HTTP/1.1\r\n");
        assert!(!plan.unknown_trailing_name);
    }

    #[test]
    fn test_name_at_offset_zero_passes_through() {
        let mut rewriter = HeadRewriter::new(spellings(&["User-Agent"]));
        let first = rewriter.plan(b"GET / HTTP/1.1\r\n");
        rewriter.commit(b"GET / HTTP/1.1\r\n", &first);

        let wire = write_all(&mut rewriter, b"user-ag", usize::MAX);
        assert_eq!(wire, b"user-ag");
        let wire = write_all(&mut rewriter, b"ent: ua\r\n\r\n", usize::MAX);
        assert_eq!(wire, b"ent: ua\r\n\r\n");
        assert!(rewriter.is_done());
    }

    #[test]
    fn test_first_spelling_wins() {
        let s = spellings(&["X-Token", "x-TOKEN"]);
        assert_eq!(s.lookup(b"x-token"), Some(&b"X-Token"[..]));
    }

    #[test]
    fn test_unknown_names_untouched() {
        let mut rewriter = HeadRewriter::new(spellings(&[]));
        let wire = write_all(&mut rewriter, HEAD, usize::MAX);
        assert_eq!(wire, HEAD);
    }
}
