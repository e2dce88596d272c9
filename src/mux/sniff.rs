//! Non-consuming reads for protocol detection.
//!
//! [`Sniffer`] reads a connection's first bytes into a buffer; once a
//! decision is made, [`Sniffer::into_rewind`] yields a stream that replays
//! those bytes before continuing with the socket, so downstream servers see
//! the connection exactly as the client sent it.
//!
//! When a matcher greets the client with an HTTP/2 SETTINGS frame, the
//! client's acknowledgement of it must not reach the downstream server,
//! which never sent that frame. [`SkipSettingsAck`] removes it.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;

use crate::mux::matcher::{
    MatchResult, Matcher, FLAG_ACK, FRAME_HEADER_LEN, FRAME_SETTINGS, HTTP2_PREFACE,
};

const READ_CHUNK: usize = 4096;

/// Buffers the start of a connection.
pub struct Sniffer<T> {
    inner: T,
    buf: BytesMut,
    limit: usize,
    greeted: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Sniffer<T> {
    /// Wrap a connection; at most `limit` bytes will ever be buffered.
    pub fn new(inner: T, limit: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            limit,
            greeted: false,
        }
    }

    /// Whether a matcher's greeting was written to the client.
    pub fn greeted(&self) -> bool {
        self.greeted
    }

    /// Bytes read so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Whether the buffer has reached its limit.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.limit
    }

    /// Read more bytes into the buffer. Returns 0 on EOF or when full.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let want = self.limit.saturating_sub(self.buf.len()).min(READ_CHUNK);
        if want == 0 {
            return Ok(0);
        }
        self.buf.reserve(want);
        let mut limited = (&mut self.buf).limit(want);
        self.inner.read_buf(&mut limited).await
    }

    /// Evaluate `matchers` in order and return the index of the first match.
    ///
    /// Bytes are read on demand until `timeout` elapses, EOF, an I/O error,
    /// or the buffer limit. After that, the remaining matchers are still
    /// evaluated against what was buffered, treating "need more" as no match.
    /// The first greeting any undecided matcher asks for is written before
    /// reading further.
    pub async fn classify(&mut self, matchers: &[&dyn Matcher], timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut exhausted = false;

        for (index, matcher) in matchers.iter().enumerate() {
            loop {
                match matcher.check(self.buffered()) {
                    MatchResult::Matched => return Some(index),
                    MatchResult::NoMatch => break,
                    MatchResult::NeedMore => {
                        if exhausted || self.is_full() {
                            exhausted = true;
                            break;
                        }
                        if !self.greeted {
                            if let Some(greeting) = matcher.greeting(self.buffered()) {
                                // Set first: a partial write may still be acknowledged.
                                self.greeted = true;
                                if tokio::time::timeout_at(deadline, self.greet(greeting)).await.is_err() {
                                    exhausted = true;
                                    break;
                                }
                                // A failed write shows up as EOF on the next read.
                            }
                        }
                        match tokio::time::timeout_at(deadline, self.fill()).await {
                            Ok(Ok(n)) if n > 0 => {}
                            _ => {
                                exhausted = true;
                                break;
                            }
                        }
                    }
                }
            }
        }

        None
    }

    async fn greet(&mut self, greeting: &[u8]) -> io::Result<()> {
        self.inner.write_all(greeting).await?;
        self.inner.flush().await
    }

    /// Stop sniffing and replay the buffered bytes ahead of the connection.
    pub fn into_rewind(self) -> Rewind<T> {
        Rewind::new(self.buf.freeze(), self.inner)
    }
}

/// A stream with a prefix that is read before the inner stream.
pub struct Rewind<T> {
    prefix: Bytes,
    inner: T,
}

impl<T> Rewind<T> {
    /// Replay `prefix`, then read from `inner`.
    pub fn new(prefix: Bytes, inner: T) -> Self {
        Self { prefix, inner }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Removes the first SETTINGS acknowledgement from a client's HTTP/2 stream.
///
/// The stream must start with the client preface. Frames are passed through
/// whole and in order; once the acknowledgement is gone the filter only
/// forwards reads. Writes are untouched.
pub struct SkipSettingsAck<T> {
    inner: T,
    state: AckState,
    header: [u8; FRAME_HEADER_LEN],
    filled: usize,
    out: BytesMut,
}

#[derive(Debug, Clone, Copy)]
enum AckState {
    Preface(usize),
    Header,
    Payload(usize),
    Done,
}

impl<T> SkipSettingsAck<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            state: AckState::Preface(HTTP2_PREFACE.len()),
            header: [0; FRAME_HEADER_LEN],
            filled: 0,
            out: BytesMut::new(),
        }
    }

    fn process(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            match self.state {
                AckState::Preface(left) | AckState::Payload(left) => {
                    let n = left.min(data.len());
                    self.out.extend_from_slice(&data[..n]);
                    data = &data[n..];
                    self.state = match (self.state, left - n) {
                        (_, 0) => AckState::Header,
                        (AckState::Preface(_), rest) => AckState::Preface(rest),
                        (_, rest) => AckState::Payload(rest),
                    };
                }
                AckState::Header => {
                    let n = (FRAME_HEADER_LEN - self.filled).min(data.len());
                    self.header[self.filled..self.filled + n].copy_from_slice(&data[..n]);
                    self.filled += n;
                    data = &data[n..];
                    if self.filled < FRAME_HEADER_LEN {
                        continue;
                    }
                    self.filled = 0;

                    let h = self.header;
                    let len = u32::from_be_bytes([0, h[0], h[1], h[2]]) as usize;
                    if h[3] == FRAME_SETTINGS && h[4] & FLAG_ACK != 0 && len == 0 {
                        self.state = AckState::Done;
                    } else {
                        self.out.extend_from_slice(&h);
                        self.state = if len == 0 { AckState::Header } else { AckState::Payload(len) };
                    }
                }
                AckState::Done => {
                    self.out.extend_from_slice(data);
                    return;
                }
            }
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for SkipSettingsAck<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if !this.out.is_empty() {
                let n = this.out.len().min(buf.remaining());
                buf.put_slice(&this.out.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if let AckState::Done = this.state {
                return Pin::new(&mut this.inner).poll_read(cx, buf);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut read = ReadBuf::new(&mut chunk);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read) {
                Poll::Ready(Ok(())) => {}
                other => return other,
            }
            if read.filled().is_empty() {
                // EOF: hand over a torn frame header as is.
                this.out.extend_from_slice(&this.header[..this.filled]);
                this.filled = 0;
                this.state = AckState::Done;
                continue;
            }
            this.process(read.filled());
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for SkipSettingsAck<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::matcher::tests::h2_request;
    use crate::mux::matcher::{Http1Fast, Http2HeaderField, Http2Preface, EMPTY_SETTINGS, HTTP2_PREFACE};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn rewind_replays_sniffed_bytes() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"GET /volumes HTTP/1.1\r\n\r\n").await.unwrap();
        drop(client);

        let matchers: [&dyn Matcher; 1] = [&Http1Fast];
        let mut sniffer = Sniffer::new(server, 1024);
        assert_eq!(sniffer.classify(&matchers, Duration::from_secs(1)).await, Some(0));
        assert!(!sniffer.buffered().is_empty());

        let mut rewind = sniffer.into_rewind();
        let mut all = Vec::new();
        rewind.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, b"GET /volumes HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn rewind_with_small_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abcdef").await.unwrap();
        drop(client);

        let mut rewind = Rewind::new(Bytes::from_static(b"0123"), server);
        let mut two = [0u8; 2];
        rewind.read_exact(&mut two).await.unwrap();
        assert_eq!(&two, b"01");

        let mut rest = Vec::new();
        rewind.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"23abcdef");
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (client, server) = tokio::io::duplex(64);
        let mut rewind = Rewind::new(Bytes::new(), server);
        rewind.write_all(b"pong").await.unwrap();
        drop(rewind);

        let mut client = client;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");
    }

    #[tokio::test]
    async fn idle_client_times_out_without_match() {
        let (_client, server) = tokio::io::duplex(64);
        let mut sniffer = Sniffer::new(server, 1024);
        let matchers: [&dyn Matcher; 2] = [&Http1Fast, &Http2Preface];
        let got = sniffer.classify(&matchers, Duration::from_millis(50)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn stalled_http2_falls_through_to_generic_rule() {
        // Preface and SETTINGS only; the client never sends HEADERS.
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(HTTP2_PREFACE).await.unwrap();
        client.write_all(&[0, 0, 0, 4, 0, 0, 0, 0, 0]).await.unwrap();

        let grpc = Http2HeaderField::grpc();
        let matchers: [&dyn Matcher; 3] = [&Http1Fast, &grpc, &Http2Preface];
        let mut sniffer = Sniffer::new(server, 1024);
        let got = sniffer.classify(&matchers, Duration::from_millis(50)).await;
        assert_eq!(got, Some(2));
        assert!(sniffer.greeted());

        let mut greeting = [0u8; 9];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, EMPTY_SETTINGS);
    }

    #[tokio::test]
    async fn client_waiting_for_server_settings_is_still_classified() {
        let (client, server) = tokio::io::duplex(1024);
        let request = h2_request(&[
            (&b":method"[..], &b"POST"[..]),
            (&b":path"[..], &b"/csi.v1.Node/NodeGetInfo"[..]),
            (&b"content-type"[..], &b"application/grpc"[..]),
        ]);
        // Preface and SETTINGS first; HEADERS only after the server speaks.
        let (hello, headers) = request.split_at(HTTP2_PREFACE.len() + 9);
        let (hello, headers) = (hello.to_vec(), headers.to_vec());
        let peer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(&hello).await.unwrap();
            let mut frame = [0u8; 9];
            client.read_exact(&mut frame).await.unwrap();
            client.write_all(&frame_ack()).await.unwrap();
            client.write_all(&headers).await.unwrap();
            (frame, client)
        });

        let grpc = Http2HeaderField::grpc();
        let matchers: [&dyn Matcher; 3] = [&Http1Fast, &grpc, &Http2Preface];
        let mut sniffer = Sniffer::new(server, 4096);
        let got = sniffer.classify(&matchers, Duration::from_secs(1)).await;
        assert_eq!(got, Some(1));

        let (frame, _client) = peer.await.unwrap();
        assert_eq!(&frame, EMPTY_SETTINGS);
    }

    fn frame_ack() -> [u8; 9] {
        [0, 0, 0, FRAME_SETTINGS, FLAG_ACK, 0, 0, 0, 0]
    }

    #[tokio::test]
    async fn only_the_first_settings_ack_is_removed() {
        let settings = [0, 0, 6, FRAME_SETTINGS, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 100];
        let headers = [0, 0, 2, 0x1, 0x4, 0, 0, 0, 1, 0x82, 0x86];

        let mut sent = HTTP2_PREFACE.to_vec();
        sent.extend_from_slice(&settings);
        sent.extend_from_slice(&frame_ack());
        sent.extend_from_slice(&headers);
        sent.extend_from_slice(&frame_ack());

        let mut want = HTTP2_PREFACE.to_vec();
        want.extend_from_slice(&settings);
        want.extend_from_slice(&headers);
        want.extend_from_slice(&frame_ack());

        // A tiny pipe splits frame headers across reads.
        let (client, server) = tokio::io::duplex(3);
        tokio::spawn(async move {
            let mut client = client;
            client.write_all(&sent).await.unwrap();
        });

        let mut filtered = SkipSettingsAck::new(server);
        let mut got = Vec::new();
        filtered.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn filter_passes_replayed_prefix_and_writes() {
        let mut prefix = HTTP2_PREFACE.to_vec();
        prefix.extend_from_slice(&frame_ack());
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"tail").await.unwrap();

        let mut filtered = SkipSettingsAck::new(Rewind::new(Bytes::from(prefix), server));
        filtered.write_all(b"pong").await.unwrap();
        let mut pong = [0u8; 4];
        client.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, b"pong");
        drop(client);

        let mut got = Vec::new();
        filtered.read_to_end(&mut got).await.unwrap();
        let mut want = HTTP2_PREFACE.to_vec();
        want.extend_from_slice(b"tail");
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn limit_caps_buffering() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(&HTTP2_PREFACE[..20]).await.unwrap();

        let matchers: [&dyn Matcher; 1] = [&Http2Preface];
        let mut sniffer = Sniffer::new(server, 8);
        let got = sniffer.classify(&matchers, Duration::from_secs(1)).await;
        assert_eq!(got, None);
        assert_eq!(sniffer.buffered().len(), 8);
    }
}
