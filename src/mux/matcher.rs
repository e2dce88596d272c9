//! Protocol matchers evaluated against a connection's first bytes.
//!
//! Matchers are pure functions of the bytes sniffed so far. A matcher that
//! cannot decide yet answers [`MatchResult::NeedMore`] and the classifier
//! reads further; it is re-evaluated from the start of the buffer each time.
//!
//! A matcher may also ask the classifier to send a greeting before reading
//! further, for clients that wait for the server to speak first.

/// HTTP/2 client connection preface.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Request-line prefixes recognised as HTTP/1.x.
pub const HTTP1_METHODS: &[&[u8]] = &[
    b"OPTIONS ",
    b"GET ",
    b"HEAD ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"TRACE ",
    b"CONNECT ",
    b"PATCH ",
];

/// Content type marking an RPC payload.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// An empty server SETTINGS frame on stream 0.
pub const EMPTY_SETTINGS: &[u8] = &[0, 0, 0, 0x4, 0, 0, 0, 0, 0];

pub(crate) const FRAME_HEADER_LEN: usize = 9;
const MAX_FRAME_LEN: usize = 1 << 24;

const FRAME_HEADERS: u8 = 0x1;
pub(crate) const FRAME_SETTINGS: u8 = 0x4;
const FRAME_GOAWAY: u8 = 0x7;
const FRAME_CONTINUATION: u8 = 0x9;

pub(crate) const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// Outcome of evaluating a matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The bytes belong to this protocol.
    Matched,
    /// The bytes cannot belong to this protocol.
    NoMatch,
    /// Not enough bytes to decide.
    NeedMore,
}

/// A connection predicate.
pub trait Matcher: Send + Sync + 'static {
    /// Short name for logs and metrics.
    fn name(&self) -> &str;

    /// Evaluate the bytes sniffed so far.
    fn check(&self, buf: &[u8]) -> MatchResult;

    /// Bytes to write to the client while this matcher answers `NeedMore`.
    ///
    /// The classifier writes at most one greeting per connection.
    fn greeting(&self, _buf: &[u8]) -> Option<&'static [u8]> {
        None
    }
}

/// Compare `buf` against a fixed prefix.
fn match_prefix(buf: &[u8], prefix: &[u8]) -> MatchResult {
    if buf.len() >= prefix.len() {
        if &buf[..prefix.len()] == prefix {
            MatchResult::Matched
        } else {
            MatchResult::NoMatch
        }
    } else if prefix.starts_with(buf) {
        MatchResult::NeedMore
    } else {
        MatchResult::NoMatch
    }
}

/// HTTP/1.x request line, by method prefix only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Fast;

impl Matcher for Http1Fast {
    fn name(&self) -> &str {
        "http1"
    }

    fn check(&self, buf: &[u8]) -> MatchResult {
        let mut result = MatchResult::NoMatch;
        for method in HTTP1_METHODS {
            match match_prefix(buf, method) {
                MatchResult::Matched => return MatchResult::Matched,
                MatchResult::NeedMore => result = MatchResult::NeedMore,
                MatchResult::NoMatch => {}
            }
        }
        result
    }
}

/// Any HTTP/2 connection preface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http2Preface;

impl Matcher for Http2Preface {
    fn name(&self) -> &str {
        "http2"
    }

    fn check(&self, buf: &[u8]) -> MatchResult {
        match_prefix(buf, HTTP2_PREFACE)
    }
}

/// How a header value is compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    /// Byte-for-byte equality.
    Exact(String),
    /// Media type equality, also accepting `+suffix` and `;params`
    /// (`application/grpc+proto`, `application/grpc; charset=...`).
    MediaType(String),
}

impl ValueMatch {
    fn matches(&self, value: &[u8]) -> bool {
        match self {
            ValueMatch::Exact(want) => value == want.as_bytes(),
            ValueMatch::MediaType(want) => {
                let want = want.as_bytes();
                if value.len() < want.len() || !value[..want.len()].eq_ignore_ascii_case(want) {
                    return false;
                }
                matches!(value.get(want.len()), None | Some(b'+') | Some(b';'))
            }
        }
    }
}

/// HTTP/2 preface followed by a HEADERS block carrying a given field.
///
/// Reads past the client's SETTINGS (and any other frames) up to the first
/// header block, HPACK-decodes it, and looks for `name`. Once the preface is
/// in, the server's SETTINGS is sent as a greeting, since some clients hold
/// their HEADERS until they see it.
#[derive(Debug, Clone)]
pub struct Http2HeaderField {
    name: String,
    value: ValueMatch,
}

impl Http2HeaderField {
    /// Match a header field with an arbitrary value predicate.
    pub fn new(name: impl Into<String>, value: ValueMatch) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            value,
        }
    }

    /// Match RPC traffic (`content-type: application/grpc[+codec]`).
    pub fn grpc() -> Self {
        Self::new("content-type", ValueMatch::MediaType(GRPC_CONTENT_TYPE.to_string()))
    }

    fn check_headers(&self, block: &[u8]) -> MatchResult {
        // hpack panics on some malformed blocks; those are simply not ours.
        let decoded = std::panic::catch_unwind(|| hpack::Decoder::new().decode(block));
        let Ok(Ok(headers)) = decoded else {
            return MatchResult::NoMatch;
        };

        let found = headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case(self.name.as_bytes()) && self.value.matches(value));
        if found {
            MatchResult::Matched
        } else {
            MatchResult::NoMatch
        }
    }
}

impl Matcher for Http2HeaderField {
    fn name(&self) -> &str {
        "grpc"
    }

    fn check(&self, buf: &[u8]) -> MatchResult {
        match match_prefix(buf, HTTP2_PREFACE) {
            MatchResult::Matched => {}
            other => return other,
        }

        let mut pos = HTTP2_PREFACE.len();
        let mut block: Option<Vec<u8>> = None;

        loop {
            let Some(header) = buf.get(pos..pos + FRAME_HEADER_LEN) else {
                return MatchResult::NeedMore;
            };
            let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
            let kind = header[3];
            let flags = header[4];
            if len > MAX_FRAME_LEN {
                return MatchResult::NoMatch;
            }

            let start = pos + FRAME_HEADER_LEN;
            let Some(payload) = buf.get(start..start + len) else {
                return MatchResult::NeedMore;
            };
            pos = start + len;

            match kind {
                FRAME_HEADERS if block.is_none() => {
                    let Some(fragment) = headers_fragment(payload, flags) else {
                        return MatchResult::NoMatch;
                    };
                    if flags & FLAG_END_HEADERS != 0 {
                        return self.check_headers(fragment);
                    }
                    block = Some(fragment.to_vec());
                }
                FRAME_CONTINUATION => {
                    let Some(acc) = block.as_mut() else {
                        return MatchResult::NoMatch;
                    };
                    acc.extend_from_slice(payload);
                    if flags & FLAG_END_HEADERS != 0 {
                        return self.check_headers(acc);
                    }
                }
                FRAME_GOAWAY => return MatchResult::NoMatch,
                // Only CONTINUATION may follow an unfinished header block.
                _ if block.is_some() => return MatchResult::NoMatch,
                _ => {}
            }
        }
    }

    fn greeting(&self, buf: &[u8]) -> Option<&'static [u8]> {
        buf.starts_with(HTTP2_PREFACE).then_some(EMPTY_SETTINGS)
    }
}

/// Strip padding and priority fields from a HEADERS payload.
fn headers_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut end = payload.len();

    if flags & FLAG_PADDED != 0 {
        let pad = *payload.first()? as usize;
        start += 1;
        end = end.checked_sub(pad)?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }

    if start > end {
        return None;
    }
    Some(&payload[start..end])
}
