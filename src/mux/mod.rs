//! Connection classification subsystem.
//!
//! # Data Flow
//! ```text
//! raw listener
//!     → classifier.rs (accept loop, one task per connection)
//!     → sniff.rs (buffer first bytes, bounded by time and size)
//!     → matcher.rs (HTTP/1 prefix | HTTP/2 + grpc content-type | HTTP/2)
//!     → derived.rs (queue into the first matching listener)
//!     → server accepts a replaying stream
//! ```
//!
//! # Design Decisions
//! - Peeking never consumes: the sniffed bytes are replayed downstream
//! - Unmatched connections are closed silently and not counted
//! - The only write while classifying is an empty HTTP/2 SETTINGS, for
//!   clients that hold their HEADERS until the server speaks; the client's
//!   acknowledgement is filtered out before the downstream server reads

pub mod classifier;
pub mod derived;
pub mod matcher;
pub mod sniff;

pub use classifier::{Mux, MuxError, MuxOptions};
pub use derived::DerivedListener;
pub use matcher::{Http1Fast, Http2HeaderField, Http2Preface, MatchResult, Matcher, ValueMatch, EMPTY_SETTINGS};
pub use sniff::{Rewind, SkipSettingsAck, Sniffer};
