//! Length-prefixed message framing.
//!
//! ```text
//! +------------+----------------+-----------------+
//! | compressed | length (u32 BE) | payload (JSON) |
//! +------------+----------------+-----------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::rpc::status::Status;

/// Size of the per-message prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Default cap on a request body.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Frame one message.
pub fn encode_message(message: &Value) -> Result<Bytes, Status> {
    let payload = serde_json::to_vec(message)
        .map_err(|e| Status::internal(format!("encode response: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Status::resource_exhausted("response message too large"))?;

    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.put_u8(0);
    out.put_u32(len);
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Decode the single message of a unary request body.
pub fn decode_message(body: &[u8]) -> Result<Value, Status> {
    if body.is_empty() {
        return Err(Status::invalid_argument("missing request message"));
    }
    if body.len() < FRAME_HEADER_LEN {
        return Err(Status::invalid_argument("truncated message header"));
    }

    let compressed = body[0];
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let rest = &body[FRAME_HEADER_LEN..];

    if compressed != 0 {
        return Err(Status::unimplemented("compressed messages are not supported"));
    }
    if rest.len() < len {
        return Err(Status::invalid_argument("truncated message"));
    }
    if rest.len() > len {
        return Err(Status::invalid_argument("unary request carried more than one message"));
    }

    let payload = &rest[..len];
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(payload).map_err(|e| Status::invalid_argument(format!("decode request: {e}")))
}
