//! JSON codec for protocol messages
//!
//! Messages travel as bare JSON objects with no separator. The device firmware
//! prints non-finite floats as `NaN`/`Infinity`, which strict JSON rejects, so
//! decoding rewrites those tokens to `null` before parsing.

use std::borrow::Cow;

use bytes::Bytes;
use serde_json::Value;

use crate::types::{Message, Request};
use crate::{Error, Result};

/// Encode a message to its wire form
pub fn encode(message: &Message) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| Error::EncodeError(e.to_string()))
}

/// Encode a request to its wire form
pub fn encode_request(request: &Request) -> Result<Bytes> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|e| Error::EncodeError(e.to_string()))
}

/// Decode exactly one message from `bytes`
pub fn decode(bytes: &[u8]) -> Result<Message> {
    Message::from_value(decode_value(bytes)?)
}

/// Parse `bytes` as one JSON value, accepting the firmware's non-finite tokens.
/// Fails unless the whole input is consumed (trailing whitespace aside).
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let normalized = normalize_non_finite(bytes);
    serde_json::from_slice(&normalized).map_err(|e| Error::DecodeError(e.to_string()))
}

/// Replace bare `NaN`, `Infinity` and `-Infinity` outside of strings with `null`
fn normalize_non_finite(input: &[u8]) -> Cow<'_, [u8]> {
    if !input.iter().any(|b| *b == b'N' || *b == b'I') {
        return Cow::Borrowed(input);
    }

    let mut out = Vec::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];

        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if byte == b'"' {
            in_string = true;
            out.push(byte);
            i += 1;
            continue;
        }

        let rest = &input[i..];
        let token_len = if rest.starts_with(b"NaN") {
            3
        } else if rest.starts_with(b"Infinity") {
            8
        } else if rest.starts_with(b"-Infinity") {
            9
        } else {
            0
        };

        if token_len > 0 {
            out.extend_from_slice(b"null");
            i += token_len;
        } else {
            out.push(byte);
            i += 1;
        }
    }

    Cow::Owned(out)
}
