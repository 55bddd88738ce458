//! The codec keeps the envelope rules in one place:
//!
//! - Encoding always emits a `payload` object, even for messages without fields.
//! - Decoding accepts a missing or `null` payload and treats it as `{}`, so bare
//!   `{"type": "STATUS_UPDATE"}` frames from lenient senders still parse.
//! - Unknown `type`s are reported separately from malformed payloads.
//!
//! # Examples
//!
//! ```
//! use captcha_duel::network::codec::{decode, encode};
//! use captcha_duel::network::messages::{Message, StatusUpdate};
//!
//! let frame = encode(&Message::StatusUpdate(StatusUpdate::default()))?;
//! assert_eq!(frame, r#"{"type":"STATUS_UPDATE","payload":{}}"#);
//!
//! let msg = decode(r#"{"type":"STATUS_UPDATE"}"#)?;
//! assert_eq!(msg, Message::StatusUpdate(StatusUpdate::default()));
//! # Ok::<(), captcha_duel::CodecError>(())
//! ```

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::network::messages::Message;

const TYPE_FIELD: &str = "type";
const PAYLOAD_FIELD: &str = "payload";

/// What the codec was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// Encoding a protocol message.
    EncodeMessage,
    /// Parsing the frame text as JSON.
    ParseFrame,
    /// Reading the envelope's `type` and `payload`.
    ReadEnvelope,
    /// Decoding the payload of a known message type.
    DecodeMessage,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeMessage => write!(f, "encoding protocol message"),
            Self::ParseFrame => write!(f, "parsing frame"),
            Self::ReadEnvelope => write!(f, "reading message envelope"),
            Self::DecodeMessage => write!(f, "decoding protocol message"),
        }
    }
}

/// Errors raised while encoding or decoding frames.
///
/// `serde_json` errors are kept as their rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Encoding failed.
    #[error("encoding failed while {operation}: {message}")]
    EncodeError {
        /// The underlying serializer message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// Decoding failed.
    #[error("decoding failed while {operation}: {message}")]
    DecodeError {
        /// The underlying deserializer message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The envelope was well formed but named a `type` the protocol does not know.
    #[error("unknown message type `{kind}`")]
    UnknownType {
        /// The unrecognized `type`.
        kind: String,
    },
}

impl CodecError {
    /// Creates a new encode error.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a new decode error.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a message into one text frame.
///
/// # Errors
///
/// Returns [`CodecError::EncodeError`] if serialization fails, which does not happen for
/// the message types of this crate.
pub fn encode(message: &Message) -> CodecResult<String> {
    serde_json::to_string(message)
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::EncodeMessage))
}

/// Decodes one text frame into a message.
///
/// # Errors
///
/// - [`CodecError::DecodeError`] if the frame is not a JSON object, lacks a string `type`,
///   or its payload does not match the type.
/// - [`CodecError::UnknownType`] if the `type` is not part of the protocol.
pub fn decode(frame: &str) -> CodecResult<Message> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::ParseFrame))?;
    let envelope = normalize_envelope(value)?;

    let kind = match envelope.get(TYPE_FIELD) {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(CodecError::decode(
                "`type` is not a string",
                CodecOperation::ReadEnvelope,
            ))
        },
        None => {
            return Err(CodecError::decode(
                "missing `type`",
                CodecOperation::ReadEnvelope,
            ))
        },
    };
    if !Message::KINDS.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType { kind });
    }

    serde_json::from_value(Value::Object(envelope))
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::DecodeMessage))
}

fn normalize_envelope(value: Value) -> CodecResult<Map<String, Value>> {
    let Value::Object(mut envelope) = value else {
        return Err(CodecError::decode(
            "frame is not a JSON object",
            CodecOperation::ReadEnvelope,
        ));
    };
    match envelope.get(PAYLOAD_FIELD) {
        None | Some(Value::Null) => {
            envelope.insert(PAYLOAD_FIELD.to_owned(), Value::Object(Map::new()));
        },
        Some(_) => {},
    }
    Ok(envelope)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::network::messages::{Obstruction, OpponentSelect, VerifyFailed};
    use crate::PlayerId;

    #[test]
    fn encode_then_decode_preserves_message() {
        let original = Message::OpponentSelect(OpponentSelect {
            player_id: PlayerId::new("p_9"),
            image_index: 3,
        });
        let frame = encode(&original).unwrap();
        assert_eq!(decode(&frame).unwrap(), original);
    }

    #[test]
    fn null_payload_is_treated_as_empty() {
        let msg = decode(r#"{"type":"VERIFY_FAILED","payload":null}"#).unwrap();
        assert_eq!(msg, Message::VerifyFailed(VerifyFailed::default()));
    }

    #[test]
    fn unknown_type_is_reported_as_such() {
        let err = decode(r#"{"type":"HELLO","payload":{}}"#).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnknownType {
                kind: "HELLO".to_owned()
            }
        );
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        for frame in [
            "not json",
            "[1,2,3]",
            r#"{"payload":{}}"#,
            r#"{"type":7}"#,
            r#"{"type":"OPPONENT_SELECT","payload":{"player_id":"p"}}"#,
            r#"{"type":"OPPONENT_SELECT","payload":{"player_id":"p","image_index":-1}}"#,
        ] {
            let err = decode(frame).unwrap_err();
            assert!(
                matches!(err, CodecError::DecodeError { .. }),
                "frame {frame} gave {err:?}"
            );
        }
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let msg = decode(
            r#"{"type":"OBSTRUCTION","payload":{"effect":"BLUR","intensity":3},"seq":1}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::Obstruction(Obstruction {
                effect: "BLUR".to_owned(),
                player_id: None,
            })
        );
    }

    #[test]
    fn error_display_names_operation() {
        let err = CodecError::decode("eof", CodecOperation::ParseFrame);
        assert_eq!(err.to_string(), "decoding failed while parsing frame: eof");
        let err = CodecError::encode("boom", CodecOperation::EncodeMessage);
        assert!(err.to_string().contains("encoding protocol message"));
        let err = CodecError::UnknownType {
            kind: "HELLO".to_owned(),
        };
        assert_eq!(err.to_string(), "unknown message type `HELLO`");
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn every_variant_kind_is_listed() {
        let msg = Message::VerifyFailed(VerifyFailed::default());
        assert!(Message::KINDS.contains(&msg.kind()));
        assert_eq!(Message::KINDS.len(), 13);
    }
}
