use std::fmt;

use thiserror::Error;

use crate::network::codec::CodecError;

/// Why a request to the session was rejected.
///
/// Kept as a structured enum so callers can match on the reason instead of parsing
/// a message string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum InvalidRequestKind {
    /// Online play was requested but no [`FrameChannel`](crate::FrameChannel) is attached.
    MissingChannel,
    /// A room id was empty.
    EmptyRoomId,
    /// A player id was empty.
    EmptyPlayerId,
    /// The image catalog holds no images.
    EmptyCatalog,
    /// The operation is not available in the current configuration.
    NotSupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },
}

impl fmt::Display for InvalidRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChannel => f.write_str("no message channel is attached"),
            Self::EmptyRoomId => f.write_str("room id must not be empty"),
            Self::EmptyPlayerId => f.write_str("player id must not be empty"),
            Self::EmptyCatalog => f.write_str("image catalog is empty"),
            Self::NotSupported { operation } => write!(f, "operation `{operation}` is not supported"),
        }
    }
}

/// This enum contains all errors this library can return. Fallible API functions return a
/// [`DuelResult`].
///
/// Most runtime irregularities (malformed frames, out-of-state messages, clicks on a
/// locked grid) are *not* errors: the session drops them and reports through
/// [`telemetry`](crate::telemetry) instead. Errors are reserved for caller mistakes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DuelError {
    /// You made an invalid request, usually by using wrong parameters for function calls.
    #[error("invalid request: {kind}")]
    InvalidRequest {
        /// Further specifies why the request was invalid.
        kind: InvalidRequestKind,
    },
    /// A grid index fell outside the grid.
    #[error("index {index} out of range for grid of {len} images")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of images in the grid.
        len: usize,
    },
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A configuration value is unusable.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the rejected field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// An obstruction effect name was not recognized.
    #[error("unknown obstruction effect `{name}`")]
    UnknownEffect {
        /// The unrecognized name.
        name: String,
    },
    /// The message channel failed.
    #[error("channel error: {context}")]
    Channel {
        /// A description of the failure.
        context: String,
    },
}

impl DuelError {
    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

impl From<InvalidRequestKind> for DuelError {
    fn from(kind: InvalidRequestKind) -> Self {
        Self::InvalidRequest { kind }
    }
}

/// Result alias used throughout the crate.
pub type DuelResult<T> = Result<T, DuelError>;
