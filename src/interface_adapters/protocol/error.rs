use crate::domain::MessageTag;
use thiserror::Error;

/// Wire-level failures. On a live connection every one of these means the peer can no longer
/// be trusted and the connection is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("message tag {0} is already registered")]
    DuplicateTag(MessageTag),
    #[error("unknown message tag {0}")]
    UnknownTag(MessageTag),
    #[error("truncated message: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("cannot encode {tag} field `{field}`: {reason}")]
    Encoding {
        tag: MessageTag,
        field: &'static str,
        reason: String,
    },
    #[error("cannot decode {tag} field `{field}`: {reason}")]
    Decoding {
        tag: MessageTag,
        field: &'static str,
        reason: String,
    },
    #[error("invalid schema for {tag}: {reason}")]
    InvalidSchema { tag: MessageTag, reason: String },
}
