// Error kinds from §7, mapped to the wire `error` message shape. Each
// variant is one of the abstract kinds named in the spec, not a type name
// callers are expected to match on beyond `is_fatal`/`error_code`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AktuellError {
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("Invalid subscription")]
    InvalidSubscription,

    #[error("no such subscription")]
    NotFoundSubscription,

    #[error("transport closed")]
    TransportClosed,

    #[error("outbound queue overflow")]
    QueueOverflow,

    #[error("store error: {0}")]
    StoreTransient(String),

    #[error("store fatal error: {0}")]
    StoreFatal(String),

    #[error("snapshot aborted: {0}")]
    SnapshotAborted(String),

    #[error("shutdown requested")]
    ShutdownRequested,
}

impl AktuellError {
    /// Numeric `errorCode` carried on the wire. `errorCode: 1` is reserved
    /// by §6 for "subscription not in whitelist".
    pub fn error_code(&self) -> Option<u32> {
        match self {
            AktuellError::InvalidSubscription => Some(1),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AktuellError>;
