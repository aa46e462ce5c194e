use thiserror::Error;

/// Top-level error taxonomy for the core. Every variant maps to exactly one
/// of the categories the startup and runtime paths distinguish.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("bind error: {0}")]
    Bind(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("link error: {0}")]
    Link(String),

    #[error("another instance is already running")]
    SecondInstance,
}

impl CoreError {
    /// Whether this error should abort startup (or, for SecondInstance, the
    /// whole process) rather than be logged and absorbed at runtime.
    pub fn fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Store(_) => true,
            Self::Bind(_) => true,
            Self::Protocol(_) => false,
            Self::Link(_) => false,
            Self::SecondInstance => true,
        }
    }
}

/// Persistent-store failures: connection, query, or transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// Malformed or semantically invalid wire traffic. Always recoverable —
/// the offending datagram is dropped and no state is mutated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    MalformedJson(String),

    #[error("message missing required field 't'")]
    MissingType,

    #[error("unknown metadata id {0}")]
    UnknownId(i64),

    #[error("tport {0} out of range [0,16)")]
    TportOutOfRange(i32),

    #[error("no hardware slot for hard_addr {0}")]
    MissingHardwareSlot(i32),
}
