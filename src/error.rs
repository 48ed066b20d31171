use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Error kinds raised by the client (spec §7).
///
/// `Protocol` is fatal: once raised, the session that produced it is no
/// longer usable and must be closed. The other variants are recoverable
/// and may be caught and retried by the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Access denied for user {user}")]
    Auth { user: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command {command:?} failed: {info}")]
    Command { command: String, info: String },

    #[error("Query error ({context}): {info}")]
    Query { context: String, info: String },

    #[error("No entry found for the given key")]
    NotFound,

    #[error("Cannot coerce value to XQuery type {xquery_type}: {reason}")]
    TypeCoercion { xquery_type: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad connection options: {0}")]
    BadConfig(String),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("XML error: {0}")]
    Xml(String),
}

impl Error {
    /// `true` for errors that poison the session (spec §7: "Protocol errors
    /// poison the session").
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Io(_))
    }
}
