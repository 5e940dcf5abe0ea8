//! Client error types
//!
//! One variant per failure category. Every synchronous operation on
//! [`Client`](crate::Client) resolves to one of these.

use std::io;

/// Client result type
pub type Result<T> = std::result::Result<T, Error>;

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Join rejected: {0}")]
    Rejected(String),
}

/// Error category without payload, for callers that only branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument = 1,
    State = 2,
    Connect = 3,
    Protocol = 4,
    Io = 5,
    Rejected = 6,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) => ErrorKind::Argument,
            Error::State(_) => ErrorKind::State,
            Error::Connect(_) => ErrorKind::Connect,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Io(_) => ErrorKind::Io,
            Error::Rejected(_) => ErrorKind::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(Error::Argument("x".into()).kind() as u8, 1);
        assert_eq!(Error::Rejected("full".into()).kind() as u8, 6);

        let io_err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(io_err.kind(), ErrorKind::Io);
    }
}
