use std::io;

/// Stable error-kind identifiers carried on the wire in result lines.
///
/// These correspond 1:1 to the error kinds named in the protocol
/// specification. The numeric values are assigned here and must stay
/// consistent within a deployment (peers on both sides of a `ServerIO`
/// must agree on them).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    None,
    ExpectedParameter,
    Parse,
    InvalidStorage,
    InsufficientMemory,
    InvalidData,
    NetworkTimeout,
    NetworkSend,
    NetworkReceive,
    Disconnected,
    InvalidSshPassword,
    NoSshPassword,
    InvalidResponse,
    StillNotImplemented,
    Aborted,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        use ErrorKind::*;
        match self {
            None => 0,
            ExpectedParameter => 1,
            Parse => 2,
            InvalidStorage => 3,
            InsufficientMemory => 4,
            InvalidData => 5,
            NetworkTimeout => 6,
            NetworkSend => 7,
            NetworkReceive => 8,
            Disconnected => 9,
            InvalidSshPassword => 10,
            NoSshPassword => 11,
            InvalidResponse => 12,
            StillNotImplemented => 13,
            Aborted => 14,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use ErrorKind::*;
        Some(match code {
            0 => None,
            1 => ExpectedParameter,
            2 => Parse,
            3 => InvalidStorage,
            4 => InsufficientMemory,
            5 => InvalidData,
            6 => NetworkTimeout,
            7 => NetworkSend,
            8 => NetworkReceive,
            9 => Disconnected,
            10 => InvalidSshPassword,
            11 => NoSshPassword,
            12 => InvalidResponse,
            13 => StillNotImplemented,
            14 => Aborted,
            _ => return Option::None,
        })
    }

    pub fn is_none(self) -> bool {
        matches!(self, ErrorKind::None)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::None => "none",
            ErrorKind::ExpectedParameter => "expected parameter",
            ErrorKind::Parse => "parse error",
            ErrorKind::InvalidStorage => "invalid storage",
            ErrorKind::InsufficientMemory => "insufficient memory",
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::NetworkTimeout => "network timeout",
            ErrorKind::NetworkSend => "network send error",
            ErrorKind::NetworkReceive => "network receive error",
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::InvalidSshPassword => "invalid ssh password",
            ErrorKind::NoSshPassword => "no ssh password",
            ErrorKind::InvalidResponse => "invalid response",
            ErrorKind::StillNotImplemented => "not implemented",
            ErrorKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Crate-wide error type.
///
/// Transport-level variants (`Io`, `LineTooLong`, `Disconnected`) tear
/// down the owning `ServerIO`; `Protocol` carries a result-line-shaped
/// error that a handler can send back to its caller without closing
/// the connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("line exceeded maximum length")]
    LineTooLong,

    #[error("malformed line: {0}")]
    Malformed(String),

    #[error("{kind}: {message}")]
    Protocol { kind: ErrorKind, message: String },

    #[error("connection closed")]
    Disconnected,

    #[error("timed out waiting for result")]
    Timeout,

    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Error {
    pub fn protocol(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Protocol {
            kind,
            message: message.into(),
        }
    }

    /// The `ErrorKind` to report on the wire for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol { kind, .. } => *kind,
            Error::Disconnected => ErrorKind::Disconnected,
            Error::Timeout => ErrorKind::NetworkTimeout,
            Error::Io(_) => ErrorKind::NetworkReceive,
            Error::Base64(_) | Error::Hex(_) => ErrorKind::InvalidData,
            Error::Rsa(_) => ErrorKind::InvalidData,
            Error::LineTooLong | Error::Malformed(_) => ErrorKind::Parse,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
