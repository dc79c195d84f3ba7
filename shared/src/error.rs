use std::io;
use std::net;
use std::num::ParseIntError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // setup path
    #[error("illegal argument: {0}")]
    ErrIllegalArgument(String),
    #[error("bind failed")]
    ErrBindFailed,
    #[error("failed to bind even a single host candidate")]
    ErrNoBoundCandidate,
    #[error("configuration error: {0}")]
    ErrConfig(String),

    // session path
    #[error("socket is closed")]
    ErrClosed,
    #[error("connect timeout")]
    ErrTimeout,
    #[error("no session matching the destination")]
    ErrNoSessionForDestination,
    #[error("no acceptor available")]
    ErrNoAcceptor,

    // data path
    #[error("queue: full")]
    ErrQueueFull,
    #[error("queue: closed")]
    ErrQueueClosed,
    #[error("buffer too short")]
    ErrTooShort,
    #[error("stun decode: {0}")]
    ErrStunDecode(String),
    #[error("frame exceeds maximum length")]
    ErrFrameTooBig,

    #[error("parse ip: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
