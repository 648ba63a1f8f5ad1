use std::io;

use thiserror::Error;

use crate::tcp::State;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("tap device error: {0}")]
    Device(#[from] tun::Error),

    /// The connection table has no free slot.
    #[error("connection table is full ({capacity} entries)")]
    ResourceExhausted { capacity: usize },

    #[error("connection already exists")]
    AddressInUse,

    #[error("no such connection")]
    NotConnected,

    /// The application already closed its sending half.
    #[error("connection closing")]
    Closing,

    #[error("operation {op} not valid in state {state:?}")]
    InvalidState { state: State, op: &'static str },

    #[error("send buffer full")]
    BufferFull,

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("failed to encode packet: {0}")]
    Encode(String),

    #[error("arp cache is out of space ({capacity} entries)")]
    CacheFull { capacity: usize },
}

impl Error {
    pub(crate) fn encode(e: impl std::fmt::Display) -> Self {
        Error::Encode(e.to_string())
    }

    pub(crate) fn malformed(e: impl std::fmt::Display) -> Self {
        Error::Malformed(e.to_string())
    }
}
