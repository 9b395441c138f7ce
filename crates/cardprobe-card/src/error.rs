//! Error types for the card probing engine

use thiserror::Error;

/// Session-level connection errors.
///
/// These are the only failures that abort a session; everything downstream
/// of a successful connect is absorbed and recorded instead.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// PC/SC enumeration returned an empty reader list.
    #[error("no card reader found")]
    NoReaderFound,

    /// The retry budget ran out without a card appearing on the reader.
    #[error("no card presented within {attempts} attempts")]
    NoCardPresented { attempts: u32 },

    /// A transport-level fault that persisted through its one retry.
    #[error("failed to connect to reader: {0}")]
    ConnectionFailed(#[source] pcsc::Error),
}

/// A fault in a single command/response round trip.
///
/// Never surfaces past the transport: the exchange is recorded with status
/// `0000` and the probing sequence continues.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("reader i/o failed: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("response shorter than a status word")]
    Truncated,
}
