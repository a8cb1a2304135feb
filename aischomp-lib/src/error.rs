use std::io::ErrorKind;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    /// The source has no more data and never will, e.g., the serial device went away.
    #[error("EOF while reading from {source_name}")]
    Eof { source_name: String },

    /// Line matched neither the AIVDM/AIVDO grammar nor the ignorable sentence set.
    #[error("Unrecognized sentence: {0}")]
    Unrecognized(String),

    #[error("Checksum mismatch: transmitted {transmitted:02X}, computed {computed:02X}")]
    ChecksumMismatch { transmitted: u8, computed: u8 },

    /// Sentence is framed correctly but a field value is out of range or not a number.
    #[error("Malformed sentence: {0}")]
    Malformed(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(String),

    /// A pipeline thread unwound before its input ended.
    #[error("{0} thread exited unexpectedly")]
    ThreadExited(String),

    /// Every pipeline task exited without signaling a cause.
    #[error("Supervisor disconnected")]
    Disconnected,
}

impl Error {
    /// True for conditions that must terminate the whole pipeline. Everything else is
    /// handled where it is detected.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Eof { .. } | Error::Disconnected)
    }
}

/// Returns true for I/O error kinds indicating the underlying link is gone rather than
/// a transient read failure.
pub(crate) fn is_link_gone(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionAborted
    )
}

/// Failure turning an armored payload into a structured message.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("invalid armor character {0:?}")]
    InvalidCharacter(char),
    #[error("invalid fill bits {0}")]
    FillBits(u8),
    #[error("not enough bits; got {actual}, need {minimum}")]
    NotEnoughBits { actual: usize, minimum: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
