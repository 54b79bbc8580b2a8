use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A header line failed the v1 grammar or a numeric field was out of range.
    #[error("malformed record header: {0}")]
    MalformedHeader(&'static str),

    /// A file name matched the segment pattern but could not be parsed.
    #[error("malformed segment name: {0}")]
    MalformedName(String),

    /// The segment instance already holds an open file.
    #[error("segment {0} already open")]
    AlreadyOpen(String),

    #[error("empty message body")]
    EmptyBody,

    #[error("message body of {len} bytes exceeds maximum of {max}")]
    BodyTooLarge { len: usize, max: usize },

    /// The write engine has shut down; the submission cannot be served.
    #[error("log writer closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
