//! Durable append-only message log served over HTTP.
//!
//! Submissions are serialized through a single writer task that assigns
//! gapless sequence numbers, appends version-1 text-framed records to
//! segment files in a data directory, and coalesces fsyncs across
//! submitters. An ack is released only after the record's bytes reach
//! stable storage; the next sequence survives restarts via a recovery scan
//! of the newest segment.

pub mod error;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod server;
pub mod writer;

pub use error::{Error, Result};
pub use recovery::{recover, RecoveredLog};
pub use writer::{Log, LogConfig, LogWriter, WriteAck};
