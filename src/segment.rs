use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::record::{decode_header, segment_file_name, Record};
use crate::{Error, Result};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(unix)]
const SEGMENT_MODE: u32 = 0o644;

/// One append-only segment file holding a contiguous run of records that
/// starts at `starting_sequence`. An instance is either unbound, writing, or
/// handed out for reading; never both at once.
pub struct SegmentFile {
    starting_sequence: u64,
    path: PathBuf,
    file: Option<Arc<File>>,
    bytes_written: u64,
}

impl SegmentFile {
    pub fn new(data_dir: &Path, starting_sequence: u64) -> Self {
        let path = data_dir.join(segment_file_name(starting_sequence));
        Self {
            starting_sequence,
            path,
            file: None,
            bytes_written: 0,
        }
    }

    pub fn starting_sequence(&self) -> u64 {
        self.starting_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        segment_file_name(self.starting_sequence)
    }

    /// Creates the file with exclusive-create semantics in append-only mode.
    /// Used for fresh directories and rollover; an existing file is an error.
    pub fn create_for_write(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen(self.file_name()));
        }
        let mut options = OpenOptions::new();
        options.append(true).create_new(true);
        #[cfg(unix)]
        options.mode(SEGMENT_MODE);
        let file = options.open(&self.path)?;
        self.file = Some(Arc::new(file));
        self.bytes_written = 0;
        Ok(())
    }

    /// Reopens an existing segment for appending, picking up its current
    /// size. This is the restart path: new records land after whatever the
    /// file already holds, including any crash residue at the tail.
    pub fn open_for_append(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen(self.file_name()));
        }
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.bytes_written = file.metadata()?.len();
        self.file = Some(Arc::new(file));
        Ok(())
    }

    /// Writes the record's header line and body. `bytes_written` reflects the
    /// count the OS acknowledged even when the write fails partway.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let file = self.writing_handle()?;
        let (header, body) = record.encode();
        write_fully(&file, &header, &mut self.bytes_written)?;
        write_fully(&file, body, &mut self.bytes_written)?;
        Ok(())
    }

    /// Flushes buffered data and metadata for this file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let file = self.writing_handle()?;
        file.sync_all()?;
        Ok(())
    }

    /// Shared handle to the open file, for fsyncing off the writer's thread
    /// of control. The descriptor stays alive until every handle drops, so a
    /// rollover can close the writer side under an in-flight sync.
    pub fn sync_handle(&self) -> Option<Arc<File>> {
        self.file.clone()
    }

    /// Bytes appended since this instance opened the file, plus the existing
    /// size when it was opened with `open_for_append`. Monotone.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Releases the file handle. Re-closing is a no-op.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Opens the segment read-only and returns a scanner over its records.
    /// Recovery-only; refuses while the instance holds a write handle.
    pub fn open_for_read(&self) -> Result<RecordScanner> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen(self.file_name()));
        }
        RecordScanner::open(&self.path)
    }

    fn writing_handle(&self) -> Result<Arc<File>> {
        match &self.file {
            Some(file) => Ok(Arc::clone(file)),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "segment not open for writing",
            ))),
        }
    }
}

fn write_fully(file: &File, buf: &[u8], counter: &mut u64) -> Result<()> {
    let mut file = file;
    let mut offset = 0;
    while offset < buf.len() {
        match file.write(&buf[offset..]) {
            Ok(0) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                )))
            }
            Ok(n) => {
                offset += n;
                *counter += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Sequential scanner used by recovery. Alternates between reading a header
/// line (up to and including LF) and reading exactly `message_size` body
/// bytes; body bytes are never rescanned, so LF inside a body is opaque.
pub struct RecordScanner {
    reader: BufReader<File>,
}

impl RecordScanner {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Yields the next fully-decoded record. Clean EOF and a body truncated
    /// by a crash both read as end-of-stream; a header that fails the
    /// grammar is an error.
    pub fn next(&mut self) -> Result<Option<Record>> {
        let mut line = Vec::new();
        let read = self.reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if line.pop() != Some(b'\n') {
            return Err(Error::MalformedHeader("unterminated header line"));
        }
        let header = decode_header(&line)?;
        let mut body = vec![0u8; header.message_size as usize];
        if let Err(err) = self.reader.read_exact(&mut body) {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(err.into());
        }
        Ok(Some(Record {
            sequence: header.sequence,
            timestamp: header.timestamp,
            message_size: header.message_size,
            hash: header.hash,
            body,
        }))
    }
}
