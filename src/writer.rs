use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::record::{frame_body, Record, FORMAT_VERSION};
use crate::recovery::recover;
use crate::segment::SegmentFile;
use crate::{Error, Result};

pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(2);
pub const DEFAULT_MAX_BYTES_PER_SEGMENT: u64 = 1024 * 1024 * 1024;

/// Engine tunables, fixed at open time.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the segment files. Must exist and be writable.
    pub data_dir: PathBuf,
    pub max_body_size: usize,
    pub max_queue_depth: usize,
    pub max_pending_acks: usize,
    pub coalesce_interval: Duration,
    pub max_bytes_per_segment: u64,
}

impl LogConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_pending_acks: DEFAULT_MAX_QUEUE_DEPTH,
            coalesce_interval: DEFAULT_COALESCE_INTERVAL,
            max_bytes_per_segment: DEFAULT_MAX_BYTES_PER_SEGMENT,
        }
    }
}

/// Durable-write acknowledgement: the record's bytes are on stable storage
/// by the time the submitter observes this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub sequence: u64,
    pub hash: String,
}

/// Write-path counters, updated only by the engine task.
#[derive(Debug, Default)]
pub struct LogStats {
    next_sequence: AtomicU64,
    records_appended: AtomicU64,
    append_errors: AtomicU64,
    flushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub next_sequence: u64,
    pub records_appended: u64,
    pub append_errors: u64,
    pub flushes: u64,
}

impl LogStats {
    fn new(next_sequence: u64) -> Self {
        let stats = Self::default();
        stats.next_sequence.store(next_sequence, Ordering::Relaxed);
        stats
    }

    fn record_append(&self, next_sequence: u64) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.next_sequence.store(next_sequence, Ordering::Relaxed);
    }

    fn record_append_error(&self) {
        self.append_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            next_sequence: self.next_sequence.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            append_errors: self.append_errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

struct SubmitRequest {
    body: Vec<u8>,
    notify: oneshot::Sender<Result<WriteAck>>,
}

struct PendingAck {
    ack: WriteAck,
    notify: oneshot::Sender<Result<WriteAck>>,
}

struct FlushBatch {
    file: Arc<File>,
    acks: Vec<PendingAck>,
}

/// The open log. Owns the engine and flusher tasks; hand out [`LogWriter`]
/// clones for submissions.
pub struct Log {
    writer: LogWriter,
    engine: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

/// Cloneable submission handle. `submit` blocks on queue backpressure and
/// resolves once the record is durable (or failed).
#[derive(Clone)]
pub struct LogWriter {
    requests: mpsc::Sender<SubmitRequest>,
    stats: Arc<LogStats>,
    config: Arc<LogConfig>,
}

impl Log {
    /// Recovers the next sequence from the data directory, opens the active
    /// segment, and starts the writer and flusher tasks. A directory that
    /// cannot be scanned or a segment that cannot be opened fails here, before
    /// any submission is accepted.
    pub async fn open(config: LogConfig) -> Result<Log> {
        if config.max_queue_depth == 0 {
            return Err(Error::InvalidConfig("max_queue_depth must be at least 1"));
        }
        if config.coalesce_interval.is_zero() {
            return Err(Error::InvalidConfig("coalesce_interval must be non-zero"));
        }
        // Framing can add one byte, and the header stores the size in 32 bits.
        if config.max_body_size >= u32::MAX as usize {
            return Err(Error::InvalidConfig(
                "max_body_size must fit a 32-bit message size",
            ));
        }
        let scan_dir = config.data_dir.clone();
        let recovered = tokio::task::spawn_blocking(move || recover(&scan_dir))
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;
        info!(
            "recovered {}: version {}, next sequence {}",
            config.data_dir.display(),
            recovered.version,
            recovered.next_sequence
        );

        let active = match recovered.latest_segment {
            Some(starting_sequence) => {
                let mut segment = SegmentFile::new(&config.data_dir, starting_sequence);
                segment.open_for_append()?;
                segment
            }
            None => {
                let mut segment = SegmentFile::new(&config.data_dir, recovered.next_sequence);
                segment.create_for_write()?;
                segment
            }
        };
        info!(
            "appending to {} at byte {}",
            active.file_name(),
            active.bytes_written()
        );

        let stats = Arc::new(LogStats::new(recovered.next_sequence));
        let config = Arc::new(config);
        let (request_tx, request_rx) = mpsc::channel(config.max_queue_depth);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();

        let flusher = tokio::spawn(run_flusher(flush_rx, Arc::clone(&stats)));
        let engine = Engine {
            config: Arc::clone(&config),
            requests: request_rx,
            flushes: flush_tx,
            active,
            next_sequence: recovered.next_sequence,
            pending: Vec::new(),
            stats: Arc::clone(&stats),
        };
        let engine = tokio::spawn(engine.run());

        Ok(Log {
            writer: LogWriter {
                requests: request_tx,
                stats,
                config,
            },
            engine,
            flusher,
        })
    }

    pub fn writer(&self) -> LogWriter {
        self.writer.clone()
    }

    /// Graceful shutdown: once every outstanding [`LogWriter`] clone is
    /// dropped, the engine drains its queue, flushes the final batch, and
    /// closes the active segment. Resolves when both tasks have finished.
    pub async fn shutdown(self) -> Result<()> {
        let Log {
            writer,
            engine,
            flusher,
        } = self;
        drop(writer);
        engine
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))?;
        flusher
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))?;
        Ok(())
    }
}

impl LogWriter {
    /// Submit-and-wait. Validates the body, enqueues it (blocking while the
    /// request queue is full), and awaits the durable ack.
    pub async fn submit(&self, body: Vec<u8>) -> Result<WriteAck> {
        validate_body(&body, self.config.max_body_size)?;
        let (notify, ack) = oneshot::channel();
        self.requests
            .send(SubmitRequest { body, notify })
            .await
            .map_err(|_| Error::Closed)?;
        ack.await.map_err(|_| Error::Closed)?
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        FORMAT_VERSION
    }
}

fn validate_body(body: &[u8], max_body_size: usize) -> Result<()> {
    if body.is_empty() {
        return Err(Error::EmptyBody);
    }
    if body.len() > max_body_size {
        return Err(Error::BodyTooLarge {
            len: body.len(),
            max: max_body_size,
        });
    }
    Ok(())
}

struct Engine {
    config: Arc<LogConfig>,
    requests: mpsc::Receiver<SubmitRequest>,
    flushes: mpsc::UnboundedSender<FlushBatch>,
    active: SegmentFile,
    next_sequence: u64,
    pending: Vec<PendingAck>,
    stats: Arc<LogStats>,
}

impl Engine {
    /// Single-writer main loop: the sole mutator of the sequence counter, the
    /// active segment, and the pending-ack buffer.
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.coalesce_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if self.active.bytes_written() >= self.config.max_bytes_per_segment {
                if let Err(err) = self.roll_segment() {
                    error!("cannot create next segment: {err}");
                    std::process::exit(1);
                }
            }
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_submit(request),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.flush();
                    }
                }
            }
        }
        self.flush();
        self.active.close();
        info!("writer stopped at next sequence {}", self.next_sequence);
    }

    fn handle_submit(&mut self, request: SubmitRequest) {
        let SubmitRequest { body, notify } = request;
        if let Err(err) = validate_body(&body, self.config.max_body_size) {
            let _ = notify.send(Err(err));
            return;
        }

        let record = Record::new(self.next_sequence, now_unix_seconds(), frame_body(body));
        let bytes_before = self.active.bytes_written();
        match self.active.append(&record) {
            Ok(()) => {
                self.pending.push(PendingAck {
                    ack: WriteAck {
                        sequence: record.sequence,
                        hash: record.hash,
                    },
                    notify,
                });
                self.next_sequence += 1;
                self.stats.record_append(self.next_sequence);
                if self.pending.len() >= self.config.max_pending_acks {
                    self.flush();
                }
            }
            Err(err) => {
                self.stats.record_append_error();
                if self.active.bytes_written() > bytes_before {
                    // A partial record on disk would hide every later record
                    // in this segment from the recovery scan.
                    error!(
                        "partial append of sequence {} corrupted {}: {err}",
                        record.sequence,
                        self.active.file_name()
                    );
                    std::process::exit(1);
                }
                // No bytes reached the file; the segment is intact and the
                // sequence is not consumed.
                warn!(
                    "append of sequence {} to {} failed: {err}",
                    record.sequence,
                    self.active.file_name()
                );
                let _ = notify.send(Err(err));
            }
        }
    }

    /// Hands the pending-ack buffer to the flusher and immediately resumes.
    /// Batches travel FIFO, so acks of batch K always land before batch K+1.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(file) = self.active.sync_handle() {
            let acks = std::mem::take(&mut self.pending);
            let _ = self.flushes.send(FlushBatch { file, acks });
        }
    }

    /// Size-driven rollover, at a batch boundary only: flush what is pending
    /// against the old segment, release it, and exclusive-create the next one
    /// starting at the first unassigned sequence.
    fn roll_segment(&mut self) -> Result<()> {
        self.flush();
        info!(
            "rolling {} at {} bytes; next segment starts at sequence {}",
            self.active.file_name(),
            self.active.bytes_written(),
            self.next_sequence
        );
        self.active.close();
        let mut segment = SegmentFile::new(&self.config.data_dir, self.next_sequence);
        segment.create_for_write()?;
        self.active = segment;
        Ok(())
    }
}

/// Fsyncs each batch off the engine loop, then releases its acks in sequence
/// order. A submitter that stopped listening is skipped silently; its record
/// is durable regardless.
async fn run_flusher(mut batches: mpsc::UnboundedReceiver<FlushBatch>, stats: Arc<LogStats>) {
    while let Some(FlushBatch { file, acks }) = batches.recv().await {
        let synced = tokio::task::spawn_blocking(move || file.sync_all()).await;
        match synced {
            Ok(Ok(())) => {
                stats.record_flush();
                for pending in acks {
                    let _ = pending.notify.send(Ok(pending.ack));
                }
            }
            Ok(Err(err)) => {
                error!("fsync failed, durability cannot be guaranteed: {err}");
                std::process::exit(1);
            }
            Err(err) => {
                error!("fsync task failed: {err}");
                std::process::exit(1);
            }
        }
    }
}

// The header grammar is unsigned; a pre-epoch clock clamps to zero rather
// than emitting a sign the decoder cannot round-trip.
fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
