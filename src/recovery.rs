use std::path::Path;

use log::warn;

use crate::record::{parse_segment_name, validate_segment_name, FORMAT_VERSION};
use crate::segment::SegmentFile;
use crate::Result;

/// Outcome of scanning the data directory on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredLog {
    pub version: u64,
    /// Sequence the engine assigns to its next accepted record.
    pub next_sequence: u64,
    /// Starting sequence of the newest segment, if any exists. The engine
    /// resumes appending to this segment rather than cutting a new one.
    pub latest_segment: Option<u64>,
}

/// Determines the next sequence by scanning the newest segment. Only file
/// names matching the v1 pattern are considered; everything else in the
/// directory is ignored. Crash residue at the tail of the newest segment
/// stops the scan without failing recovery: nothing past the last
/// fully-decoded record was ever acknowledged.
pub fn recover(data_dir: &Path) -> Result<RecoveredLog> {
    let mut latest: Option<u64> = None;
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !validate_segment_name(name) {
            continue;
        }
        let (_, starting_sequence) = parse_segment_name(name)?;
        if latest.is_none_or(|current| starting_sequence > current) {
            latest = Some(starting_sequence);
        }
    }

    let Some(starting_sequence) = latest else {
        return Ok(RecoveredLog {
            version: FORMAT_VERSION,
            next_sequence: 1,
            latest_segment: None,
        });
    };

    let segment = SegmentFile::new(data_dir, starting_sequence);
    let mut scanner = segment.open_for_read()?;
    let mut last_seen: Option<u64> = None;
    loop {
        match scanner.next() {
            Ok(Some(record)) => last_seen = Some(record.sequence),
            Ok(None) => break,
            Err(err) => {
                warn!(
                    "stopping recovery scan of {} after sequence {:?}: {err}",
                    segment.file_name(),
                    last_seen
                );
                break;
            }
        }
    }

    let next_sequence = match last_seen {
        Some(sequence) => sequence + 1,
        None => starting_sequence,
    };
    Ok(RecoveredLog {
        version: FORMAT_VERSION,
        next_sequence,
        latest_segment: Some(starting_sequence),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{frame_body, Record};
    use std::io::Write as _;
    use tempfile::tempdir;

    fn write_segment(dir: &Path, starting_sequence: u64, bodies: &[&[u8]]) {
        let mut segment = SegmentFile::new(dir, starting_sequence);
        segment.create_for_write().expect("create");
        for (i, body) in bodies.iter().enumerate() {
            let sequence = starting_sequence + i as u64;
            let record = Record::new(sequence, 1_700_000_000, frame_body(body.to_vec()));
            segment.append(&record).expect("append");
        }
        segment.close();
    }

    #[test]
    fn empty_directory_starts_at_one() {
        let dir = tempdir().expect("tempdir");
        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(
            recovered,
            RecoveredLog {
                version: 1,
                next_sequence: 1,
                latest_segment: None
            }
        );
    }

    #[test]
    fn scans_only_the_newest_segment() {
        let dir = tempdir().expect("tempdir");
        write_segment(dir.path(), 1, &[b"a", b"b", b"c"]);
        write_segment(dir.path(), 4, &[b"d", b"e"]);

        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(recovered.next_sequence, 6);
        assert_eq!(recovered.latest_segment, Some(4));
    }

    #[test]
    fn ignores_unrelated_entries() {
        let dir = tempdir().expect("tempdir");
        write_segment(dir.path(), 9, &[b"only"]);
        std::fs::write(dir.path().join("notes.txt"), b"hello").expect("write");
        std::fs::write(dir.path().join("2-99.log"), b"other version").expect("write");
        std::fs::create_dir(dir.path().join("1-100.log")).expect("mkdir");

        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(recovered.next_sequence, 10);
        assert_eq!(recovered.latest_segment, Some(9));
    }

    #[test]
    fn tail_garbage_stops_at_last_full_record() {
        let dir = tempdir().expect("tempdir");
        write_segment(dir.path(), 1, &[b"a", b"b"]);
        let path = dir.path().join("1-1.log");
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"\x00\x01garbage without structure")
            .expect("write");
        drop(file);

        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(recovered.next_sequence, 3);
    }

    #[test]
    fn truncated_tail_record_is_discarded() {
        let dir = tempdir().expect("tempdir");
        write_segment(dir.path(), 5, &[b"kept"]);
        let path = dir.path().join("1-5.log");
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        // A record whose body was cut short by a crash.
        file.write_all(b"6-1700000000-100-aGk=\npartial")
            .expect("write");
        drop(file);

        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(recovered.next_sequence, 6);
    }

    #[test]
    fn empty_newest_segment_yields_its_starting_sequence() {
        let dir = tempdir().expect("tempdir");
        write_segment(dir.path(), 7, &[]);
        let recovered = recover(dir.path()).expect("recover");
        assert_eq!(recovered.next_sequence, 7);
        assert_eq!(recovered.latest_segment, Some(7));
    }
}
