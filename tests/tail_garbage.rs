use std::io::Write as _;

use sequent::{Log, LogConfig};
use tempfile::tempdir;

#[tokio::test]
async fn appends_continue_after_tail_garbage() {
    let dir = tempdir().expect("tempdir");

    {
        let log = Log::open(LogConfig::new(dir.path())).await.expect("open");
        let writer = log.writer();
        let ack = writer.submit(b"hello".to_vec()).await.expect("submit");
        assert_eq!(ack.sequence, 1);
        drop(writer);
        log.shutdown().await.expect("shutdown");
    }

    // Crash residue: bytes at the tail that decode as no record.
    let segment_path = dir.path().join("1-1.log");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&segment_path)
        .expect("open segment");
    file.write_all(&[0x7f; 20]).expect("write garbage");
    drop(file);
    let dirty_size = std::fs::metadata(&segment_path).expect("metadata").len();

    let log = Log::open(LogConfig::new(dir.path())).await.expect("reopen");
    let writer = log.writer();
    let ack = writer.submit(b"x".to_vec()).await.expect("submit");
    assert_eq!(ack.sequence, 2, "recovery stops at the last valid record");
    drop(writer);
    log.shutdown().await.expect("shutdown");

    // The new record went after the garbage; nothing was rewound or erased.
    let contents = std::fs::read(&segment_path).expect("segment");
    assert!(contents.len() > dirty_size as usize);
    assert_eq!(&contents[contents.len() - 2..], b"x\n");
    assert_eq!(&contents[dirty_size as usize - 20..dirty_size as usize], &[0x7f; 20]);
}
