//! Flush pipeline cleanup policy against an on-disk outbox.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use confidence::{
    cleanup_for_status, EventSender, EventSenderConfig, FileOutbox, Outbox, OutboxConfig, Record, UploadClient,
    UploadError,
};

/// Upload client replaying scripted outcomes, then succeeding.
#[derive(Default)]
struct ScriptedUploader {
    script: Mutex<VecDeque<Result<bool, UploadError>>>,
    attempts: Mutex<Vec<usize>>,
}

impl ScriptedUploader {
    fn push(&self, outcome: Result<bool, UploadError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

impl UploadClient for ScriptedUploader {
    fn upload(&self, batch: &[Record]) -> Result<bool, UploadError> {
        self.attempts.lock().unwrap().push(batch.len());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

/// Maps an HTTP status the way a transport adapter would.
struct StatusUploader {
    status: Mutex<u16>,
}

impl UploadClient for StatusUploader {
    fn upload(&self, _batch: &[Record]) -> Result<bool, UploadError> {
        Ok(cleanup_for_status(*self.status.lock().unwrap()))
    }
}

fn event(i: usize) -> Record {
    Record::apply(format!("flag-{i}"), "tok", "2024-01-01T00:00:00.000Z")
}

fn flush_marker() -> Record {
    Record::manual_flush("2024-01-01T00:00:00.000Z")
}

struct Pipeline {
    _dir: TempDir,
    outbox: Arc<FileOutbox>,
    sender: EventSender,
}

fn pipeline(client: Arc<dyn UploadClient>) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let outbox = Arc::new(FileOutbox::open(dir.path(), OutboxConfig::default()).unwrap());
    let sender = EventSender::new(EventSenderConfig::default(), outbox.clone(), client).unwrap();
    Pipeline {
        _dir: dir,
        outbox,
        sender,
    }
}

impl Pipeline {
    fn send_and_flush(&self, i: usize) {
        self.sender.send(event(i));
        self.sender.send(flush_marker());
        self.sender.settle().unwrap();
    }

    fn sealed(&self) -> usize {
        self.outbox.list_sealed_generations().unwrap().len()
    }
}

#[test]
fn test_cleanup_policy_per_outcome() {
    let uploader = Arc::new(ScriptedUploader::default());
    let p = pipeline(uploader.clone());

    uploader.push(Ok(true));
    p.send_and_flush(0);
    assert_eq!(p.sealed(), 0, "delivered generation is deleted");

    uploader.push(Err(UploadError::Rejected {
        message: "malformed".into(),
    }));
    p.send_and_flush(1);
    assert_eq!(p.sealed(), 0, "rejected generation is deleted");

    uploader.push(Ok(false));
    p.send_and_flush(2);
    assert_eq!(p.sealed(), 1, "deferred generation is kept");

    uploader.push(Err(UploadError::Transient {
        message: "offline".into(),
    }));
    uploader.push(Err(UploadError::Transient {
        message: "offline".into(),
    }));
    p.send_and_flush(3);
    assert_eq!(p.sealed(), 2, "backlog and new generation are both kept");

    // No scripted failures left: the next trigger retries the whole backlog.
    p.send_and_flush(4);
    assert_eq!(p.sealed(), 0);
    assert_eq!(uploader.attempts(), 2 + 1 + 2 + 3);

    let stats = p.sender.stats();
    assert_eq!(stats.delivered_generations, 4);
    assert_eq!(stats.rejected_generations, 1);
    assert_eq!(stats.retained_attempts, 3);
    assert_eq!(stats.dropped_records, 0);
}

#[test]
fn test_status_mapping_drives_cleanup() {
    let uploader = Arc::new(StatusUploader { status: Mutex::new(429) });
    let p = pipeline(uploader.clone());

    p.send_and_flush(0);
    assert_eq!(p.sealed(), 1, "rate limited batch is kept");

    *uploader.status.lock().unwrap() = 400;
    p.send_and_flush(1);
    assert_eq!(p.sealed(), 0, "client error batches are dropped");

    *uploader.status.lock().unwrap() = 503;
    p.send_and_flush(2);
    assert_eq!(p.sealed(), 1);

    *uploader.status.lock().unwrap() = 200;
    p.send_and_flush(3);
    assert_eq!(p.sealed(), 0);
}

#[test]
fn test_backlog_uploaded_on_start() {
    let dir = TempDir::new().unwrap();
    {
        let outbox = FileOutbox::open(dir.path(), OutboxConfig::default()).unwrap();
        outbox.write_record(&event(0)).unwrap();
        outbox.seal_current_generation().unwrap().unwrap();
        outbox.write_record(&event(1)).unwrap();
    }

    let uploader = Arc::new(ScriptedUploader::default());
    let outbox = Arc::new(FileOutbox::open(dir.path(), OutboxConfig::default()).unwrap());
    let sender = EventSender::new(EventSenderConfig::default(), outbox.clone(), uploader.clone()).unwrap();
    sender.settle().unwrap();

    assert_eq!(*uploader.attempts.lock().unwrap(), vec![1]);
    assert!(outbox.list_sealed_generations().unwrap().is_empty());

    // The resumed open generation goes out with the next flush.
    sender.send(flush_marker());
    sender.settle().unwrap();
    assert_eq!(*uploader.attempts.lock().unwrap(), vec![1, 1]);
}

#[test]
fn test_size_policy_seals_full_batches() {
    let uploader = Arc::new(ScriptedUploader::default());
    let dir = TempDir::new().unwrap();
    let outbox = Arc::new(FileOutbox::open(dir.path(), OutboxConfig::default()).unwrap());
    let config = EventSenderConfig {
        batch_size: 10,
        ..EventSenderConfig::default()
    };
    let sender = EventSender::new(config, outbox, uploader.clone()).unwrap();

    for i in 0..25 {
        sender.send(event(i));
    }
    sender.settle().unwrap();
    assert_eq!(*uploader.attempts.lock().unwrap(), vec![10, 10]);
}
