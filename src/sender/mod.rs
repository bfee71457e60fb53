//! Flush pipeline.
//!
//! [`EventSender`] runs two dedicated threads connected by bounded channels:
//!
//! - the *writer* appends each record to the outbox, feeds it to the flush
//!   policies, and seals the open generation when any policy fires;
//! - the *uploader* uploads every sealed generation (the whole backlog, not
//!   only the newest) and deletes or keeps each one according to the outcome.
//!
//! `send` never blocks: a full queue drops the record and counts it.

mod policy;
mod record;
mod upload;

pub use policy::{FlushPolicy, ManualFlushPolicy, SizeFlushPolicy};
pub use record::{event_payload, Record, CONTEXT_KEY, MANUAL_FLUSH_EVENT};
pub use upload::{cleanup_for_status, UploadClient};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::error::{ConfidenceError, ConfidenceResult, UploadError};
use crate::outbox::{GenerationId, Outbox};

/// Flush pipeline settings.
#[derive(Debug, Clone)]
pub struct EventSenderConfig {
    /// Records buffered between `send` and the writer thread.
    pub queue_capacity: usize,
    /// Records per generation before the size policy seals it.
    pub batch_size: usize,
    /// Upload generations left sealed by a previous process at startup.
    pub flush_backlog_on_start: bool,
}

impl Default for EventSenderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            batch_size: 25,
            flush_backlog_on_start: true,
        }
    }
}

impl EventSenderConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if a capacity is zero.
    pub fn validate(self) -> ConfidenceResult<Self> {
        if self.queue_capacity == 0 {
            return Err(ConfidenceError::internal("queue_capacity must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfidenceError::internal("batch_size must be at least 1"));
        }
        Ok(self)
    }

    /// The size and manual-flush policies this configuration implies.
    #[must_use]
    pub fn default_policies(&self) -> Vec<Box<dyn FlushPolicy>> {
        vec![
            Box::new(SizeFlushPolicy::new(self.batch_size)),
            Box::new(ManualFlushPolicy::default()),
        ]
    }
}

enum WriterMsg {
    Record(Record),
    Barrier(Sender<()>),
}

enum UploadMsg {
    UploadSealed,
    Barrier(Sender<()>),
}

/// Counters describing what the pipeline did with sealed generations.
#[derive(Debug, Default)]
struct UploadCounters {
    delivered: AtomicU64,
    rejected: AtomicU64,
    retained: AtomicU64,
}

/// Point-in-time view of the pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Records dropped because the queue was full or closed.
    pub dropped_records: u64,
    /// Generations uploaded and deleted.
    pub delivered_generations: u64,
    /// Generations deleted after a permanent rejection.
    pub rejected_generations: u64,
    /// Upload attempts whose generation was kept for a later flush.
    pub retained_attempts: u64,
}

/// Non-blocking record sink backed by an [`Outbox`].
pub struct EventSender {
    record_tx: Sender<WriterMsg>,
    dropped: AtomicU64,
    counters: Arc<UploadCounters>,
    writer: Mutex<Option<JoinHandle<()>>>,
    uploader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventSender {
    /// Starts a pipeline using the size and manual-flush policies.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be spawned.
    pub fn new(
        cfg: EventSenderConfig,
        outbox: Arc<dyn Outbox>,
        client: Arc<dyn UploadClient>,
    ) -> ConfidenceResult<Self> {
        let policies = cfg.default_policies();
        Self::with_policies(cfg, outbox, client, policies)
    }

    /// Starts a pipeline with an explicit policy list, evaluated with OR
    /// semantics.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be spawned.
    pub fn with_policies(
        cfg: EventSenderConfig,
        outbox: Arc<dyn Outbox>,
        client: Arc<dyn UploadClient>,
        policies: Vec<Box<dyn FlushPolicy>>,
    ) -> ConfidenceResult<Self> {
        let cfg = cfg.validate()?;
        let (record_tx, record_rx) = bounded::<WriterMsg>(cfg.queue_capacity);
        // One pending upload request is enough: each run drains the backlog.
        let (upload_tx, upload_rx) = bounded::<UploadMsg>(1);
        let counters = Arc::new(UploadCounters::default());

        if cfg.flush_backlog_on_start {
            let _ = upload_tx.try_send(UploadMsg::UploadSealed);
        }

        let upload_outbox = Arc::clone(&outbox);
        let upload_counters = Arc::clone(&counters);
        let uploader = thread::Builder::new()
            .name("confidence-uploader".to_string())
            .spawn(move || uploader_loop(&*upload_outbox, &*client, &upload_counters, &upload_rx))
            .map_err(|e| ConfidenceError::internal(format!("failed to spawn uploader thread: {e}")))?;

        let writer = thread::Builder::new()
            .name("confidence-writer".to_string())
            .spawn(move || writer_loop(&*outbox, policies, &record_rx, &upload_tx))
            .map_err(|e| ConfidenceError::internal(format!("failed to spawn writer thread: {e}")))?;

        Ok(Self {
            record_tx,
            dropped: AtomicU64::new(0),
            counters,
            writer: Mutex::new(Some(writer)),
            uploader: Mutex::new(Some(uploader)),
        })
    }

    /// Enqueues a record. Never blocks; a full queue drops the record.
    pub fn send(&self, record: Record) {
        match self.record_tx.try_send(WriterMsg::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event queue full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event pipeline stopped, dropping record");
            }
        }
    }

    /// Blocks until every record sent before this call has been written, and
    /// any flush it triggered has finished uploading.
    ///
    /// # Errors
    /// Returns an error if a worker thread has exited.
    pub fn settle(&self) -> ConfidenceResult<()> {
        let (ack_tx, ack_rx) = bounded::<()>(1);
        self.record_tx
            .send(WriterMsg::Barrier(ack_tx))
            .map_err(|_| ConfidenceError::internal("event writer is not running"))?;
        ack_rx
            .recv()
            .map_err(|_| ConfidenceError::internal("event pipeline stopped before settling"))
    }

    /// Current pipeline counters.
    #[must_use]
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            dropped_records: self.dropped.load(Ordering::Relaxed),
            delivered_generations: self.counters.delivered.load(Ordering::Relaxed),
            rejected_generations: self.counters.rejected.load(Ordering::Relaxed),
            retained_attempts: self.counters.retained.load(Ordering::Relaxed),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        // Closing the record queue stops the writer, which drops the upload
        // queue and stops the uploader.
        let (closed_tx, _) = bounded::<WriterMsg>(1);
        drop(std::mem::replace(&mut self.record_tx, closed_tx));

        for slot in [&self.writer, &self.uploader] {
            let handle = match slot.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("event pipeline worker panicked");
                }
            }
        }
    }
}

fn writer_loop(
    outbox: &dyn Outbox,
    mut policies: Vec<Box<dyn FlushPolicy>>,
    record_rx: &Receiver<WriterMsg>,
    upload_tx: &Sender<UploadMsg>,
) {
    while let Ok(msg) = record_rx.recv() {
        match msg {
            WriterMsg::Record(record) => {
                if !record.is_manual_flush() {
                    if let Err(e) = outbox.write_record(&record) {
                        error!(error = %e, "failed to append record to outbox");
                    }
                }
                for policy in &mut policies {
                    policy.hit(&record);
                }
                if policies.iter().any(|p| p.should_flush()) {
                    for policy in &mut policies {
                        policy.reset();
                    }
                    match outbox.seal_current_generation() {
                        Ok(Some(id)) => debug!(generation = %id, "flush triggered"),
                        Ok(None) => debug!("flush triggered with an empty generation"),
                        Err(e) => error!(error = %e, "failed to seal outbox generation"),
                    }
                    // A full queue already holds a pending upload request.
                    let _ = upload_tx.try_send(UploadMsg::UploadSealed);
                }
            }
            WriterMsg::Barrier(ack) => {
                if upload_tx.send(UploadMsg::Barrier(ack)).is_err() {
                    warn!("uploader stopped, barrier not forwarded");
                }
            }
        }
    }
    debug!("event writer stopped");
}

fn uploader_loop(
    outbox: &dyn Outbox,
    client: &dyn UploadClient,
    counters: &UploadCounters,
    upload_rx: &Receiver<UploadMsg>,
) {
    while let Ok(msg) = upload_rx.recv() {
        match msg {
            UploadMsg::UploadSealed => upload_sealed(outbox, client, counters),
            UploadMsg::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("event uploader stopped");
}

fn upload_sealed(outbox: &dyn Outbox, client: &dyn UploadClient, counters: &UploadCounters) {
    let generations = match outbox.list_sealed_generations() {
        Ok(generations) => generations,
        Err(e) => {
            error!(error = %e, "failed to list sealed generations");
            return;
        }
    };
    for id in generations {
        upload_generation(outbox, client, counters, &id);
    }
}

fn upload_generation(outbox: &dyn Outbox, client: &dyn UploadClient, counters: &UploadCounters, id: &GenerationId) {
    let records = match outbox.read_generation(id) {
        Ok(records) => records,
        Err(e) => {
            error!(generation = %id, error = %e, "failed to read sealed generation");
            return;
        }
    };

    let delete = if records.is_empty() {
        debug!(generation = %id, "removing empty generation");
        true
    } else {
        match client.upload(&records) {
            Ok(true) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                info!(generation = %id, records = records.len(), "uploaded generation");
                true
            }
            Ok(false) => {
                counters.retained.fetch_add(1, Ordering::Relaxed);
                debug!(generation = %id, "upload deferred, keeping generation");
                false
            }
            Err(e @ UploadError::Rejected { .. }) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(generation = %id, error = %e, "batch rejected, discarding generation");
                true
            }
            Err(e @ UploadError::Transient { .. }) => {
                counters.retained.fetch_add(1, Ordering::Relaxed);
                warn!(generation = %id, error = %e, "upload failed, keeping generation");
                false
            }
        }
    };

    if delete {
        if let Err(e) = outbox.delete_generation(id) {
            error!(generation = %id, error = %e, "failed to delete generation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::MemoryOutbox;

    #[derive(Default)]
    struct CountingClient {
        batches: Mutex<Vec<usize>>,
    }

    impl UploadClient for CountingClient {
        fn upload(&self, batch: &[Record]) -> Result<bool, UploadError> {
            self.batches.lock().unwrap().push(batch.len());
            Ok(true)
        }
    }

    fn apply(flag: &str) -> Record {
        Record::apply(flag, "tok", "2024-01-01T00:00:00.000Z")
    }

    #[test]
    fn test_config_validation() {
        assert!(EventSenderConfig::default().validate().is_ok());
        let bad = EventSenderConfig {
            batch_size: 0,
            ..EventSenderConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_size_policy_triggers_upload() {
        let outbox = Arc::new(MemoryOutbox::new());
        let client = Arc::new(CountingClient::default());
        let cfg = EventSenderConfig {
            batch_size: 3,
            ..EventSenderConfig::default()
        };
        let sender = EventSender::new(cfg, outbox.clone(), client.clone()).unwrap();

        for flag in ["a", "b", "c", "d"] {
            sender.send(apply(flag));
        }
        sender.settle().unwrap();

        assert_eq!(*client.batches.lock().unwrap(), vec![3]);
        assert!(outbox.list_sealed_generations().unwrap().is_empty());
        assert_eq!(sender.stats().delivered_generations, 1);
    }

    #[test]
    fn test_manual_flush_uploads_partial_batch() {
        let outbox = Arc::new(MemoryOutbox::new());
        let client = Arc::new(CountingClient::default());
        let sender = EventSender::new(EventSenderConfig::default(), outbox.clone(), client.clone()).unwrap();

        sender.send(apply("a"));
        sender.send(Record::manual_flush("2024-01-01T00:00:00.000Z"));
        sender.settle().unwrap();

        assert_eq!(*client.batches.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_drop_joins_workers() {
        let outbox = Arc::new(MemoryOutbox::new());
        let client = Arc::new(CountingClient::default());
        let sender = EventSender::new(EventSenderConfig::default(), outbox.clone(), client).unwrap();
        sender.send(apply("a"));
        drop(sender);
        assert!(outbox.seal_current_generation().unwrap().is_some());
    }
}
