//! Reconciliation engine.
//!
//! A [`Confidence`] session owns an evaluation context and a cached
//! [`Resolution`]. Every context mutation cancels the in-flight fetch and
//! starts a new fetch-then-activate cycle, so only the newest context is ever
//! activated. Flag reads are answered from the in-memory cache and never wait
//! on the network.
//!
//! # Locking
//! Each session has a `gate` mutex. Mutations hold it while updating the
//! context and replacing the current task; a fetch holds it while checking
//! that it is still current and publishing. The gate is never held across an
//! `.await`.

mod apply;
mod client;
mod context;
mod task;
mod telemetry;

pub use client::{ResolveClient, ResolveResponse};
pub use task::{CancellationToken, FetchOutcome, TaskManager};
pub use telemetry::{Telemetry, TelemetrySnapshot};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConfidenceError, ConfidenceResult};
use crate::hash::hash_context;
use crate::resolution::{Evaluable, Evaluation, Resolution};
use crate::sender::{event_payload, EventSender, Record};
use crate::storage::{visitor, ByteStorage, MemoryStorage, SnapshotStore};
use crate::time::{Clock, SystemClock};
use crate::value::{Struct, Value};

use apply::ApplyTracker;
use context::ContextManager;

struct Inner {
    client_secret: String,
    context: Arc<ContextManager>,
    resolver: Arc<dyn ResolveClient>,
    snapshots: SnapshotStore,
    cache: RwLock<Arc<Resolution>>,
    tasks: TaskManager,
    gate: Mutex<()>,
    sender: Option<Arc<EventSender>>,
    applier: Arc<ApplyTracker>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<Telemetry>,
}

impl Inner {
    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Arc<Resolution> {
        Arc::clone(&self.cache.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, resolution: Resolution) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(resolution);
    }

    /// Updates the context and starts a reconciliation cycle for it.
    fn mutate(self: &Arc<Self>, entries: Struct, remove_keys: &[String]) {
        let _gate = self.gate();
        self.context.apply(entries, remove_keys);
        debug!(context_hash = %hash_context(&self.context.effective()), "context updated");

        let inner = Arc::clone(self);
        self.tasks.spawn(move |token| async move {
            match inner.reconcile(&token).await {
                FetchOutcome::Completed => {}
                FetchOutcome::Cancelled => debug!("fetch superseded by a newer context"),
                FetchOutcome::Failed(e) => warn!(error = %e, "fetch failed, keeping cached resolution"),
            }
        });
    }

    async fn reconcile(&self, token: &CancellationToken) -> FetchOutcome {
        if token.is_cancelled() {
            return FetchOutcome::Cancelled;
        }
        let context = self.context.effective();
        debug!(context_hash = %hash_context(&context), "fetch started");

        let result = tokio::select! {
            biased;
            () = token.cancelled() => return FetchOutcome::Cancelled,
            result = self.resolver.resolve(&context, token) => result,
        };
        let response = match result {
            Ok(response) => response,
            Err(_) if token.is_cancelled() => return FetchOutcome::Cancelled,
            Err(e) => return FetchOutcome::Failed(e),
        };

        let resolution = Resolution::new(context, response.resolved_flags, response.resolve_token);
        self.activate_if_current(token, resolution)
    }

    fn activate_if_current(&self, token: &CancellationToken, resolution: Resolution) -> FetchOutcome {
        let _gate = self.gate();
        if token.is_cancelled() {
            return FetchOutcome::Cancelled;
        }
        if resolution.context_hash() != hash_context(&self.context.effective()) {
            return FetchOutcome::Cancelled;
        }
        if let Err(e) = self.snapshots.save(&resolution) {
            warn!(error = %e, "failed to persist resolution snapshot");
        }
        info!(flags = resolution.flags.len(), "activated resolution");
        self.publish(resolution);
        FetchOutcome::Completed
    }
}

/// A feature-flag session: context, cached resolution, and event delivery.
///
/// Cloning is cheap and yields a handle to the same session.
#[derive(Clone)]
pub struct Confidence {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confidence")
            .field("context", &self.get_context())
            .field("tasks", &self.inner.tasks)
            .finish_non_exhaustive()
    }
}

impl Confidence {
    /// Starts configuring a session.
    #[must_use]
    pub fn builder(client_secret: impl Into<String>) -> ConfidenceBuilder {
        ConfidenceBuilder::new(client_secret)
    }

    /// Client credential this session was built with.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.inner.client_secret
    }

    /// Sets one context entry and schedules a fetch.
    pub fn put_context(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut entries = Struct::with_capacity(1);
        entries.insert(key.into(), value.into());
        self.inner.mutate(entries, &[]);
    }

    /// Sets several context entries and schedules one fetch.
    pub fn put_context_entries(&self, entries: Struct) {
        self.inner.mutate(entries, &[]);
    }

    /// Sets `entries`, removes `remove_keys`, and schedules one fetch.
    pub fn put_context_with_removals(&self, entries: Struct, remove_keys: &[String]) {
        self.inner.mutate(entries, remove_keys);
    }

    /// Removes a key, including one inherited from a parent session, and
    /// schedules a fetch.
    pub fn remove_key(&self, key: impl Into<String>) {
        self.inner.mutate(Struct::new(), &[key.into()]);
    }

    /// Changes the context without fetching.
    ///
    /// Evaluations report `Stale` until the next fetch activates.
    pub fn put_context_local(&self, entries: Struct, remove_keys: &[String]) {
        let _gate = self.inner.gate();
        self.inner.context.apply(entries, remove_keys);
    }

    /// [`put_context`](Self::put_context) followed by
    /// [`await_reconciliation`](Self::await_reconciliation).
    pub async fn put_context_and_wait(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.put_context(key, value);
        self.await_reconciliation().await;
    }

    /// [`put_context_entries`](Self::put_context_entries) followed by
    /// [`await_reconciliation`](Self::await_reconciliation).
    pub async fn put_context_entries_and_wait(&self, entries: Struct) {
        self.put_context_entries(entries);
        self.await_reconciliation().await;
    }

    /// [`remove_key`](Self::remove_key) followed by
    /// [`await_reconciliation`](Self::await_reconciliation).
    pub async fn remove_key_and_wait(&self, key: impl Into<String>) {
        self.remove_key(key);
        self.await_reconciliation().await;
    }

    /// The effective context: parent context minus removed keys, overlaid
    /// with this session's entries.
    #[must_use]
    pub fn get_context(&self) -> Struct {
        self.inner.context.effective()
    }

    /// Waits until the most recently scheduled fetch has activated, failed,
    /// or been cancelled with no successor.
    pub async fn await_reconciliation(&self) {
        self.inner.tasks.await_reconciliation().await;
    }

    /// Fetches for the current context, then persists and activates the
    /// result.
    ///
    /// If the context changes while the fetch is in flight, the result is
    /// discarded and the call still succeeds.
    ///
    /// # Errors
    /// Returns the resolve client's error, or a cache error if the snapshot
    /// could not be persisted (the result is activated regardless). The
    /// previous resolution stays active on fetch failure.
    pub async fn fetch_and_activate(&self) -> ConfidenceResult<()> {
        let context = self.get_context();
        let response = self
            .inner
            .resolver
            .resolve(&context, &CancellationToken::new())
            .await?;
        let resolution = Resolution::new(context, response.resolved_flags, response.resolve_token);

        let _gate = self.inner.gate();
        if resolution.context_hash() != hash_context(&self.inner.context.effective()) {
            debug!("context changed during fetch, result not activated");
            return Ok(());
        }
        let saved = self.inner.snapshots.save(&resolution);
        self.inner.publish(resolution);
        saved.map_err(ConfidenceError::from)
    }

    /// Fetches for the current context in the background and persists the
    /// result without activating it.
    ///
    /// The persisted snapshot becomes active on the next
    /// [`activate`](Self::activate) or the next session built over the same
    /// storage.
    pub fn async_fetch(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.runtime().spawn(async move {
            let context = inner.context.effective();
            let response = match inner.resolver.resolve(&context, &CancellationToken::new()).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "background fetch failed");
                    return;
                }
            };
            let resolution = Resolution::new(context, response.resolved_flags, response.resolve_token);
            match inner.snapshots.save(&resolution) {
                Ok(()) => debug!("background fetch persisted"),
                Err(e) => warn!(error = %e, "failed to persist background fetch"),
            }
        })
    }

    /// Replaces the active resolution with the persisted snapshot.
    ///
    /// # Errors
    /// Returns a cache error if the storage cannot be read.
    pub fn activate(&self) -> ConfidenceResult<()> {
        let _gate = self.inner.gate();
        let resolution = self.inner.snapshots.load()?;
        self.inner.publish(resolution);
        Ok(())
    }

    /// Returns true if no snapshot is persisted.
    ///
    /// # Errors
    /// Returns a cache error if the storage cannot be read.
    pub fn is_storage_empty(&self) -> ConfidenceResult<bool> {
        Ok(self.inner.snapshots.is_empty()?)
    }

    /// The resolution evaluations are currently answered from.
    #[must_use]
    pub fn active_resolution(&self) -> Arc<Resolution> {
        self.inner.active()
    }

    /// Creates a child session whose context inherits this one's.
    ///
    /// The child shares the resolve client, snapshot storage, and event
    /// pipeline, starts from this session's active resolution, and has its
    /// own fetch cycle.
    #[must_use]
    pub fn with_context(&self, entries: Struct) -> Confidence {
        let parent = &self.inner;
        let inner = Inner {
            client_secret: parent.client_secret.clone(),
            context: Arc::new(ContextManager::new(entries, Some(Arc::clone(&parent.context)))),
            resolver: Arc::clone(&parent.resolver),
            snapshots: parent.snapshots.clone(),
            cache: RwLock::new(parent.active()),
            tasks: TaskManager::new(parent.tasks.runtime().clone()),
            gate: Mutex::new(()),
            sender: parent.sender.clone(),
            applier: Arc::clone(&parent.applier),
            clock: Arc::clone(&parent.clock),
            telemetry: Arc::clone(&parent.telemetry),
        };
        Confidence { inner: Arc::new(inner) }
    }

    /// Evaluates `flag_path` (`flag` or `flag.field.sub`) against the cached
    /// resolution and the current context.
    ///
    /// Never fails: problems are reported through the returned evaluation,
    /// whose value is then `default`.
    pub fn get_evaluation<T: Evaluable>(&self, flag_path: &str, default: T) -> Evaluation<T> {
        let resolution = self.inner.active();
        let context = self.get_context();
        let evaluation = resolution.evaluate(flag_path, default, &context, Some(&*self.inner.applier));
        self.inner.telemetry.record(&evaluation);
        evaluation
    }

    /// Like [`get_evaluation`](Self::get_evaluation) but returns only the value.
    pub fn get_value<T: Evaluable>(&self, flag_path: &str, default: T) -> T {
        self.get_evaluation(flag_path, default).value
    }

    /// Sends a custom event carrying `data` and the current context.
    ///
    /// # Errors
    /// Returns [`ConfidenceError::InvalidContextInMessage`] if `data`
    /// contains the reserved `"context"` key.
    pub fn track(&self, event_name: impl Into<String>, data: Struct) -> ConfidenceResult<()> {
        let payload = event_payload(data, self.get_context())?;
        let record = Record::event(event_name, payload, self.inner.clock.now_iso_string());
        match &self.inner.sender {
            Some(sender) => sender.send(record),
            None => debug!("no event sender configured, event not recorded"),
        }
        Ok(())
    }

    /// Asks the event pipeline to seal and upload what it holds.
    pub fn flush(&self) {
        if let Some(sender) = &self.inner.sender {
            sender.send(Record::manual_flush(self.inner.clock.now_iso_string()));
        }
    }

    /// Evaluation counters since the last call, shared with child sessions.
    #[must_use]
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot_and_reset()
    }
}

/// Configures and builds a [`Confidence`] session.
pub struct ConfidenceBuilder {
    client_secret: String,
    context: Struct,
    resolver: Option<Arc<dyn ResolveClient>>,
    snapshot_storage: Option<Arc<dyn ByteStorage>>,
    visitor_storage: Option<Arc<dyn ByteStorage>>,
    sender: Option<Arc<EventSender>>,
    clock: Option<Arc<dyn Clock>>,
    runtime: Option<Handle>,
}

impl ConfidenceBuilder {
    fn new(client_secret: impl Into<String>) -> Self {
        Self {
            client_secret: client_secret.into(),
            context: Struct::new(),
            resolver: None,
            snapshot_storage: None,
            visitor_storage: None,
            sender: None,
            clock: None,
            runtime: None,
        }
    }

    /// Initial context entries.
    #[must_use]
    pub fn context(mut self, context: Struct) -> Self {
        self.context = context;
        self
    }

    /// Backend used to resolve flags. Required.
    #[must_use]
    pub fn resolve_client(mut self, client: Arc<dyn ResolveClient>) -> Self {
        self.resolver = Some(client);
        self
    }

    /// Storage for the resolution snapshot. Defaults to memory.
    #[must_use]
    pub fn snapshot_storage(mut self, storage: Arc<dyn ByteStorage>) -> Self {
        self.snapshot_storage = Some(storage);
        self
    }

    /// Storage for the visitor id. When set, the id is added to the context
    /// under `"visitor_id"`.
    #[must_use]
    pub fn visitor_storage(mut self, storage: Arc<dyn ByteStorage>) -> Self {
        self.visitor_storage = Some(storage);
        self
    }

    /// Pipeline receiving apply records and custom events.
    #[must_use]
    pub fn event_sender(mut self, sender: Arc<EventSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Clock stamping records. Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Runtime fetches run on. Defaults to the runtime `build` is called from.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the session and loads the persisted snapshot as its cache.
    ///
    /// # Errors
    /// Returns [`ConfidenceError::Internal`] if the client secret is empty, no
    /// resolve client was set, or no tokio runtime is available.
    pub fn build(self) -> ConfidenceResult<Confidence> {
        if self.client_secret.trim().is_empty() {
            return Err(ConfidenceError::internal("client secret must not be empty"));
        }
        let resolver = self
            .resolver
            .ok_or_else(|| ConfidenceError::internal("a resolve client is required"))?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| ConfidenceError::internal(format!("no tokio runtime available: {e}")))?,
        };

        let storage = self
            .snapshot_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let snapshots = SnapshotStore::new(storage);
        let initial = snapshots.load().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read resolution snapshot, starting empty");
            Resolution::empty()
        });

        let mut context = self.context;
        if let Some(storage) = &self.visitor_storage {
            let id = visitor::get_or_create(storage.as_ref());
            context.insert(visitor::VISITOR_ID_CONTEXT_KEY.to_string(), Value::String(id));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let applier = Arc::new(ApplyTracker::new(self.sender.clone(), Arc::clone(&clock)));
        let inner = Inner {
            client_secret: self.client_secret,
            context: Arc::new(ContextManager::new(context, None)),
            resolver,
            snapshots,
            cache: RwLock::new(Arc::new(initial)),
            tasks: TaskManager::new(runtime),
            gate: Mutex::new(()),
            sender: self.sender,
            applier,
            clock,
            telemetry: Arc::new(Telemetry::default()),
        };
        Ok(Confidence { inner: Arc::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::resolution::{ResolveReason, ResolvedFlag};
    use crate::value::TARGETING_KEY;

    /// Echoes the targeting key back as the variant.
    #[derive(Default)]
    struct EchoResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResolveClient for EchoResolver {
        async fn resolve(&self, context: &Struct, _cancel: &CancellationToken) -> ConfidenceResult<ResolveResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let key = context
                .get(TARGETING_KEY)
                .and_then(Value::as_string)
                .unwrap_or("none")
                .to_string();
            let mut value = Struct::new();
            value.insert("user".into(), Value::String(key.clone()));
            Ok(ResolveResponse {
                resolved_flags: vec![ResolvedFlag::matched("flag", key, value)],
                resolve_token: format!("tok{n}"),
            })
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl ResolveClient for FailingResolver {
        async fn resolve(&self, _context: &Struct, _cancel: &CancellationToken) -> ConfidenceResult<ResolveResponse> {
            Err(ConfidenceError::resolve("offline"))
        }
    }

    fn session(resolver: Arc<dyn ResolveClient>) -> Confidence {
        Confidence::builder("secret").resolve_client(resolver).build().unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_secret_and_resolver() {
        let err = Confidence::builder("").resolve_client(Arc::new(FailingResolver)).build().unwrap_err();
        assert!(matches!(err, ConfidenceError::Internal { .. }));
        let err = Confidence::builder("secret").build().unwrap_err();
        assert!(matches!(err, ConfidenceError::Internal { .. }));
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let err = Confidence::builder("secret")
            .resolve_client(Arc::new(FailingResolver))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("runtime"));
    }

    #[tokio::test]
    async fn test_put_context_and_wait_activates() {
        let confidence = session(Arc::new(EchoResolver::default()));
        confidence.put_context_and_wait(TARGETING_KEY, "u1").await;

        let eval = confidence.get_evaluation("flag.user", String::new());
        assert_eq!(eval.value, "u1");
        assert_eq!(eval.reason, ResolveReason::Match);
        assert!(!confidence.is_storage_empty().unwrap());
    }

    #[tokio::test]
    async fn test_local_put_makes_cache_stale() {
        let confidence = session(Arc::new(EchoResolver::default()));
        confidence.put_context_and_wait(TARGETING_KEY, "u1").await;

        let mut entries = Struct::new();
        entries.insert(TARGETING_KEY.into(), Value::from("u2"));
        confidence.put_context_local(entries, &[]);

        let eval = confidence.get_evaluation("flag.user", "default".to_string());
        assert_eq!(eval.value, "default");
        assert_eq!(eval.reason, ResolveReason::Stale);
        assert_eq!(confidence.telemetry_snapshot().stale_accesses, 1);
        assert_eq!(confidence.telemetry_snapshot().stale_accesses, 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_cache() {
        let storage: Arc<dyn ByteStorage> = Arc::new(MemoryStorage::new());
        let good = Confidence::builder("secret")
            .resolve_client(Arc::new(EchoResolver::default()))
            .snapshot_storage(Arc::clone(&storage))
            .context(Struct::from([(TARGETING_KEY.to_string(), Value::from("u1"))]))
            .build()
            .unwrap();
        good.fetch_and_activate().await.unwrap();

        let bad = Confidence::builder("secret")
            .resolve_client(Arc::new(FailingResolver))
            .snapshot_storage(storage)
            .context(Struct::from([(TARGETING_KEY.to_string(), Value::from("u1"))]))
            .build()
            .unwrap();
        let err = bad.fetch_and_activate().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(bad.get_value("flag.user", String::new()), "u1");
    }

    #[tokio::test]
    async fn test_async_fetch_persists_without_activating() {
        let confidence = Confidence::builder("secret")
            .resolve_client(Arc::new(EchoResolver::default()))
            .context(Struct::from([(TARGETING_KEY.to_string(), Value::from("u1"))]))
            .build()
            .unwrap();

        confidence.async_fetch().await.unwrap();
        assert!(confidence.active_resolution().is_empty());
        assert!(!confidence.is_storage_empty().unwrap());

        confidence.activate().unwrap();
        assert_eq!(confidence.get_value("flag.user", String::new()), "u1");
    }

    #[tokio::test]
    async fn test_track_rejects_context_key() {
        let confidence = session(Arc::new(EchoResolver::default()));
        let data = Struct::from([("context".to_string(), Value::Null)]);
        assert!(matches!(
            confidence.track("click", data),
            Err(ConfidenceError::InvalidContextInMessage)
        ));
        assert!(confidence.track("click", Struct::new()).is_ok());
    }

    #[tokio::test]
    async fn test_visitor_id_in_context() {
        let visitor_storage: Arc<dyn ByteStorage> = Arc::new(MemoryStorage::new());
        let confidence = Confidence::builder("secret")
            .resolve_client(Arc::new(EchoResolver::default()))
            .visitor_storage(Arc::clone(&visitor_storage))
            .build()
            .unwrap();
        let id = confidence.get_context()[visitor::VISITOR_ID_CONTEXT_KEY].clone();
        assert_eq!(id.as_string().map(str::len), Some(36));
        assert_eq!(visitor::get_or_create(visitor_storage.as_ref()), id.as_string().unwrap());
    }
}
