//! # Confidence - client-side feature-flag engine
//!
//! This crate keeps a local evaluation context, answers flag lookups from a
//! cached snapshot fetched from a remote resolver, and delivers apply and
//! analytics events through a durable on-disk outbox.
//!
//! ## Core Concepts
//!
//! - **Value / Struct**: the tagged-union value model contexts and flag values
//!   are built from, with a canonical order-independent hash
//! - **Resolution**: the immutable result of one fetch, evaluated by dot path
//! - **Confidence**: a session that reconciles context changes with fetches,
//!   cancelling superseded ones
//! - **Outbox / EventSender**: generation-rotated record log and the flush
//!   pipeline that uploads it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confidence::{Confidence, Value, TARGETING_KEY};
//!
//! let confidence = Confidence::builder("client-secret")
//!     .resolve_client(resolver)
//!     .build()?;
//!
//! confidence.put_context_and_wait(TARGETING_KEY, "user-1").await;
//! let size: i64 = confidence.get_value("checkout.button.size", 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod hash;
pub mod time;
pub mod value;

pub mod resolution;

pub mod engine;
pub mod outbox;
pub mod sender;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use engine::{
    CancellationToken, Confidence, ConfidenceBuilder, FetchOutcome, ResolveClient, ResolveResponse, TaskManager,
    TelemetrySnapshot,
};
pub use error::{ConfidenceError, ConfidenceResult, ErrorCode, StorageError, UploadError};
pub use hash::{hash_context, hash_value};
pub use outbox::{FileOutbox, GenerationId, MemoryOutbox, Outbox, OutboxConfig};
pub use resolution::{Evaluable, Evaluation, FlagApplier, FlagPath, Resolution, ResolveReason, ResolvedFlag};
pub use sender::{
    cleanup_for_status, EventSender, EventSenderConfig, FlushPolicy, ManualFlushPolicy, Record, SenderStats,
    SizeFlushPolicy, UploadClient,
};
pub use storage::{ByteStorage, FileStorage, MemoryStorage, SnapshotStore};
pub use time::{Clock, FixedClock, SystemClock};
pub use value::{Struct, Value, ValueType, TARGETING_KEY};
