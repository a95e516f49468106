//! HabitCore - sync engine for a multi-device habit and attendance tracker.
//!
//! This library provides the core functionality for syncing a household's
//! habit calendar across devices through a dumb remote blob:
//! - Data model (day records, exercise sessions, diary, finance, meta)
//! - Deterministic payload merge (tombstones, session union, attendance OR)
//! - Passphrase-sealed encryption envelope (PBKDF2 + AES-256-GCM)
//! - Blob transport against a signed-URL proxy
//! - Sync controller (dirty/push/pull state machine with edit soft-locks)
//!
//! The remote never sees plaintext: payloads are sealed client-side and the
//! proxy only signs upload/download URLs for an opaque object.

pub mod config;
pub mod envelope;
pub mod error;
pub mod merge;
pub mod model;
pub mod store;
pub mod sync_controller;
pub mod transport;
pub mod validation;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use model::{ActivityRecord, DayRecord, Diary, ExerciseBlock, ExerciseSession, Finance, Meta, Payload};
pub use store::{JsonFileStore, MemoryStore, ReplicaStore};
pub use sync_controller::{PullOutcome, PushOutcome, SyncController};
pub use transport::{BlobTransport, Descriptor, Download, HttpBlobTransport};
