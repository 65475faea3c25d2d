//! Loro-backed sync between rich-text editor replicas.
//!
//! This crate provides:
//! - `CrdtDocument`: the shared document, its clock, diffs and merges
//! - `translate`: editor operations ⇄ document changes, plus full resync
//! - `Connection`: per-replica clock exchange and change delivery
//! - `ClientSession`: an editor value kept in step with its document
//! - `Coordinator`: several sessions wired together in one process
//! - `codec`: snapshot and plain-object encodings

mod clock;
mod connection;
mod coordinator;
mod diff;
mod document;
mod error;
mod layout;
mod mutator;
mod protocol;
mod session;

pub mod codec;
pub mod config;
pub mod translate;

pub use clock::{ActorId, Clock};
pub use config::{SnapshotEncoding, SyncConfig};
pub use connection::{Connection, ConnectionState, Received};
pub use coordinator::{Coordinator, CoordinatorState, SEED_ACTOR};
pub use diff::{Diff, DiffEntry, diff};
pub use document::{Changes, CrdtDocument};
pub use error::{CrdtError, TranslationError};
pub use layout::NodeObject;
pub use mutator::Mutator;
pub use protocol::{Envelope, Message, Recipient};
pub use session::{ClientSession, NullView, SyncOutcome, View};
pub use translate::{apply_editor_ops, diff_to_editor_ops, resync_from_document};

// Re-export Loro types that consumers need
pub use loro::{LoroDoc, VersionVector};
