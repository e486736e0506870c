//! Consumer side of dexsync: pulls a published release into a [`LocalStore`]
//! chunk by chunk, verifying every file and checkpointing after each chunk so
//! an interrupted sync resumes where it stopped.
//!
//! [`LocalStore`]: dexsync_core::store::LocalStore

#![allow(async_fn_in_trait)]

pub mod config;
pub mod connectivity;
pub mod error;
pub mod migrate;
pub mod retry;
pub mod source;
pub mod sync;
pub mod version;

pub use error::{Error, FetchError, Result, SyncFailureKind};
pub use sync::{StopHandle, SyncEngine, SyncOutcome, SyncReport, SyncSettings, SyncState};
