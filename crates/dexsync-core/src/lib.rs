//! Core types and trait definitions for dexsync.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! publishing pipeline, the client sync engine and the SQLite store all depend
//! on it; it owns the wire formats both sides agree on.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod hash;
pub mod layout;
pub mod manifest;
pub mod semver;
pub mod species;
pub mod store;
pub mod tidbit;
pub mod txn;

pub use error::{Error, Result};
