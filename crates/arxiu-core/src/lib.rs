//! Core types and trait definitions for the arxiu genealogy workspace.
//!
//! This crate is deliberately free of HTTP and database dependencies. Every
//! other crate depends on it: the data model, the normalisation rules shared by
//! the search index and the matching engine, the draft state machine, and the
//! async store traits implemented by storage backends.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod banner;
pub mod connection;
pub mod credit;
pub mod draft;
pub mod error;
pub mod group;
pub mod import;
pub mod matching;
pub mod notification;
pub mod search;
pub mod store;
pub mod tree;
pub mod user;

pub use error::{Error, Result};
