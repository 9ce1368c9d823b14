//! Client for Gramps Web servers and the sealed-token box used to store their
//! credentials.
//!
//! The client is read-only: it probes health endpoints and lists people and
//! families, mapping each entry to a small canonical record.

mod client;
pub mod error;
mod mapper;
mod secret;

pub use client::{GrampsClient, GrampsConfig};
pub use error::{Error, Result};
pub use mapper::{RemoteFamily, RemotePerson};
pub use secret::SecretBox;
