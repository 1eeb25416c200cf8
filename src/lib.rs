//! A read-only client for Icechunk, a transactional, content-addressed
//! storage format for chunked n-dimensional arrays (Zarr v3) backed by
//! cloud object storage.
//!
//! Given a base URL and a reference (branch, tag, or snapshot id), this
//! crate resolves a repository snapshot, locates array chunks through a
//! two-level index (snapshot → manifest → chunk), and serves
//! Zarr-compatible key/value reads: metadata documents and raw chunk
//! bytes. See [`store::Store`] for the primary entry point.
//!
//! Out of scope: HTTP transport itself (see [`transport::Transport`]),
//! write/commit paths, and garbage collection.

pub mod cache;
pub mod envelope;
pub mod error;
mod flatbuf;
pub mod id;
pub mod manifest;
pub mod refs;
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod url;

pub use error::{FormatErrorKind, IcechunkError};
pub use refs::RefSpec;
pub use store::{Store, StoreOptions};
