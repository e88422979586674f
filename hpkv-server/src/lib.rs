//! # HPKV Development Server
//!
//! A local stand-in for the remote store. It speaks the same persistent
//! WebSocket protocol as the hosted service over an in-memory map, which makes
//! it useful for the demo binary and end-to-end tests. It is not a production
//! store: nothing is persisted and there is no eviction.

mod server;
mod store;

pub use server::{dispatch, handle_connection, serve, ServerConfig};
pub use store::{MemoryStore, StoreError, StoreResult};
