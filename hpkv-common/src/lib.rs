// hpkv-common - Shared wire types for the HPKV persistent-connection protocol
//
// This crate defines the frames exchanged between client and server and the
// tagged value encoding used at the API boundary.

pub mod error;
pub mod protocol;
pub mod value;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use value::*;
