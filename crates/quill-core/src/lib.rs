//! # Quill Core
//!
//! Identity, progress-tracking and change primitives shared by every layer
//! of the Quill document sync core.
//!
//! ## Key Types
//!
//! - [`ActorId`]: Identifier of a client session, attributes every change to its author
//! - [`Checkpoint`]: `(server_seq, client_seq)` progress marker per (document, actor)
//! - [`Change`] / [`ChangePack`]: Opaque ordered mutations and the bundle pushed or pulled
//! - [`Presence`]: Ephemeral per-client-per-document key/value state
//! - [`ClientInfo`] / [`DocInfo`]: Directory records mutated by the push-pull engine
//! - [`DocumentStatus`]: Lifecycle state machine with an explicit transition table
//! - [`OpContext`]: Deadline and cancellation carried through an operation

pub mod change;
pub mod checkpoint;
pub mod context;
pub mod error;
pub mod ids;
pub mod presence;
pub mod records;
pub mod state;
pub mod status;

// Re-export main types
pub use change::*;
pub use checkpoint::*;
pub use context::*;
pub use error::*;
pub use ids::*;
pub use presence::*;
pub use records::*;
pub use state::*;
pub use status::*;
