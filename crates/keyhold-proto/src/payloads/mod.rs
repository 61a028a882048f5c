//! Request and response payloads.
//!
//! Field names are snake_case on the wire. Optional collections default to
//! empty so older clients can omit them.

pub mod bundle;
pub mod sender_key;
