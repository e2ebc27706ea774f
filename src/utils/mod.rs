//! Utilities shared by the engine and the pattern search.
//!
//! Submodules:
//! - `imaging`: base64 PNG payloads as stored in macro lines, plus resizing helpers.

pub mod imaging;
