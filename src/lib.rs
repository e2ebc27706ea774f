#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! aimacro replays recorded desktop macros: input events, OCR/vision
//! queries, on-screen template searches, conditions and jumps.
//!
//! Modules:
//! - `events`: the line grammar of a macro (parse and render).
//! - `engine`: per-event execution, the run loop, and the collaborator traits.
//! - `pattern`: template matching and the bounded on-screen search.
//! - `document`: the saved macro file and the shared, editable event list.
//! - `config`: configuration models, loader, and schema helpers.
//! - `utils`: image encoding helpers.
//!
//! Use `aimacro::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, schema helpers).
pub mod config;
/// Public module: saved macros and the shared event list.
pub mod document;
/// Public module: execution engine and run loop.
pub mod engine;
/// Public module: event grammar.
pub mod events;
/// Public module: pattern search.
pub mod pattern;
/// Public module: utilities (image encoding).
pub mod utils;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a level name (trace|debug|info|warn|error).
pub fn parse_level(name: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match name.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) at `info`, or whatever `RUST_LOG` names.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    init_tracing_with_default(tracing::Level::INFO);
}

/// Initialize tracing, falling back to `default` when `RUST_LOG` is unset or
/// not a plain level name.
pub fn init_tracing_with_default(default: tracing::Level) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(default);
    init_tracing_at(level);
}

/// Initialize tracing at exactly `level`, ignoring `RUST_LOG`.
pub fn init_tracing_at(level: tracing::Level) {
    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use aimacro::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use std::time::Duration;

    // External crates (namespaced) if callers want direct access
    pub use crate as aimacro;
    pub use enigo;

    // Frequently used items
    pub use crate::document::{MacroDocument, SharedMacro};
    pub use crate::engine::{
        Collaborators, Engine, EngineOptions, MacroSource, RunFlag, RunLoop, RunOutcome, RunSummary, VarValue,
        VariableStore,
    };
    pub use crate::events::{Event, ParsedLine, parse_line};
    pub use crate::{config, document, engine, events, pattern, utils};
}
