//! Internal "plugin" modules (crate-local sub-systems).
//!
//! Regular Rust modules with a stable boundary so the chat services and the
//! CLI can depend on them without tight coupling.

pub mod history;
