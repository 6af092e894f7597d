//! Option Overlay Engine
//!
//! Turns a flat `key.path=value` override string into typed mutations on a
//! nested configuration model:
//! - [`index`]: flattens a model type into case-insensitive dotted keys
//! - [`assign`]: parses an override string and mutates a model in place

pub mod assign;
pub mod index;

pub use assign::{apply, parse_assignments, Assignment};
pub use index::{normalize_key, LeafKind, OptionEntry, OptionIndex, PathSegment};
