#![forbid(unsafe_code)]
//! e2lookup public API facade.
//!
//! Re-exports the resolver from `e2l-core` through a stable external
//! interface. The CLI and downstream tools depend on this crate.

pub use e2l_core::*;
