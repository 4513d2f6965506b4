//! # Bujo Sync Testkit
//!
//! Test utilities for the bujo sync engine.
//!
//! This crate provides:
//! - Entity fixtures with fixed, readable timestamps
//! - Builders for remote rows as a pull query returns them
//! - Property-based test generators using proptest
//! - Opt-in tracing output for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bujo_sync_testkit::prelude::*;
//!
//! #[test]
//! fn pulls_a_task() {
//!     let row = RowBuilder::task(task_id, "plan week").revision(7).build();
//!     // ... feed the row to a transport
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod tracing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::tracing::*;
}

pub use fixtures::*;
pub use generators::*;
