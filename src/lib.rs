//! Lode maps Rust types onto relational tables: expressions compile to
//! the SQL dialect of the connection they run on, stores keep one live
//! object per database row and write changes back in batches.
//!
//! Everything lives in `lode-core`; this crate re-exports it whole.

pub use lode_core::*;
