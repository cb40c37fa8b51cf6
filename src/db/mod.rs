//! Database module for watchpost.
//!
//! Provides SQLite storage with embedded migrations.

mod store;

pub use store::*;
