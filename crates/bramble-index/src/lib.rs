//! Name-to-offset record indexing on top of the bramble tree engine.
//!
//! This crate provides:
//! - The fixed-width name/offset key and its comparator
//! - The `Indexer` that builds a tree index over a delimited text file
//!   and answers multi-match name lookups

pub mod indexer;
pub mod key;

pub use indexer::Indexer;
pub use key::{NameComparator, NameKey, NAME_LENGTH, RECORD_SIZE};

pub use bramble_common::{BrambleError, Result, TreeKind};
