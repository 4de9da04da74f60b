//! Bramble common types, errors and file-format layout.
//!
//! This crate provides shared definitions used across the bramble storage
//! engine and the record indexer built on top of it.

pub mod config;
pub mod error;
pub mod layout;

pub use config::{TreeConfig, TreeKind};
pub use error::{BrambleError, Result};
pub use layout::{FileHeader, CURSOR_SZ, FIRST_PAGE_OFS, LEAF_NODE_MASK, MAX_KEYS_NUM};
