//! Disk-resident paged multi-way search trees for bramble.
//!
//! This crate provides:
//! - A seekable byte-stream adaptor over one tree file
//! - The page buffer holding a single node's bytes
//! - A paged allocator with LIFO free-page recycling
//! - Four tree variants (B, B+, B*, B*+) behind one `Tree` type
//!
//! Every node is exactly one page; every mutation is persisted to the
//! backing file before the operation returns. Duplicate keys are
//! permitted in all variants.

pub mod node;
pub mod pager;
pub mod stream;
pub mod tree;

pub use node::{NodePage, PageGeometry};
pub use pager::Pager;
pub use stream::PageStream;
pub use tree::{ByteComparator, KeyComparator, Tree};

pub use bramble_common::{BrambleError, Result, TreeConfig, TreeKind};
