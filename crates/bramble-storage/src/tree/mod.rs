//! Disk-resident multi-way search trees.
//!
//! One `Tree` instance owns one file and exposes insert, equality search,
//! search-all, delete-first and delete-all over fixed-size opaque keys.
//! Four closely related variants share the page wrapper and the allocator
//! and differ in their split and rebalance rules:
//!
//! - **B-tree** — data in every node, median-promoting splits.
//! - **B+-tree** — data only in leaves; a leaf split copies its separator
//!   up instead of moving it.
//! - **B*-tree** — a full child first tries to share keys with a sibling;
//!   when both sides are full, two siblings split into three nodes.
//! - **B*+-tree** — B* mechanics on internal nodes, B+ rules for leaves.
//!
//! The variant set is closed, so dispatch is by `TreeKind` rather than by
//! trait objects; all variants go through the same code paths with
//! per-kind branches at the override points.
//!
//! Every mutator walks down from the root reading one page per level,
//! mutates pages in memory and writes each mutated page back individually.
//! There is no page cache: the file is the single source of truth.

mod delete;
mod insert;
mod search;
mod validate;

use crate::node::{NodePage, PageGeometry};
use crate::pager::Pager;
use crate::stream::PageStream;
use bramble_common::layout::FileHeader;
use bramble_common::{BrambleError, Result, TreeConfig, TreeKind};
use std::path::Path;

/// Total-order comparison over opaque fixed-size keys.
///
/// Equality must be consistent with the order: if neither operand is less
/// than the other, they compare equal.
pub trait KeyComparator {
    /// Returns true if `lhs` orders strictly before `rhs`.
    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool;

    /// Returns true if the two keys are equal.
    fn equal(&self, lhs: &[u8], rhs: &[u8]) -> bool;
}

/// Plain lexicographic comparison of the whole record.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteComparator;

impl KeyComparator for ByteComparator {
    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        lhs < rhs
    }

    fn equal(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        lhs == rhs
    }
}

/// Per-node key bounds and split product sizes, derived once from the
/// variant and the order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub kind: TreeKind,
    pub order: u16,
    pub rec_size: u16,
    /// Minimum keys in a non-root node (internal nodes for the leaf-data
    /// variants).
    pub min_keys: u16,
    /// Maximum keys in a non-root internal node.
    pub max_keys: u16,
    /// Minimum keys in a non-root leaf (leaf-data variants only; equals
    /// `min_keys` otherwise).
    pub min_leaf_keys: u16,
    /// Maximum keys in a leaf (leaf-data variants only; equals `max_keys`
    /// otherwise).
    pub max_leaf_keys: u16,
    /// Root capacity for the B*-family; equals `max_keys` otherwise.
    pub max_root_keys: u16,
    /// B* 2-into-3 split: left product key count.
    pub left_split_keys: u16,
    /// B* 2-into-3 split: middle product key count.
    pub middle_split_keys: u16,
    /// B* 2-into-3 split: right product key count (one less in the short
    /// variant).
    pub right_split_keys: u16,
    pub geometry: PageGeometry,
}

impl TreeParams {
    pub(crate) fn new(config: &TreeConfig) -> Result<Self> {
        config.validate()?;
        let t = config.order;
        if config.kind.delayed_split() && t < 3 {
            return Err(BrambleError::invalid(
                "B* variants need an order of at least 3",
            ));
        }

        let (min_keys, max_keys) = match config.kind {
            TreeKind::BTree | TreeKind::BPlusTree => (t - 1, 2 * t - 1),
            TreeKind::BStarTree | TreeKind::BStarPlusTree => ((2 * t - 2) / 3, t),
        };
        let (min_leaf_keys, max_leaf_keys) = match config.kind {
            TreeKind::BTree | TreeKind::BStarTree => (min_keys, max_keys),
            // Leaf minimum is half the leaf capacity, so two minimal
            // leaves always merge into one full leaf.
            TreeKind::BPlusTree => (t, 2 * t),
            TreeKind::BStarPlusTree => ((t + 1) / 2, t + 1),
        };
        let max_root_keys = if config.kind.delayed_split() {
            2 * min_keys
        } else {
            max_keys
        };
        let (left_split_keys, middle_split_keys, right_split_keys) =
            if config.kind.delayed_split() {
                ((2 * t - 1) / 3, 2 * t / 3, (2 * t + 1) / 3)
            } else {
                (0, 0, 0)
            };

        let geometry =
            PageGeometry::new(config.max_node_keys() as usize, config.record_size as usize);

        Ok(Self {
            kind: config.kind,
            order: t,
            rec_size: config.record_size,
            min_keys,
            max_keys,
            min_leaf_keys,
            max_leaf_keys,
            max_root_keys,
            left_split_keys,
            middle_split_keys,
            right_split_keys,
            geometry,
        })
    }
}

/// A disk-resident multi-way search tree over one file.
pub struct Tree {
    params: TreeParams,
    pager: Pager,
    comparator: Box<dyn KeyComparator>,
    max_search_depth: u32,
}

impl Tree {
    /// Creates a new tree file at `path`, overwriting any existing file.
    pub fn create(
        path: impl AsRef<Path>,
        config: TreeConfig,
        comparator: Box<dyn KeyComparator>,
    ) -> Result<Self> {
        let params = TreeParams::new(&config)?;
        let stream = PageStream::create(path)?;
        let header = FileHeader::new(config.order, config.record_size);
        let mut pager = Pager::create(stream, header, params.geometry.page_size)?;

        // The tree starts as a single empty leaf at page 1.
        let mut root = NodePage::new(params.geometry);
        pager.allocate(&mut root, 0, true)?;
        pager.set_root_page_num(root.page_num())?;

        Ok(Self {
            params,
            pager,
            comparator,
            max_search_depth: 0,
        })
    }

    /// Opens an existing tree file. The variant is supplied by the caller;
    /// order and record size come from the file header.
    pub fn open(
        path: impl AsRef<Path>,
        kind: TreeKind,
        comparator: Box<dyn KeyComparator>,
    ) -> Result<Self> {
        let stream = PageStream::open(path)?;
        let header = Pager::read_header(&stream)?;
        let config = TreeConfig::new(kind, header.order, header.record_size)?;
        let params = TreeParams::new(&config)?;
        let pager = Pager::load(stream, params.geometry.page_size)?;
        if pager.root_page_num() == 0 {
            return Err(BrambleError::corrupt("root page is not defined"));
        }
        Ok(Self {
            params,
            pager,
            comparator,
            max_search_depth: 0,
        })
    }

    /// Closes the backing stream. Idempotent; any later operation fails
    /// with `StreamClosed`.
    pub fn close(&mut self) {
        self.pager.close();
    }

    /// Returns true while the backing stream is open.
    pub fn is_open(&self) -> bool {
        self.pager.is_open()
    }

    /// The tree variant.
    pub fn kind(&self) -> TreeKind {
        self.params.kind
    }

    /// The tree order t.
    pub fn order(&self) -> u16 {
        self.params.order
    }

    /// The key record size in bytes.
    pub fn record_size(&self) -> u16 {
        self.params.rec_size
    }

    /// Minimum keys in a non-root node.
    pub fn min_keys(&self) -> u16 {
        self.params.min_keys
    }

    /// Maximum keys in a non-root internal node.
    pub fn max_keys(&self) -> u16 {
        self.params.max_keys
    }

    /// The node page size in bytes.
    pub fn page_size(&self) -> usize {
        self.params.geometry.page_size
    }

    /// Pages ever allocated (the page counter); never decreases.
    pub fn last_page_num(&self) -> u32 {
        self.pager.page_counter()
    }

    /// The current root page number.
    pub fn root_page_num(&self) -> u32 {
        self.pager.root_page_num()
    }

    /// The maximum depth reached during the most recent search or
    /// search-all.
    pub fn max_search_depth(&self) -> u32 {
        self.max_search_depth
    }

    /// Allocates a page directly, bypassing the tree structure. Exposed
    /// for tooling and tests of the recycling allocator.
    pub fn allocate_page(&mut self, key_count: u16, is_leaf: bool) -> Result<u32> {
        let mut node = NodePage::new(self.params.geometry);
        self.pager.allocate(&mut node, key_count, is_leaf)
    }

    /// Pushes a page onto the free stack for later reuse.
    pub fn mark_page_free(&mut self, page_num: u32) -> Result<()> {
        self.pager.mark_free(page_num)
    }

    // ---- internal helpers shared by the operation modules ----

    pub(crate) fn new_node(&self) -> NodePage {
        NodePage::new(self.params.geometry)
    }

    pub(crate) fn read_node(&self, page_num: u32) -> Result<NodePage> {
        let mut node = self.new_node();
        self.pager.read_page(page_num, &mut node)?;
        Ok(node)
    }

    pub(crate) fn read_root(&self) -> Result<NodePage> {
        self.read_node(self.pager.root_page_num())
    }

    /// Loads the child behind cursor `child_num` of `parent`.
    pub(crate) fn read_child(&self, parent: &NodePage, child_num: usize) -> Result<NodePage> {
        if child_num > parent.key_count() as usize {
            return Err(BrambleError::invalid("child index greater than key count"));
        }
        let cursor = parent.cursor(child_num);
        if cursor == 0 {
            return Err(BrambleError::invalid(
                "cursor does not point to an existing page",
            ));
        }
        self.read_node(cursor)
    }

    pub(crate) fn is_root(&self, node: &NodePage) -> bool {
        node.page_num() == self.pager.root_page_num()
    }

    /// Variant-aware fullness test.
    pub(crate) fn is_full(&self, node: &NodePage) -> bool {
        let n = node.key_count();
        match self.params.kind {
            TreeKind::BTree => n == self.params.max_keys,
            TreeKind::BPlusTree => {
                if node.is_leaf() {
                    n == self.params.max_leaf_keys
                } else {
                    n == self.params.max_keys
                }
            }
            TreeKind::BStarTree => {
                if self.is_root(node) {
                    n == self.params.max_root_keys
                } else {
                    n == self.params.max_keys
                }
            }
            TreeKind::BStarPlusTree => {
                if self.is_root(node) {
                    n == self.params.max_root_keys
                } else if node.is_leaf() {
                    n == self.params.max_leaf_keys
                } else {
                    n == self.params.max_keys
                }
            }
        }
    }

    /// First index whose key does not order before `k` (the key count when
    /// every key does).
    pub(crate) fn lower_bound(&self, node: &NodePage, k: &[u8]) -> usize {
        let n = node.key_count() as usize;
        let mut i = 0;
        while i < n && self.comparator.less(node.key(i), k) {
            i += 1;
        }
        i
    }

    pub(crate) fn check_key(&self, k: &[u8]) -> Result<()> {
        if k.len() != self.params.rec_size as usize {
            return Err(BrambleError::invalid(format!(
                "key length {} does not match the record size {}",
                k.len(),
                self.params.rec_size
            )));
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> &TreeParams {
        &self.params
    }

    pub(crate) fn pager(&self) -> &Pager {
        &self.pager
    }

    pub(crate) fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub(crate) fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        self.comparator.less(lhs, rhs)
    }

    pub(crate) fn equal(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        self.comparator.equal(lhs, rhs)
    }

    pub(crate) fn note_depth(&mut self, depth: u32) {
        if depth > self.max_search_depth {
            self.max_search_depth = depth;
        }
    }

    pub(crate) fn reset_depth(&mut self) {
        self.max_search_depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(kind: TreeKind, order: u16, rec: u16) -> TreeParams {
        TreeParams::new(&TreeConfig::new(kind, order, rec).unwrap()).unwrap()
    }

    #[test]
    fn test_btree_params() {
        let p = params(TreeKind::BTree, 2, 1);
        assert_eq!(p.min_keys, 1);
        assert_eq!(p.max_keys, 3);
        assert_eq!(p.max_root_keys, 3);
        assert_eq!(p.geometry.max_keys, 3);
        assert_eq!(p.geometry.page_size, 2 + 3 + 4 * 4);
    }

    #[test]
    fn test_bplus_params() {
        let p = params(TreeKind::BPlusTree, 2, 1);
        assert_eq!(p.min_keys, 1);
        assert_eq!(p.max_keys, 3);
        assert_eq!(p.min_leaf_keys, 2);
        assert_eq!(p.max_leaf_keys, 4);
        assert_eq!(p.geometry.max_keys, 4);
    }

    #[test]
    fn test_bstar_params() {
        let p = params(TreeKind::BStarTree, 4, 1);
        assert_eq!(p.min_keys, 2);
        assert_eq!(p.max_keys, 4);
        assert_eq!(p.max_root_keys, 4);
        assert_eq!(p.left_split_keys, 2);
        assert_eq!(p.middle_split_keys, 2);
        assert_eq!(p.right_split_keys, 3);
        assert_eq!(p.geometry.max_keys, 4);
    }

    #[test]
    fn test_bstar_split_products_cover_two_full_nodes() {
        for t in 3u16..=40 {
            let p = params(TreeKind::BStarTree, t, 1);
            // two full siblings plus their separator redistribute exactly
            let total = 2 * p.max_keys + 1;
            assert_eq!(
                p.left_split_keys + p.middle_split_keys + p.right_split_keys + 2,
                total,
                "order {t}"
            );
        }
    }

    #[test]
    fn test_bstarplus_params() {
        let p = params(TreeKind::BStarPlusTree, 4, 1);
        assert_eq!(p.min_keys, 2);
        assert_eq!(p.max_keys, 4);
        assert_eq!(p.min_leaf_keys, 2);
        assert_eq!(p.max_leaf_keys, 5);
        assert_eq!(p.max_root_keys, 4);
        assert_eq!(p.geometry.max_keys, 5);
    }

    #[test]
    fn test_bstarplus_leaf_merge_fits() {
        for t in 3u16..=40 {
            let p = params(TreeKind::BStarPlusTree, t, 1);
            assert!(2 * p.min_leaf_keys <= p.max_leaf_keys, "order {t}");
            assert!(p.max_leaf_keys as usize <= p.geometry.max_keys, "order {t}");
        }
    }

    #[test]
    fn test_bstar_small_order_rejected() {
        assert!(TreeParams::new(&TreeConfig::new(TreeKind::BStarTree, 2, 1).unwrap()).is_err());
        assert!(
            TreeParams::new(&TreeConfig::new(TreeKind::BStarPlusTree, 1, 1).unwrap()).is_err()
        );
    }

    #[test]
    fn test_byte_comparator() {
        let c = ByteComparator;
        assert!(c.less(&[1], &[2]));
        assert!(!c.less(&[2], &[2]));
        assert!(c.equal(&[7, 8], &[7, 8]));
        assert!(!c.equal(&[7, 8], &[7, 9]));
    }
}
