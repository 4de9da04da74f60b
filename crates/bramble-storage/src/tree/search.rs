//! Equality search and multi-match search for all tree variants.
//!
//! Both operations reset and then track the maximum depth reached, which
//! the indexer reports as telemetry. The B+ family ignores matches in
//! internal nodes: those keys are separators, not data.

use super::Tree;
use crate::node::NodePage;
use bytes::Bytes;
use bramble_common::Result;

impl Tree {
    /// Finds the first occurrence of `k` and returns a copy of the stored
    /// record, or `None` if the key is absent.
    pub fn search(&mut self, k: &[u8]) -> Result<Option<Bytes>> {
        self.check_key(k)?;
        self.reset_depth();
        let root = self.read_root()?;
        if self.params().kind.leaf_only_data() {
            self.search_leaf_only(k, root, 1)
        } else {
            self.search_classic(k, root, 1)
        }
    }

    /// Collects every occurrence of `k`, in tree order.
    pub fn search_all(&mut self, k: &[u8]) -> Result<Vec<Bytes>> {
        self.check_key(k)?;
        self.reset_depth();
        let mut keys = Vec::new();
        let root = self.read_root()?;
        if self.params().kind.leaf_only_data() {
            self.search_all_leaf_only(k, &mut keys, root, 1)?;
        } else {
            self.search_all_classic(k, &mut keys, root, 1)?;
        }
        Ok(keys)
    }

    fn search_classic(&mut self, k: &[u8], page: NodePage, depth: u32) -> Result<Option<Bytes>> {
        self.note_depth(depth);
        let n = page.key_count() as usize;
        let i = self.lower_bound(&page, k);

        if i < n && self.equal(k, page.key(i)) {
            Ok(Some(Bytes::copy_from_slice(page.key(i))))
        } else if page.is_leaf() {
            Ok(None)
        } else {
            let next = self.read_child(&page, i)?;
            self.search_classic(k, next, depth + 1)
        }
    }

    fn search_leaf_only(&mut self, k: &[u8], page: NodePage, depth: u32) -> Result<Option<Bytes>> {
        self.note_depth(depth);
        let n = page.key_count() as usize;
        let i = self.lower_bound(&page, k);

        if page.is_leaf() {
            if i < n && self.equal(k, page.key(i)) {
                Ok(Some(Bytes::copy_from_slice(page.key(i))))
            } else {
                Ok(None)
            }
        } else {
            let next = self.read_child(&page, i)?;
            self.search_leaf_only(k, next, depth + 1)
        }
    }

    /// Duplicate-aware traversal: within a node, visits every key equal to
    /// `k` and descends both into the child at each equal position and
    /// into the child one past the last of them, so duplicates on either
    /// side of a separator are all found.
    fn search_all_classic(
        &mut self,
        k: &[u8],
        keys: &mut Vec<Bytes>,
        page: NodePage,
        depth: u32,
    ) -> Result<usize> {
        self.note_depth(depth);
        let mut amount = 0;
        let n = page.key_count() as usize;
        let is_leaf = page.is_leaf();

        let first = self.lower_bound(&page, k);
        let mut i = first;
        while i < n && (i == first || self.equal(k, page.key(i))) {
            if self.equal(k, page.key(i)) {
                keys.push(Bytes::copy_from_slice(page.key(i)));
                amount += 1;
            }
            if !is_leaf {
                let next = self.read_child(&page, i)?;
                amount += self.search_all_classic(k, keys, next, depth + 1)?;
            }
            i += 1;
        }

        if !is_leaf {
            let next = self.read_child(&page, i)?;
            amount += self.search_all_classic(k, keys, next, depth + 1)?;
        }
        Ok(amount)
    }

    /// Like the classical traversal, but only leaves contribute matches:
    /// equal keys in internal nodes merely direct the descent.
    fn search_all_leaf_only(
        &mut self,
        k: &[u8],
        keys: &mut Vec<Bytes>,
        page: NodePage,
        depth: u32,
    ) -> Result<usize> {
        self.note_depth(depth);
        let mut amount = 0;
        let n = page.key_count() as usize;
        let is_leaf = page.is_leaf();

        let first = self.lower_bound(&page, k);
        let mut i = first;
        while i < n && (i == first || self.equal(k, page.key(i))) {
            if is_leaf && self.equal(k, page.key(i)) {
                keys.push(Bytes::copy_from_slice(page.key(i)));
                amount += 1;
            }
            if !is_leaf {
                let next = self.read_child(&page, i)?;
                amount += self.search_all_leaf_only(k, keys, next, depth + 1)?;
            }
            i += 1;
        }

        if !is_leaf {
            let next = self.read_child(&page, i)?;
            amount += self.search_all_leaf_only(k, keys, next, depth + 1)?;
        }
        Ok(amount)
    }
}
