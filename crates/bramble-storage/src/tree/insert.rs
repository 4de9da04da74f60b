//! Insertion and node splitting for all tree variants.
//!
//! Insertion is top-down and proactive: a full child is split (or, for the
//! B* variants, first relieved by sibling key sharing) before descending,
//! so the recursion never has to revisit ancestors.

use super::Tree;
use crate::node::NodePage;
use bramble_common::{BrambleError, Result, TreeKind};

impl Tree {
    /// Inserts key `k`. Duplicates are permitted.
    pub fn insert(&mut self, k: &[u8]) -> Result<()> {
        self.check_key(k)?;

        let mut root = self.read_root()?;
        if self.is_full(&root) {
            // Grow the tree by one level: a fresh root whose only child is
            // the old root, then split that child.
            let prev_root = root.page_num();
            let mut new_root = self.new_node();
            self.pager_mut().allocate_new_root(&mut new_root)?;
            new_root.set_cursor(0, prev_root);
            let root_num = new_root.page_num();
            self.pager_mut().set_root_page_num(root_num)?;
            self.split_child(&mut new_root, 0, &mut root)?;
            root = new_root;
        }
        self.insert_nonfull(&mut root, k)
    }

    /// Inserts `k` into the subtree under `node`, which must not be full.
    pub(crate) fn insert_nonfull(&mut self, node: &mut NodePage, k: &[u8]) -> Result<()> {
        match self.params().kind {
            TreeKind::BTree | TreeKind::BPlusTree => self.insert_nonfull_classic(node, k),
            TreeKind::BStarTree | TreeKind::BStarPlusTree => self.insert_nonfull_star(node, k),
        }
    }

    fn insert_nonfull_classic(&mut self, node: &mut NodePage, k: &[u8]) -> Result<()> {
        if self.is_full(node) {
            return Err(BrambleError::InvariantViolation(
                "node is full, can't insert",
            ));
        }

        if node.is_leaf() {
            return self.insert_into_leaf(node, k);
        }

        let i = self.descent_index(node, k);
        let mut child = self.read_child(node, i)?;
        if self.is_full(&child) {
            let mut right = self.split_child(node, i, &mut child)?;
            if self.less(node.key(i), k) {
                self.insert_nonfull(&mut right, k)
            } else {
                self.insert_nonfull(&mut child, k)
            }
        } else {
            self.insert_nonfull(&mut child, k)
        }
    }

    fn insert_nonfull_star(&mut self, node: &mut NodePage, k: &[u8]) -> Result<()> {
        if self.is_full(node) {
            return Err(BrambleError::InvariantViolation(
                "node is full, can't insert",
            ));
        }

        if node.is_leaf() {
            return self.insert_into_leaf(node, k);
        }

        let keys_num = node.key_count() as usize;
        let i = self.descent_index(node, k);
        let mut child = self.read_child(node, i)?;
        if !self.is_full(&child) {
            return self.insert_nonfull(&mut child, k);
        }

        // Leaves of the B*+ variant split the B+ way; sibling sharing only
        // delays splits of internal nodes.
        if self.params().kind == TreeKind::BStarPlusTree && child.is_leaf() {
            let mut right = self.split_child(node, i, &mut child)?;
            return if self.less(node.key(i), k) {
                self.insert_nonfull(&mut right, k)
            } else {
                self.insert_nonfull(&mut child, k)
            };
        }

        // Try to push keys into a non-full sibling before splitting.
        let mut left_sibling = None;
        if i > 0 {
            let mut sibling = self.read_child(node, i - 1)?;
            if !self.is_full(&sibling)
                && self.share_keys_left(k, node, i, &mut child, &mut sibling)?
            {
                return Ok(());
            }
            left_sibling = Some(sibling);
        }

        let mut right_sibling = None;
        if i < keys_num {
            let mut sibling = self.read_child(node, i + 1)?;
            if !self.is_full(&sibling)
                && self.share_keys_right(k, node, i, &mut child, &mut sibling)?
            {
                return Ok(());
            }
            right_sibling = Some(sibling);
        }

        // Both donations refused: redistribute two siblings into three.
        if let Some(mut left) = left_sibling {
            let is_short = !self.is_full(&left);
            let mut middle = self.split_children(node, i - 1, &mut left, &mut child, is_short)?;
            if self.less(node.key(i), k) {
                self.insert_nonfull(&mut child, k)
            } else if self.less(node.key(i - 1), k) {
                self.insert_nonfull(&mut middle, k)
            } else {
                self.insert_nonfull(&mut left, k)
            }
        } else {
            let mut right = right_sibling.ok_or(BrambleError::InvariantViolation(
                "internal node has no sibling to split with",
            ))?;
            let is_short = !self.is_full(&right);
            let mut middle = self.split_children(node, i, &mut child, &mut right, is_short)?;
            if self.less(node.key(i + 1), k) {
                self.insert_nonfull(&mut right, k)
            } else if self.less(node.key(i), k) {
                self.insert_nonfull(&mut middle, k)
            } else {
                self.insert_nonfull(&mut child, k)
            }
        }
    }

    /// Shifts larger keys one slot right and places `k` in sort order.
    fn insert_into_leaf(&mut self, node: &mut NodePage, k: &[u8]) -> Result<()> {
        let n = node.key_count() as usize;
        node.set_key_count(n as u16 + 1);
        let mut i = n as i64 - 1;
        while i >= 0 && self.less(k, node.key(i as usize)) {
            node.copy_key_within(i as usize + 1, i as usize);
            i -= 1;
        }
        node.set_key((i + 1) as usize, k);
        self.pager().write_page(node)
    }

    /// Index of the child subtree `k` belongs to: one past the last key
    /// that does not order after `k`.
    fn descent_index(&self, node: &NodePage, k: &[u8]) -> usize {
        let mut i = node.key_count() as i64 - 1;
        while i >= 0 && self.less(k, node.key(i as usize)) {
            i -= 1;
        }
        (i + 1) as usize
    }

    /// Splits the full child at cursor `i_child` of `node`, returning the
    /// new right sibling. Which split runs depends on the variant and on
    /// whether the child is a leaf.
    pub(crate) fn split_child(
        &mut self,
        node: &mut NodePage,
        i_child: usize,
        left: &mut NodePage,
    ) -> Result<NodePage> {
        if self.is_full(node) {
            return Err(BrambleError::InvariantViolation(
                "parent node is full, its child can't be split",
            ));
        }
        if i_child > node.key_count() as usize {
            return Err(BrambleError::invalid("cursor does not exist"));
        }

        match self.params().kind {
            TreeKind::BTree => self.split_child_median(node, i_child, left),
            TreeKind::BPlusTree => {
                if left.is_leaf() {
                    self.split_leaf(node, i_child, left)
                } else {
                    self.split_child_median(node, i_child, left)
                }
            }
            TreeKind::BStarTree => self.split_child_balanced(node, i_child, left),
            TreeKind::BStarPlusTree => {
                if left.is_leaf() {
                    self.split_leaf(node, i_child, left)
                } else {
                    self.split_child_balanced(node, i_child, left)
                }
            }
        }
    }

    /// Classical split: left keeps t-1 keys, right takes t-1, and the
    /// median key is promoted into the parent at `i_child`.
    fn split_child_median(
        &mut self,
        node: &mut NodePage,
        i_child: usize,
        left: &mut NodePage,
    ) -> Result<NodePage> {
        let min = self.params().min_keys as usize;

        let mut right = self.new_node();
        self.pager_mut()
            .allocate(&mut right, min as u16, left.is_leaf())?;
        right.copy_keys_from(left, 0, min + 1, min);
        if !left.is_leaf() {
            right.copy_cursors_from(left, 0, min + 1, min + 1);
        }

        self.link_split_products(node, i_child, &right, left, min)?;
        left.set_key_count(min as u16);

        self.pager().write_page(left)?;
        self.pager().write_page(&right)?;
        self.pager().write_page(node)?;
        Ok(right)
    }

    /// B+ leaf split: no key leaves the data level; the separator promoted
    /// into the parent is a copy of the left half's largest key.
    fn split_leaf(
        &mut self,
        node: &mut NodePage,
        i_child: usize,
        left: &mut NodePage,
    ) -> Result<NodePage> {
        debug_assert!(left.is_leaf());
        let total = left.key_count() as usize;
        let right_n = total / 2;
        let left_n = total - right_n;

        let mut right = self.new_node();
        self.pager_mut().allocate(&mut right, right_n as u16, true)?;
        right.copy_keys_from(left, 0, left_n, right_n);

        self.link_split_products(node, i_child, &right, left, left_n - 1)?;
        left.set_key_count(left_n as u16);

        self.pager().write_page(left)?;
        self.pager().write_page(&right)?;
        self.pager().write_page(node)?;
        Ok(right)
    }

    /// B* single-child split (root splits and other terminal cases):
    /// floor/ceiling partitioning instead of the classical fixed halves.
    fn split_child_balanced(
        &mut self,
        node: &mut NodePage,
        i_child: usize,
        left: &mut NodePage,
    ) -> Result<NodePage> {
        let total = left.key_count() as usize;
        let right_n = total / 2;
        let left_n = total - right_n - 1;

        let mut right = self.new_node();
        self.pager_mut()
            .allocate(&mut right, right_n as u16, left.is_leaf())?;
        right.copy_keys_from(left, 0, left_n + 1, right_n);
        if !left.is_leaf() {
            right.copy_cursors_from(left, 0, left_n + 1, right_n + 1);
        }

        self.link_split_products(node, i_child, &right, left, left_n)?;
        left.set_key_count(left_n as u16);

        self.pager().write_page(left)?;
        self.pager().write_page(&right)?;
        self.pager().write_page(node)?;
        Ok(right)
    }

    /// Makes room in the parent for one separator and the right product's
    /// cursor: shifts cursors and keys after `i_child` one slot right,
    /// links the right child at `i_child + 1` and writes the separator
    /// (a copy of the left child's key at `separator_slot`) at `i_child`.
    fn link_split_products(
        &mut self,
        node: &mut NodePage,
        i_child: usize,
        right: &NodePage,
        left: &NodePage,
        separator_slot: usize,
    ) -> Result<()> {
        let keys_num = node.key_count() as usize + 1;
        node.set_key_count(keys_num as u16);

        for j in ((i_child + 1)..keys_num).rev() {
            node.copy_cursors_within(j + 1, j, 1);
        }
        node.set_cursor(i_child + 1, right.page_num());

        for j in (i_child..keys_num - 1).rev() {
            node.copy_key_within(j + 1, j);
        }
        node.set_key(i_child, left.key(separator_slot));
        Ok(())
    }

    /// Equalizes `child` with its left sibling through the parent
    /// separator, then inserts `k` into whichever of the two now holds its
    /// range. Refuses (returning false) in the edge case where the single
    /// key that would cross the separator lands on the wrong side of `k`.
    fn share_keys_left(
        &mut self,
        k: &[u8],
        node: &mut NodePage,
        i_child: usize,
        child: &mut NodePage,
        left: &mut NodePage,
    ) -> Result<bool> {
        if !self.is_full(child) {
            return Err(BrambleError::InvariantViolation(
                "child that shares keys must be full",
            ));
        }
        if self.is_full(left) {
            return Err(BrambleError::InvariantViolation(
                "receiving sibling must not be full",
            ));
        }
        if i_child > node.key_count() as usize {
            return Err(BrambleError::invalid("cursor does not exist"));
        }

        let child_leaf = child.is_leaf();
        let child_n = child.key_count() as usize;
        let left_n = left.key_count() as usize;

        let sum = child_n + left_n;
        let new_left_n = sum / 2 + sum % 2;
        let moved = new_left_n - left_n;
        let child_keeps = child_n - moved;

        if new_left_n == self.params().max_keys as usize
            && moved == 1
            && self.less(k, child.key(0))
        {
            return Ok(false);
        }

        left.set_key_count(new_left_n as u16);
        left.set_key(left_n, node.key(i_child - 1));
        left.copy_keys_from(child, left_n + 1, 0, moved - 1);
        node.set_key(i_child - 1, child.key(moved - 1));
        if !child_leaf {
            left.copy_cursors_from(child, left_n + 1, 0, moved);
        }

        child.copy_keys_within(0, moved, child_keeps);
        if !child_leaf {
            child.copy_cursors_within(0, moved, child_keeps + 1);
        }
        child.set_key_count(child_keeps as u16);

        self.pager().write_page(left)?;
        self.pager().write_page(child)?;
        self.pager().write_page(node)?;

        if self.less(k, node.key(i_child - 1)) {
            self.insert_nonfull(left, k)?;
        } else {
            self.insert_nonfull(child, k)?;
        }
        Ok(true)
    }

    /// Mirror of `share_keys_left` for the right sibling.
    fn share_keys_right(
        &mut self,
        k: &[u8],
        node: &mut NodePage,
        i_child: usize,
        child: &mut NodePage,
        right: &mut NodePage,
    ) -> Result<bool> {
        if !self.is_full(child) {
            return Err(BrambleError::InvariantViolation(
                "child that shares keys must be full",
            ));
        }
        if self.is_full(right) {
            return Err(BrambleError::InvariantViolation(
                "receiving sibling must not be full",
            ));
        }
        if i_child >= node.key_count() as usize {
            return Err(BrambleError::invalid("right sibling does not exist"));
        }

        let child_leaf = child.is_leaf();
        let child_n = child.key_count() as usize;
        let right_n = right.key_count() as usize;

        let sum = child_n + right_n;
        let new_right_n = sum / 2 + sum % 2;
        let moved = new_right_n - right_n;
        let child_keeps = child_n - moved;

        if new_right_n == self.params().max_keys as usize
            && moved == 1
            && self.less(child.key(child_n - 1), k)
        {
            return Ok(false);
        }

        right.set_key_count(new_right_n as u16);
        for j in (moved..new_right_n).rev() {
            right.copy_key_within(j, j - moved);
        }
        if !child_leaf {
            for j in (moved..=new_right_n).rev() {
                right.copy_cursors_within(j, j - moved, 1);
            }
        }

        right.set_key(moved - 1, node.key(i_child));
        right.copy_keys_from(child, 0, child_keeps + 1, moved - 1);
        if !child_leaf {
            right.copy_cursors_from(child, 0, child_keeps + 1, moved);
        }
        node.set_key(i_child, child.key(child_keeps));

        child.set_key_count(child_keeps as u16);

        self.pager().write_page(child)?;
        self.pager().write_page(right)?;
        self.pager().write_page(node)?;

        if self.less(node.key(i_child), k) {
            self.insert_nonfull(right, k)?;
        } else {
            self.insert_nonfull(child, k)?;
        }
        Ok(true)
    }

    /// B* 2-into-3 split: the keys of two siblings plus their separator
    /// redistribute into three nodes; two separators are written into the
    /// parent and a cursor for the new middle node is linked between the
    /// old two. Returns the new middle node.
    pub(crate) fn split_children(
        &mut self,
        node: &mut NodePage,
        i_left: usize,
        left: &mut NodePage,
        right: &mut NodePage,
        is_short: bool,
    ) -> Result<NodePage> {
        if self.is_full(node) {
            return Err(BrambleError::InvariantViolation(
                "parent node is full, its children can't be split",
            ));
        }
        if i_left >= node.key_count() as usize {
            return Err(BrambleError::invalid("left child cursor does not exist"));
        }

        let is_leaf = left.is_leaf();
        let i_right = i_left + 1;
        let rec = self.params().rec_size as usize;

        let mut middle = self.new_node();
        let middle_keys = self.params().middle_split_keys;
        self.pager_mut().allocate(&mut middle, middle_keys, is_leaf)?;

        let left_n = left.key_count() as usize;
        let right_n = right.key_count() as usize;
        let total = left_n + right_n + 1;

        // Flatten both siblings and the separator into scratch buffers.
        let mut keys = Vec::with_capacity(total * rec);
        for j in 0..left_n {
            keys.extend_from_slice(left.key(j));
        }
        keys.extend_from_slice(node.key(i_left));
        for j in 0..right_n {
            keys.extend_from_slice(right.key(j));
        }
        let mut cursors = Vec::with_capacity(total + 1);
        if !is_leaf {
            for j in 0..=left_n {
                cursors.push(left.cursor(j));
            }
            for j in 0..=right_n {
                cursors.push(right.cursor(j));
            }
        }

        let l_prod = self.params().left_split_keys as usize;
        let m_prod = self.params().middle_split_keys as usize;
        let r_prod = if is_short {
            self.params().right_split_keys as usize - 1
        } else {
            self.params().right_split_keys as usize
        };
        debug_assert_eq!(l_prod + m_prod + r_prod + 2, total);

        let key_at = |idx: usize| &keys[idx * rec..(idx + 1) * rec];
        let fill = |target: &mut NodePage, count: usize, first_key: usize| {
            target.set_key_count(count as u16);
            for j in 0..count {
                target.set_key(j, &keys[(first_key + j) * rec..(first_key + j + 1) * rec]);
            }
            if !is_leaf {
                for j in 0..=count {
                    target.set_cursor(j, cursors[first_key + j]);
                }
            }
        };

        fill(&mut *left, l_prod, 0);
        fill(&mut middle, m_prod, l_prod + 1);
        fill(&mut *right, r_prod, l_prod + m_prod + 2);

        node.set_key(i_left, key_at(l_prod));

        let parent_n = node.key_count() as usize + 1;
        node.set_key_count(parent_n as u16);
        for j in ((i_left + 1)..parent_n).rev() {
            node.copy_key_within(j, j - 1);
        }
        node.set_key(i_right, key_at(l_prod + m_prod + 1));

        for j in ((i_right + 1)..=parent_n).rev() {
            node.copy_cursors_within(j, j - 1, 1);
        }
        node.set_cursor(i_right, middle.page_num());

        self.pager().write_page(left)?;
        self.pager().write_page(&middle)?;
        self.pager().write_page(right)?;
        self.pager().write_page(node)?;
        Ok(middle)
    }
}
