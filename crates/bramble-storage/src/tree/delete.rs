//! Deletion and rebalancing for all tree variants.
//!
//! Classical deletion is top-down and proactive: before descending into a
//! child at the minimum key count, the child is refilled by rotating a key
//! from a sibling or merging with one, so the recursion never has to walk
//! back up. The B+ family deletes only in leaves and rebalances only the
//! leaf level; the B* variant replaces the pairwise merge with a
//! three-way merge (two products from three nodes) wherever the underfull
//! child has siblings on both sides.

use super::Tree;
use crate::node::NodePage;
use bramble_common::{BrambleError, Result, TreeKind};

/// Outcome of refilling a child before descending into it.
pub(crate) enum Refill {
    /// Descend into the child (possibly rotated into, or holding a merge
    /// with its right neighbour).
    Child(NodePage),
    /// The child was merged into its left neighbour; descend there.
    MergedLeft(NodePage),
    /// A three-way merge rewrote the parent; re-scan it before
    /// descending.
    Restart,
}

/// One step of delete-in-place: either the key is gone, or a merge pushed
/// it down into `node` at `key_num`.
enum DeleteStep {
    Done,
    Merged { node: NodePage, key_num: usize },
}

impl Tree {
    /// Removes the first occurrence of `k`. Returns false when the key is
    /// absent.
    pub fn remove(&mut self, k: &[u8]) -> Result<bool> {
        self.check_key(k)?;
        if self.params().kind.leaf_only_data() {
            self.remove_leaf_only(k)
        } else {
            self.remove_classic(k)
        }
    }

    /// Removes every occurrence of `k`, returning the count actually
    /// removed.
    pub fn remove_all(&mut self, k: &[u8]) -> Result<usize> {
        self.check_key(k)?;
        let mut amount = 0;
        if !self.params().kind.leaf_only_data() {
            let mut root = self.read_root()?;
            amount = self.remove_all_in(k, &mut root)?;
        }
        // The single pass gives up early in a few corners (and the leaf
        // variants never run it); sweep until the key is gone.
        while self.remove(k)? {
            amount += 1;
        }
        Ok(amount)
    }

    fn remove_classic(&mut self, k: &[u8]) -> Result<bool> {
        let mut page = self.read_root()?;
        loop {
            let n = page.key_count() as usize;
            let i = self.lower_bound(&page, k);

            if i < n && self.equal(k, page.key(i)) {
                return self.remove_by_key_num(i, &mut page);
            }
            if page.is_leaf() {
                return Ok(false);
            }
            match self.refill_child(&mut page, i)? {
                Refill::Child(child) => page = child,
                Refill::MergedLeft(merged) => page = merged,
                Refill::Restart => {}
            }
        }
    }

    /// Deletes the key at slot `key_num` of `page` (which may be at any
    /// level), restoring the search-tree shape as it goes.
    pub(crate) fn remove_by_key_num(&mut self, key_num: usize, page: &mut NodePage) -> Result<bool> {
        let mut step = self.remove_by_key_num_step(key_num, page)?;
        loop {
            match step {
                DeleteStep::Done => return Ok(true),
                DeleteStep::Merged { mut node, key_num } => {
                    step = self.remove_by_key_num_step(key_num, &mut node)?;
                }
            }
        }
    }

    fn remove_by_key_num_step(&mut self, key_num: usize, page: &mut NodePage) -> Result<DeleteStep> {
        let n = page.key_count() as usize;

        if page.is_leaf() {
            for j in key_num..n - 1 {
                page.copy_key_within(j, j + 1);
            }
            page.set_key_count(n as u16 - 1);
            self.pager().write_page(page)?;
            return Ok(DeleteStep::Done);
        }

        let min = self.params().min_keys as usize;

        // Replace the key with its predecessor when the left subtree can
        // spare one, else with its successor from the right subtree.
        let left = self.read_child(page, key_num)?;
        if left.key_count() as usize >= min + 1 {
            let replacement = self.extract_max(left)?;
            page.set_key(key_num, &replacement);
            self.pager().write_page(page)?;
            return Ok(DeleteStep::Done);
        }

        let right = self.read_child(page, key_num + 1)?;
        if right.key_count() as usize >= min + 1 {
            let replacement = self.extract_min(right)?;
            page.set_key(key_num, &replacement);
            self.pager().write_page(page)?;
            return Ok(DeleteStep::Done);
        }

        // Neither side can spare a key: pull the median down into a merge
        // and keep deleting inside the merged child. When the merged node
        // would not fit the page (possible under B* bounds), fall back to
        // the predecessor and accept a transiently light left child.
        let merged_n = left.key_count() as usize + 1 + right.key_count() as usize;
        if merged_n > self.params().geometry.max_keys {
            let replacement = self.extract_max(left)?;
            page.set_key(key_num, &replacement);
            self.pager().write_page(page)?;
            return Ok(DeleteStep::Done);
        }

        let median_pos = left.key_count() as usize;
        let merged = self.merge_children(page, key_num, left, right)?;
        Ok(DeleteStep::Merged {
            node: merged,
            key_num: median_pos,
        })
    }

    /// Extracts and removes the maximum key of the subtree rooted at
    /// `page`.
    fn extract_max(&mut self, mut page: NodePage) -> Result<Vec<u8>> {
        loop {
            if page.is_leaf() {
                let n = page.key_count() as usize;
                let key = page.key(n - 1).to_vec();
                page.set_key_count(n as u16 - 1);
                self.pager().write_page(&page)?;
                return Ok(key);
            }
            let cursor = page.key_count() as usize;
            match self.refill_child(&mut page, cursor)? {
                Refill::Child(child) => page = child,
                Refill::MergedLeft(merged) => page = merged,
                Refill::Restart => {}
            }
        }
    }

    /// Extracts and removes the minimum key of the subtree rooted at
    /// `page`.
    fn extract_min(&mut self, mut page: NodePage) -> Result<Vec<u8>> {
        loop {
            if page.is_leaf() {
                let n = page.key_count() as usize;
                let key = page.key(0).to_vec();
                for j in 0..n - 1 {
                    page.copy_key_within(j, j + 1);
                }
                page.set_key_count(n as u16 - 1);
                self.pager().write_page(&page)?;
                return Ok(key);
            }
            match self.refill_child(&mut page, 0)? {
                Refill::Child(child) => page = child,
                Refill::MergedLeft(merged) => page = merged,
                Refill::Restart => {}
            }
        }
    }

    /// Loads the child at `cursor_num` and, if it sits at the minimum key
    /// count, refills it: rotate from a richer sibling, else merge. The
    /// caller descends into whatever node the result names.
    pub(crate) fn refill_child(
        &mut self,
        parent: &mut NodePage,
        cursor_num: usize,
    ) -> Result<Refill> {
        let keys_num = parent.key_count() as usize;
        let mut child = self.read_child(parent, cursor_num)?;
        let child_n = child.key_count() as usize;
        let min = self.params().min_keys as usize;

        if child_n > min {
            return Ok(Refill::Child(child));
        }

        let mut left_sibling = None;
        if cursor_num >= 1 {
            let mut left = self.read_child(parent, cursor_num - 1)?;
            let left_n = left.key_count() as usize;
            if left_n >= min + 1 {
                // Rotate right: the parent separator drops into the child
                // and the sibling's last key replaces it.
                let new_n = child_n + 1;
                child.set_key_count(new_n as u16);
                child.copy_cursors_within(new_n, new_n - 1, 1);
                for j in (0..new_n - 1).rev() {
                    child.copy_key_within(j + 1, j);
                    child.copy_cursors_within(j + 1, j, 1);
                }
                child.set_key(0, parent.key(cursor_num - 1));
                parent.set_key(cursor_num - 1, left.key(left_n - 1));
                child.copy_cursors_from(&left, 0, left_n, 1);
                left.set_key_count(left_n as u16 - 1);

                self.pager().write_page(&child)?;
                self.pager().write_page(&left)?;
                self.pager().write_page(parent)?;
                return Ok(Refill::Child(child));
            }
            left_sibling = Some(left);
        }

        let mut right_sibling = None;
        if cursor_num < keys_num {
            let mut right = self.read_child(parent, cursor_num + 1)?;
            let right_n = right.key_count() as usize;
            if right_n >= min + 1 {
                // Mirror rotate left.
                let new_n = child_n + 1;
                child.set_key_count(new_n as u16);
                child.set_key(new_n - 1, parent.key(cursor_num));
                parent.set_key(cursor_num, right.key(0));
                child.copy_cursors_from(&right, new_n, 0, 1);
                for j in 0..right_n - 1 {
                    right.copy_key_within(j, j + 1);
                    right.copy_cursors_within(j, j + 1, 1);
                }
                right.copy_cursors_within(right_n - 1, right_n, 1);
                right.set_key_count(right_n as u16 - 1);

                self.pager().write_page(&child)?;
                self.pager().write_page(&right)?;
                self.pager().write_page(parent)?;
                return Ok(Refill::Child(child));
            }
            right_sibling = Some(right);
        }

        // No sibling can donate. The B* variant merges three nodes into
        // two whenever the child has neighbours on both sides.
        if self.params().kind == TreeKind::BStarTree
            && left_sibling.is_some()
            && right_sibling.is_some()
        {
            if let (Some(left), Some(right)) = (left_sibling.take(), right_sibling.take()) {
                self.merge_three(parent, cursor_num - 1, left, child, right)?;
                return Ok(Refill::Restart);
            }
        }

        let capacity = self.params().geometry.max_keys;
        if let Some(left) = left_sibling {
            if left.key_count() as usize + child_n + 1 > capacity {
                // Both at the minimum under B* bounds: a pairwise merge
                // would overflow the page. Descend unrebalanced.
                return Ok(Refill::Child(child));
            }
            let merged = self.merge_children(parent, cursor_num - 1, left, child)?;
            return Ok(Refill::MergedLeft(merged));
        }

        if let Some(right) = right_sibling {
            if child_n + right.key_count() as usize + 1 > capacity {
                return Ok(Refill::Child(child));
            }
            let merged = self.merge_children(parent, cursor_num, child, right)?;
            return Ok(Refill::Child(merged));
        }

        // The root's single child never has siblings; nothing to refill.
        Ok(Refill::Child(child))
    }

    /// Merges `left`, the parent separator at `median_num` and `right`
    /// into `left`; compacts the parent, collapsing the root when it runs
    /// empty. Returns the merged node.
    pub(crate) fn merge_children(
        &mut self,
        parent: &mut NodePage,
        median_num: usize,
        mut left: NodePage,
        right: NodePage,
    ) -> Result<NodePage> {
        let parent_n = parent.key_count() as usize;
        let left_n = left.key_count() as usize;
        let right_n = right.key_count() as usize;
        let merged_n = left_n + 1 + right_n;
        debug_assert!(merged_n <= self.params().geometry.max_keys);

        left.set_key_count(merged_n as u16);
        left.set_key(left_n, parent.key(median_num));
        left.copy_keys_from(&right, left_n + 1, 0, right_n);
        if !left.is_leaf() {
            left.copy_cursors_from(&right, left_n + 1, 0, right_n + 1);
        }

        for j in median_num..parent_n - 1 {
            parent.copy_key_within(j, j + 1);
            parent.copy_cursors_within(j + 1, j + 2, 1);
        }

        self.pager().write_page(&left)?;

        if parent_n == 1 && self.is_root(parent) {
            // the root ran empty: promote the merged child
            let merged_num = left.page_num();
            let old_root = parent.page_num();
            self.pager_mut().set_root_page_num(merged_num)?;
            self.pager_mut().mark_free(old_root)?;
        } else {
            parent.set_key_count(parent_n as u16 - 1);
            self.pager().write_page(parent)?;
        }

        let right_num = right.page_num();
        self.pager_mut().mark_free(right_num)?;
        Ok(left)
    }

    /// B* three-way merge, the mirror image of the 2-into-3 split: the
    /// keys of three siblings and the two separators between them
    /// redistribute into two nodes; one key is promoted back as the
    /// surviving separator and the middle page is freed.
    fn merge_three(
        &mut self,
        parent: &mut NodePage,
        i_left: usize,
        mut left: NodePage,
        middle: NodePage,
        mut right: NodePage,
    ) -> Result<()> {
        let is_leaf = left.is_leaf();
        let rec = self.params().rec_size as usize;
        let parent_n = parent.key_count() as usize;
        debug_assert!(parent_n >= 2);

        let left_n = left.key_count() as usize;
        let middle_n = middle.key_count() as usize;
        let right_n = right.key_count() as usize;
        let total = left_n + middle_n + right_n + 2;

        let mut keys = Vec::with_capacity(total * rec);
        for j in 0..left_n {
            keys.extend_from_slice(left.key(j));
        }
        keys.extend_from_slice(parent.key(i_left));
        for j in 0..middle_n {
            keys.extend_from_slice(middle.key(j));
        }
        keys.extend_from_slice(parent.key(i_left + 1));
        for j in 0..right_n {
            keys.extend_from_slice(right.key(j));
        }
        let mut cursors = Vec::with_capacity(total + 1);
        if !is_leaf {
            for j in 0..=left_n {
                cursors.push(left.cursor(j));
            }
            for j in 0..=middle_n {
                cursors.push(middle.cursor(j));
            }
            for j in 0..=right_n {
                cursors.push(right.cursor(j));
            }
        }

        let new_left_n = total / 2;
        let new_right_n = total - new_left_n - 1;
        debug_assert!(new_left_n <= self.params().geometry.max_keys);
        debug_assert!(new_right_n <= self.params().geometry.max_keys);

        let fill = |target: &mut NodePage, count: usize, first: usize| {
            target.set_key_count(count as u16);
            for j in 0..count {
                target.set_key(j, &keys[(first + j) * rec..(first + j + 1) * rec]);
            }
            if !is_leaf {
                for j in 0..=count {
                    target.set_cursor(j, cursors[first + j]);
                }
            }
        };
        fill(&mut left, new_left_n, 0);
        fill(&mut right, new_right_n, new_left_n + 1);

        parent.set_key(i_left, &keys[new_left_n * rec..(new_left_n + 1) * rec]);
        for j in i_left + 1..parent_n - 1 {
            parent.copy_key_within(j, j + 1);
        }
        for j in i_left + 1..parent_n {
            parent.copy_cursors_within(j, j + 1, 1);
        }
        parent.set_key_count(parent_n as u16 - 1);

        self.pager().write_page(&left)?;
        self.pager().write_page(&right)?;
        self.pager().write_page(parent)?;
        let middle_num = middle.page_num();
        self.pager_mut().mark_free(middle_num)?;
        Ok(())
    }

    /// B+ / B*+ deletion: data lives only in leaves, so the descent
    /// rebalances just the leaf level on its way down.
    fn remove_leaf_only(&mut self, k: &[u8]) -> Result<bool> {
        if self.remove_leaf_only_natural(k)? {
            return Ok(true);
        }
        // Duplicates split across a separator can hide from the natural
        // single descent; retry with the duplicate-aware traversal.
        let root = self.read_root()?;
        self.remove_any_occurrence(k, root)
    }

    fn remove_leaf_only_natural(&mut self, k: &[u8]) -> Result<bool> {
        let min_leaf = self.params().min_leaf_keys as usize;
        let mut page = self.read_root()?;
        loop {
            let n = page.key_count() as usize;
            let i = self.lower_bound(&page, k);

            if page.is_leaf() {
                if i < n && self.equal(k, page.key(i)) {
                    for j in i..n - 1 {
                        page.copy_key_within(j, j + 1);
                    }
                    page.set_key_count(n as u16 - 1);
                    self.pager().write_page(&page)?;
                    return Ok(true);
                }
                return Ok(false);
            }

            let mut next = self.read_child(&page, i)?;
            if self.is_root(&next) || !next.is_leaf() || next.key_count() as usize > min_leaf {
                page = next;
                continue;
            }

            // The leaf we are about to enter is at the minimum: take a key
            // from a richer sibling, else merge two leaves.
            let mut left_sibling = None;
            if i > 0 {
                let mut left = self.read_child(&page, i - 1)?;
                let left_n = left.key_count() as usize;
                if left_n > min_leaf {
                    let next_n = next.key_count() as usize;
                    next.set_key_count(next_n as u16 + 1);
                    for j in (1..=next_n).rev() {
                        next.copy_key_within(j, j - 1);
                    }
                    next.set_key(0, left.key(left_n - 1));
                    left.set_key_count(left_n as u16 - 1);
                    // the separator stays a copy of the donor's largest key
                    page.set_key(i - 1, left.key(left_n - 2));

                    self.pager().write_page(&left)?;
                    self.pager().write_page(&next)?;
                    self.pager().write_page(&page)?;
                    page = next;
                    continue;
                }
                left_sibling = Some(left);
            }

            let mut right_sibling = None;
            if i < n {
                let mut right = self.read_child(&page, i + 1)?;
                let right_n = right.key_count() as usize;
                if right_n > min_leaf {
                    let next_n = next.key_count() as usize;
                    next.set_key_count(next_n as u16 + 1);
                    next.set_key(next_n, right.key(0));
                    // the borrowed key becomes the new separator copy
                    page.set_key(i, right.key(0));
                    for j in 0..right_n - 1 {
                        right.copy_key_within(j, j + 1);
                    }
                    right.set_key_count(right_n as u16 - 1);

                    self.pager().write_page(&next)?;
                    self.pager().write_page(&right)?;
                    self.pager().write_page(&page)?;
                    page = next;
                    continue;
                }
                right_sibling = Some(right);
            }

            if let Some(left) = left_sibling {
                let merged = self.merge_leaves(&mut page, i - 1, left, next)?;
                page = merged;
            } else if let Some(right) = right_sibling {
                let merged = self.merge_leaves(&mut page, i, next, right)?;
                page = merged;
            } else {
                page = next;
            }
        }
    }

    /// Merges two adjacent leaves into the left one. No median comes down:
    /// the separator between leaves is only a copy. Collapses the root
    /// when it runs empty.
    fn merge_leaves(
        &mut self,
        parent: &mut NodePage,
        median_num: usize,
        mut left: NodePage,
        right: NodePage,
    ) -> Result<NodePage> {
        if !left.is_leaf() || !right.is_leaf() {
            return Err(BrambleError::InvariantViolation(
                "only leaves can be merged in a leaf-data tree",
            ));
        }
        let parent_n = parent.key_count() as usize;
        let left_n = left.key_count() as usize;
        let right_n = right.key_count() as usize;
        debug_assert!(left_n + right_n <= self.params().max_leaf_keys as usize);

        left.set_key_count((left_n + right_n) as u16);
        left.copy_keys_from(&right, left_n, 0, right_n);

        for j in median_num..parent_n - 1 {
            parent.copy_key_within(j, j + 1);
            parent.copy_cursors_within(j + 1, j + 2, 1);
        }

        self.pager().write_page(&left)?;

        if parent_n == 1 && self.is_root(parent) {
            let merged_num = left.page_num();
            let old_root = parent.page_num();
            self.pager_mut().set_root_page_num(merged_num)?;
            self.pager_mut().mark_free(old_root)?;
        } else {
            // A non-root parent may legitimately run empty here: the B+
            // descent rebalances only the leaf level, and an empty
            // internal node still routes searches through its cursor 0.
            parent.set_key_count(parent_n as u16 - 1);
            self.pager().write_page(parent)?;
        }

        let right_num = right.page_num();
        self.pager_mut().mark_free(right_num)?;
        Ok(left)
    }

    /// Deletes one occurrence of `k` wherever the duplicate traversal can
    /// reach it, walking the same equal-range children as search-all. No
    /// rebalancing: the touched leaf may be left light, which every other
    /// path tolerates.
    fn remove_any_occurrence(&mut self, k: &[u8], page: NodePage) -> Result<bool> {
        let n = page.key_count() as usize;
        let first = self.lower_bound(&page, k);

        if page.is_leaf() {
            if first < n && self.equal(k, page.key(first)) {
                let mut page = page;
                for j in first..n - 1 {
                    page.copy_key_within(j, j + 1);
                }
                page.set_key_count(n as u16 - 1);
                self.pager().write_page(&page)?;
                return Ok(true);
            }
            return Ok(false);
        }

        let mut i = first;
        loop {
            let child = self.read_child(&page, i)?;
            if self.remove_any_occurrence(k, child)? {
                return Ok(true);
            }
            if i < n && self.equal(k, page.key(i)) {
                i += 1;
            } else {
                return Ok(false);
            }
        }
    }

    /// Single recursive pass of delete-all for the classical variants:
    /// scans the equal range of `k` in this node, deletes in place, and
    /// descends into every child that can still hold occurrences,
    /// reacquiring the root whenever a merge collapses it.
    fn remove_all_in(&mut self, k: &[u8], page: &mut NodePage) -> Result<usize> {
        if page.key_count() == 0 {
            return Ok(0);
        }

        let min = self.params().min_keys as i64;
        let mut amount = 0usize;
        let mut keys_num = page.key_count() as i64;
        let mut treat_as_leaf = page.is_leaf();
        let was_root = self.is_root(page);

        let mut i: i64 = 0;
        while i < keys_num && self.less(page.key(i as usize), k) {
            i += 1;
        }
        let first = i;

        loop {
            let here = i >= 0 && i < keys_num && self.equal(k, page.key(i as usize));
            let before = i > first && i >= 1 && self.equal(k, page.key(i as usize - 1));
            if !(i <= keys_num && (i == first || here || before)) {
                break;
            }

            if here {
                self.remove_by_key_num(i as usize, page)?;
                amount += 1;

                if was_root && !self.is_root(page) {
                    // a merge collapsed the root; rescan from the new one
                    let root_num = self.pager().root_page_num();
                    self.pager().read_page(root_num, page)?;
                    keys_num = page.key_count() as i64;
                    i = 0;
                    continue;
                }

                keys_num = page.key_count() as i64;
                if !self.is_root(page) && keys_num <= min {
                    return Ok(amount);
                }
                continue; // rescan the same slot
            }

            if !treat_as_leaf {
                match self.refill_child(page, i as usize)? {
                    Refill::MergedLeft(mut merged) => {
                        amount += self.remove_all_in(k, &mut merged)?;
                        i -= 1;
                        if (merged.key_count() as i64) <= min {
                            i -= 1;
                        }
                    }
                    Refill::Child(mut child) => {
                        amount += self.remove_all_in(k, &mut child)?;
                        if (child.key_count() as i64) <= min {
                            i -= 1;
                        }
                    }
                    Refill::Restart => {
                        keys_num = page.key_count() as i64;
                        i = 0;
                        continue;
                    }
                }

                if (was_root && !self.is_root(page))
                    || page.key_count() as i64 > keys_num
                {
                    let root_num = self.pager().root_page_num();
                    self.pager().read_page(root_num, page)?;
                    i = -1;
                    treat_as_leaf = true;
                }
                if (page.key_count() as i64) < keys_num {
                    i -= 1;
                }
                keys_num = page.key_count() as i64;
            }

            i += 1;
        }

        Ok(amount)
    }
}
