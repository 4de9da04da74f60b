//! Structural validation of a tree file, used by tests after mutation
//! sequences.

use super::Tree;
use crate::node::NodePage;
use bramble_common::{BrambleError, Result};

impl Tree {
    /// Walks every reachable node and verifies the structural invariants:
    /// keys sorted per the comparator (ties adjacent), a child cursor per
    /// key boundary on internal nodes, no cursor pointing at the root or
    /// outside the allocated array, and all leaves at the same depth.
    pub fn validate(&self) -> Result<()> {
        let root = self.read_root()?;
        let mut leaf_depth = None;
        self.validate_node(&root, 1, &mut leaf_depth)
    }

    fn validate_node(
        &self,
        node: &NodePage,
        depth: u32,
        leaf_depth: &mut Option<u32>,
    ) -> Result<()> {
        let n = node.key_count() as usize;

        if n > self.params().geometry.max_keys {
            return Err(BrambleError::InvariantViolation(
                "node key count exceeds the page capacity",
            ));
        }
        // Key-count minima are not enforced here: the leaf-only
        // rebalancing of the B+ family and the B* edge cases can leave
        // nodes transiently light, and an empty node still routes
        // searches through its cursor 0.

        for i in 1..n {
            if self.less(node.key(i), node.key(i - 1)) {
                return Err(BrambleError::InvariantViolation(
                    "node keys are not in sorted order",
                ));
            }
        }

        if node.is_leaf() {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if d == depth => {}
                Some(_) => {
                    return Err(BrambleError::InvariantViolation(
                        "leaves are not all at the same depth",
                    ));
                }
            }
            return Ok(());
        }

        for i in 0..=n {
            let cursor = node.cursor(i);
            if cursor == 0 {
                return Err(BrambleError::InvariantViolation(
                    "internal node has a null child cursor",
                ));
            }
            if cursor > self.pager().page_counter() {
                return Err(BrambleError::InvariantViolation(
                    "child cursor points outside the allocated pages",
                ));
            }
            if cursor == self.pager().root_page_num() {
                return Err(BrambleError::InvariantViolation(
                    "child cursor points at the root",
                ));
            }
            let child = self.read_node(cursor)?;
            self.validate_node(&child, depth + 1, leaf_depth)?;
        }
        Ok(())
    }
}
