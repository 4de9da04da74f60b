//! Configuration types for bramble trees.

use crate::error::{BrambleError, Result};
use crate::layout::MAX_KEYS_NUM;
use serde::{Deserialize, Serialize};

/// The tree variant, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeKind {
    /// Classical B-tree: data in every node, median-promoting splits.
    BTree,
    /// B+-tree: data only in leaves, leaf splits copy the separator up.
    BPlusTree,
    /// B*-tree: sibling key sharing delays splits; 2-into-3 splits.
    BStarTree,
    /// B*+-tree: B* internal mechanics combined with B+ leaf rules.
    BStarPlusTree,
}

impl TreeKind {
    /// True for the variants that keep data only in leaves.
    pub fn leaf_only_data(&self) -> bool {
        matches!(self, TreeKind::BPlusTree | TreeKind::BStarPlusTree)
    }

    /// True for the variants with B*-style delayed internal splits.
    pub fn delayed_split(&self) -> bool {
        matches!(self, TreeKind::BStarTree | TreeKind::BStarPlusTree)
    }
}

impl std::fmt::Display for TreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TreeKind::BTree => "b-tree",
            TreeKind::BPlusTree => "b+tree",
            TreeKind::BStarTree => "b*tree",
            TreeKind::BStarPlusTree => "b*+tree",
        };
        write!(f, "{name}")
    }
}

/// Creation parameters for a tree file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// The tree variant.
    pub kind: TreeKind,
    /// Tree order t.
    pub order: u16,
    /// Key record size in bytes.
    pub record_size: u16,
}

impl TreeConfig {
    /// Creates a config after validating the parameters.
    pub fn new(kind: TreeKind, order: u16, record_size: u16) -> Result<Self> {
        let config = Self {
            kind,
            order,
            record_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the tree parameters against the format bounds.
    pub fn validate(&self) -> Result<()> {
        if self.order < 1 {
            return Err(BrambleError::invalid("tree order can't be less than 1"));
        }
        if self.record_size == 0 {
            return Err(BrambleError::invalid("record size can't be 0"));
        }
        if self.max_node_keys() > MAX_KEYS_NUM as u32 {
            return Err(BrambleError::invalid(format!(
                "order {} exceeds the maximum number of keys per node",
                self.order
            )));
        }
        Ok(())
    }

    /// Physical key capacity of a page for this variant and order.
    ///
    /// This is the count used to compute the page size; per-node logical
    /// bounds are derived separately by the tree.
    pub fn max_node_keys(&self) -> u32 {
        let t = self.order as u32;
        match self.kind {
            TreeKind::BTree => 2 * t - 1,
            TreeKind::BPlusTree => 2 * t,
            TreeKind::BStarTree => t.max(2 * ((2 * t - 2) / 3)),
            TreeKind::BStarPlusTree => (t + 1).max(2 * ((2 * t - 2) / 3)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        assert!(TreeConfig::new(TreeKind::BTree, 2, 1).is_ok());
        assert!(TreeConfig::new(TreeKind::BPlusTree, 50, 92).is_ok());
        assert!(TreeConfig::new(TreeKind::BStarTree, 4, 1).is_ok());
        assert!(TreeConfig::new(TreeKind::BStarPlusTree, 4, 1).is_ok());
    }

    #[test]
    fn test_validate_order_zero() {
        let err = TreeConfig::new(TreeKind::BTree, 0, 1).unwrap_err();
        assert!(matches!(err, BrambleError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_record_size_zero() {
        let err = TreeConfig::new(TreeKind::BTree, 2, 0).unwrap_err();
        assert!(matches!(err, BrambleError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_key_ceiling() {
        // 2t - 1 > 32767 for t = 16385
        let err = TreeConfig::new(TreeKind::BTree, 16385, 1).unwrap_err();
        assert!(matches!(err, BrambleError::InvalidArgument(_)));
        // t = 16384 gives exactly 32767
        assert!(TreeConfig::new(TreeKind::BTree, 16384, 1).is_ok());
    }

    #[test]
    fn test_max_node_keys_per_kind() {
        assert_eq!(TreeConfig::new(TreeKind::BTree, 2, 1).unwrap().max_node_keys(), 3);
        assert_eq!(
            TreeConfig::new(TreeKind::BPlusTree, 2, 1).unwrap().max_node_keys(),
            4
        );
        // t=4: max(4, 2*((8-2)/3)) = max(4, 4) = 4
        assert_eq!(
            TreeConfig::new(TreeKind::BStarTree, 4, 1).unwrap().max_node_keys(),
            4
        );
        // t=10: max(10, 2*6) = 12
        assert_eq!(
            TreeConfig::new(TreeKind::BStarTree, 10, 1).unwrap().max_node_keys(),
            12
        );
        // t=4: max(5, 4) = 5
        assert_eq!(
            TreeConfig::new(TreeKind::BStarPlusTree, 4, 1)
                .unwrap()
                .max_node_keys(),
            5
        );
    }

    #[test]
    fn test_kind_predicates() {
        assert!(!TreeKind::BTree.leaf_only_data());
        assert!(TreeKind::BPlusTree.leaf_only_data());
        assert!(!TreeKind::BPlusTree.delayed_split());
        assert!(TreeKind::BStarTree.delayed_split());
        assert!(TreeKind::BStarPlusTree.leaf_only_data());
        assert!(TreeKind::BStarPlusTree.delayed_split());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TreeKind::BTree.to_string(), "b-tree");
        assert_eq!(TreeKind::BStarPlusTree.to_string(), "b*+tree");
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = TreeConfig::new(TreeKind::BStarTree, 4, 92).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let recovered: TreeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered.kind, TreeKind::BStarTree);
        assert_eq!(recovered.order, 4);
        assert_eq!(recovered.record_size, 92);
    }

    #[test]
    fn test_kind_serde_roundtrip() {
        for kind in [
            TreeKind::BTree,
            TreeKind::BPlusTree,
            TreeKind::BStarTree,
            TreeKind::BStarPlusTree,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let recovered: TreeKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, recovered);
        }
    }
}
