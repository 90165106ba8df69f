//! Tree ensemble representation for binary scoring.
//!
//! [`Tree`] stores nodes in flat parallel arrays (root = node 0); [`Forest`]
//! sums leaf values over its trees on top of a base score, producing the raw
//! margin the output transform turns into a probability.

/// Node index local to one tree.
pub type NodeId = u32;

// ============================================================================
// TreeValidationError
// ============================================================================

/// Structural validation errors for [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeValidationError {
    #[error("tree has no nodes")]
    EmptyTree,
    #[error("node arrays disagree in length: expected {expected}, `{array}` has {actual}")]
    LengthMismatch {
        array: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("node {node} has {side} child {child} but the tree has {n_nodes} nodes")]
    ChildOutOfBounds {
        node: NodeId,
        side: &'static str,
        child: NodeId,
        n_nodes: usize,
    },
    #[error("node {node} references itself")]
    SelfLoop { node: NodeId },
    #[error("node {node} is reachable by more than one path")]
    DuplicateVisit { node: NodeId },
    #[error("node {node} is unreachable from the root")]
    UnreachableNode { node: NodeId },
}

// ============================================================================
// Tree
// ============================================================================

/// Structure-of-Arrays regression tree with numeric splits.
///
/// A sample goes left when `value < threshold`; missing values (NaN) follow
/// the node's default direction.
#[derive(Debug, Clone)]
pub struct Tree {
    split_indices: Box<[u32]>,
    split_thresholds: Box<[f32]>,
    left_children: Box<[NodeId]>,
    right_children: Box<[NodeId]>,
    default_left: Box<[bool]>,
    is_leaf: Box<[bool]>,
    leaf_values: Box<[f32]>,
}

impl Tree {
    /// Build a tree from parallel arrays and validate its structure.
    ///
    /// Entries of the split arrays are ignored for leaves and
    /// `leaf_values` is ignored for split nodes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        split_indices: Vec<u32>,
        split_thresholds: Vec<f32>,
        left_children: Vec<NodeId>,
        right_children: Vec<NodeId>,
        default_left: Vec<bool>,
        is_leaf: Vec<bool>,
        leaf_values: Vec<f32>,
    ) -> Result<Self, TreeValidationError> {
        let tree = Self {
            split_indices: split_indices.into(),
            split_thresholds: split_thresholds.into(),
            left_children: left_children.into(),
            right_children: right_children.into(),
            default_left: default_left.into(),
            is_leaf: is_leaf.into(),
            leaf_values: leaf_values.into(),
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Single-leaf tree.
    pub fn leaf(value: f32) -> Self {
        Self {
            split_indices: Box::new([0]),
            split_thresholds: Box::new([0.0]),
            left_children: Box::new([0]),
            right_children: Box::new([0]),
            default_left: Box::new([false]),
            is_leaf: Box::new([true]),
            leaf_values: Box::new([value]),
        }
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.is_leaf.len()
    }

    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.is_leaf[node as usize]
    }

    #[inline]
    pub fn split_index(&self, node: NodeId) -> u32 {
        self.split_indices[node as usize]
    }

    #[inline]
    pub fn split_threshold(&self, node: NodeId) -> f32 {
        self.split_thresholds[node as usize]
    }

    #[inline]
    pub fn left_child(&self, node: NodeId) -> NodeId {
        self.left_children[node as usize]
    }

    #[inline]
    pub fn right_child(&self, node: NodeId) -> NodeId {
        self.right_children[node as usize]
    }

    #[inline]
    pub fn default_left(&self, node: NodeId) -> bool {
        self.default_left[node as usize]
    }

    #[inline]
    pub fn leaf_value(&self, node: NodeId) -> f32 {
        self.leaf_values[node as usize]
    }

    /// Largest feature index any split reads, if the tree has splits.
    pub fn max_split_index(&self) -> Option<u32> {
        (0..self.n_nodes() as NodeId)
            .filter(|&n| !self.is_leaf(n))
            .map(|n| self.split_index(n))
            .max()
    }

    /// Walk from the root to the leaf `features` falls into.
    ///
    /// `features` must cover every split index; see [`max_split_index`](Self::max_split_index).
    #[inline]
    pub fn traverse_to_leaf(&self, features: &[f32]) -> NodeId {
        let mut node = 0;
        while !self.is_leaf(node) {
            let fvalue = features[self.split_index(node) as usize];
            node = if fvalue.is_nan() {
                if self.default_left(node) {
                    self.left_child(node)
                } else {
                    self.right_child(node)
                }
            } else if fvalue < self.split_threshold(node) {
                self.left_child(node)
            } else {
                self.right_child(node)
            };
        }
        node
    }

    /// Leaf value for one row.
    #[inline]
    pub fn predict_row(&self, features: &[f32]) -> f32 {
        self.leaf_value(self.traverse_to_leaf(features))
    }

    /// Validate basic structural invariants: consistent array lengths, in-range
    /// children, no cycles or shared nodes, every node reachable.
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        let n_nodes = self.n_nodes();
        if n_nodes == 0 {
            return Err(TreeValidationError::EmptyTree);
        }
        for (array, actual) in [
            ("split_indices", self.split_indices.len()),
            ("split_thresholds", self.split_thresholds.len()),
            ("left_children", self.left_children.len()),
            ("right_children", self.right_children.len()),
            ("default_left", self.default_left.len()),
            ("leaf_values", self.leaf_values.len()),
        ] {
            if actual != n_nodes {
                return Err(TreeValidationError::LengthMismatch {
                    array,
                    expected: n_nodes,
                    actual,
                });
            }
        }

        // Trees are acyclic with single parents, so a plain DFS visits each
        // node exactly once; a second visit means a cycle or a shared child.
        let mut visited = vec![false; n_nodes];
        let mut stack: Vec<NodeId> = vec![0];
        while let Some(node) = stack.pop() {
            let idx = node as usize;
            if visited[idx] {
                return Err(TreeValidationError::DuplicateVisit { node });
            }
            visited[idx] = true;

            if self.is_leaf(node) {
                continue;
            }
            for (side, child) in [("left", self.left_child(node)), ("right", self.right_child(node))] {
                if child == node {
                    return Err(TreeValidationError::SelfLoop { node });
                }
                if child as usize >= n_nodes {
                    return Err(TreeValidationError::ChildOutOfBounds {
                        node,
                        side,
                        child,
                        n_nodes,
                    });
                }
                stack.push(child);
            }
        }

        match visited.iter().position(|v| !v) {
            Some(i) => Err(TreeValidationError::UnreachableNode { node: i as NodeId }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Forest
// ============================================================================

/// Additive tree ensemble with a single output.
///
/// DART models carry one weight per tree; plain gbtree models weigh every
/// tree by one.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    trees: Vec<Tree>,
    weights: Option<Vec<f32>>,
    base_score: f32,
}

impl Forest {
    pub fn new(base_score: f32) -> Self {
        Self {
            trees: Vec::new(),
            weights: None,
            base_score,
        }
    }

    /// Add a tree with unit weight.
    pub fn push_tree(&mut self, tree: Tree) {
        if let Some(w) = self.weights.as_mut() {
            w.push(1.0);
        }
        self.trees.push(tree);
    }

    /// Set per-tree weights (DART).
    ///
    /// # Panics
    ///
    /// Panics if the number of weights differs from the number of trees.
    pub fn with_tree_weights(mut self, weights: Vec<f32>) -> Self {
        assert_eq!(weights.len(), self.trees.len(), "one weight per tree");
        self.weights = Some(weights);
        self
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn base_score(&self) -> f32 {
        self.base_score
    }

    pub fn trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.iter()
    }

    /// Largest feature index any tree reads.
    pub fn max_split_index(&self) -> Option<u32> {
        self.trees.iter().filter_map(Tree::max_split_index).max()
    }

    /// Raw margin for one row.
    pub fn predict_margin(&self, features: &[f32]) -> f32 {
        match &self.weights {
            Some(w) => self
                .trees
                .iter()
                .zip(w)
                .fold(self.base_score, |acc, (t, &w)| acc + w * t.predict_row(features)),
            None => self
                .trees
                .iter()
                .fold(self.base_score, |acc, t| acc + t.predict_row(features)),
        }
    }
}
