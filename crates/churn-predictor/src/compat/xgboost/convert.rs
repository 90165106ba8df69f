//! Conversion from XGBoost JSON types to native model types.

use ndarray::Array1;

use crate::model::output::OutputTransform;
use crate::model::tree::{Forest, Tree, TreeValidationError};
use crate::model::linear::LinearModel;

use super::json::{GradientBooster, ModelTrees, Tree as XgbTree, XgbModel};

/// A booster converted from XGBoost.
#[derive(Debug, Clone)]
pub enum Booster {
    /// Gradient boosted trees (gbtree, or dart with per-tree weights).
    Tree(Forest),
    /// Linear booster.
    Linear(LinearModel),
}

impl Booster {
    /// Raw margin for one row.
    #[inline]
    pub fn predict_margin(&self, features: &[f32]) -> f32 {
        match self {
            Booster::Tree(forest) => forest.predict_margin(features),
            Booster::Linear(linear) => linear.predict_margin(features),
        }
    }
}

/// Error type for XGBoost model conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("objective `{0}` is not a binary classification objective")]
    UnsupportedObjective(String),
    #[error("model has {0} output classes; only binary models are supported")]
    Multiclass(i64),
    #[error("tree {0} has no nodes")]
    EmptyTree(usize),
    #[error("tree {tree} declares {declared} nodes but its arrays hold {actual}")]
    NodeCountMismatch {
        tree: usize,
        declared: usize,
        actual: usize,
    },
    #[error(
        "invalid node index in tree {tree}: node {node} references child {child} but tree has {num_nodes} nodes"
    )]
    InvalidNodeIndex {
        tree: usize,
        node: usize,
        child: i32,
        num_nodes: usize,
    },
    #[error("tree {tree} node {node} splits on feature {feature}, model has {num_features} features")]
    SplitFeatureOutOfRange {
        tree: usize,
        node: usize,
        feature: i32,
        num_features: usize,
    },
    #[error("tree {tree} node {node} uses a categorical split, which one-hot inputs never need")]
    CategoricalSplit { tree: usize, node: usize },
    #[error("tree {tree} is malformed: {source}")]
    InvalidTree {
        tree: usize,
        #[source]
        source: TreeValidationError,
    },
    #[error("dart model has {weights} tree weights for {trees} trees")]
    DartWeightsMismatch { weights: usize, trees: usize },
    #[error(
        "gblinear weights length {actual} doesn't match num_features + 1 = {expected}"
    )]
    InvalidLinearWeights { actual: usize, expected: usize },
}

/// Convert base_score from probability space to margin space based on objective.
///
/// XGBoost stores base_score in probability space for logistic objectives,
/// while prediction sums in margin space.
fn prob_to_margin(base_score: f32, objective: &str) -> f32 {
    match objective {
        "binary:logistic" | "reg:logistic" => {
            let p = base_score.clamp(1e-7, 1.0 - 1e-7);
            (p / (1.0 - p)).ln()
        }
        _ => base_score,
    }
}

impl XgbModel {
    /// Output transform implied by the objective.
    pub fn output_transform(&self) -> Result<OutputTransform, ConversionError> {
        let name = &self.learner.objective.name;
        OutputTransform::for_objective(name)
            .ok_or_else(|| ConversionError::UnsupportedObjective(name.clone()))
    }

    /// Convert to a native [`Booster`].
    pub fn to_booster(&self) -> Result<Booster, ConversionError> {
        let param = &self.learner.learner_model_param;
        if param.n_class > 1 {
            return Err(ConversionError::Multiclass(param.n_class));
        }
        let base_margin = prob_to_margin(param.base_score, &self.learner.objective.name);

        match &self.learner.gradient_booster {
            GradientBooster::Gbtree { model } => {
                Ok(Booster::Tree(self.convert_forest(model, base_margin)?))
            }
            GradientBooster::Dart {
                gbtree,
                weight_drop,
            } => {
                let forest = self.convert_forest(&gbtree.model, base_margin)?;
                if weight_drop.len() != forest.n_trees() {
                    return Err(ConversionError::DartWeightsMismatch {
                        weights: weight_drop.len(),
                        trees: forest.n_trees(),
                    });
                }
                Ok(Booster::Tree(forest.with_tree_weights(weight_drop.clone())))
            }
            GradientBooster::Gblinear { model } => {
                Ok(Booster::Linear(self.convert_linear(&model.weights, base_margin)?))
            }
        }
    }

    /// XGBoost stores gblinear weights as `[n_features + 1]` for a single
    /// output, bias last. The margin base score is baked into the bias.
    fn convert_linear(&self, weights: &[f32], base_margin: f32) -> Result<LinearModel, ConversionError> {
        let num_features = self.num_features();
        let expected = num_features + 1;
        if weights.len() != expected {
            return Err(ConversionError::InvalidLinearWeights {
                actual: weights.len(),
                expected,
            });
        }
        let coefficients = Array1::from(weights[..num_features].to_vec());
        Ok(LinearModel::new(coefficients, weights[num_features] + base_margin))
    }

    fn convert_forest(&self, trees: &ModelTrees, base_margin: f32) -> Result<Forest, ConversionError> {
        let mut forest = Forest::new(base_margin);
        for (tree_idx, xgb_tree) in trees.trees.iter().enumerate() {
            forest.push_tree(convert_tree(xgb_tree, tree_idx, self.num_features())?);
        }
        Ok(forest)
    }
}

/// Convert a single XGBoost tree to a native [`Tree`].
fn convert_tree(xgb_tree: &XgbTree, tree_idx: usize, num_features: usize) -> Result<Tree, ConversionError> {
    let num_nodes = xgb_tree.tree_param.num_nodes.max(0) as usize;
    if num_nodes == 0 {
        return Err(ConversionError::EmptyTree(tree_idx));
    }
    for actual in [
        xgb_tree.left_children.len(),
        xgb_tree.right_children.len(),
        xgb_tree.split_indices.len(),
        xgb_tree.split_conditions.len(),
        xgb_tree.default_left.len(),
    ] {
        if actual != num_nodes {
            return Err(ConversionError::NodeCountMismatch {
                tree: tree_idx,
                declared: num_nodes,
                actual,
            });
        }
    }

    let mut split_indices = vec![0u32; num_nodes];
    let mut thresholds = vec![0.0f32; num_nodes];
    let mut left = vec![0u32; num_nodes];
    let mut right = vec![0u32; num_nodes];
    let mut default_left = vec![false; num_nodes];
    let mut is_leaf = vec![false; num_nodes];
    let mut leaf_values = vec![0.0f32; num_nodes];

    let child_index = |node: usize, child: i32| {
        if child < 0 || child as usize >= num_nodes {
            Err(ConversionError::InvalidNodeIndex {
                tree: tree_idx,
                node,
                child,
                num_nodes,
            })
        } else {
            Ok(child as u32)
        }
    };

    for node in 0..num_nodes {
        // A node is a leaf if left_child == -1 (XGBoost convention); its
        // value is stored in split_conditions.
        if xgb_tree.left_children[node] == -1 {
            is_leaf[node] = true;
            leaf_values[node] = xgb_tree.split_conditions[node];
            continue;
        }

        let categorical = xgb_tree.split_type.get(node).copied().unwrap_or(0) == 1
            || xgb_tree.categories_nodes.contains(&(node as i32));
        if categorical {
            return Err(ConversionError::CategoricalSplit {
                tree: tree_idx,
                node,
            });
        }

        let feature = xgb_tree.split_indices[node];
        if feature < 0 || feature as usize >= num_features {
            return Err(ConversionError::SplitFeatureOutOfRange {
                tree: tree_idx,
                node,
                feature,
                num_features,
            });
        }

        left[node] = child_index(node, xgb_tree.left_children[node])?;
        right[node] = child_index(node, xgb_tree.right_children[node])?;
        split_indices[node] = feature as u32;
        thresholds[node] = xgb_tree.split_conditions[node];
        default_left[node] = xgb_tree.default_left[node] != 0;
    }

    Tree::new(
        split_indices,
        thresholds,
        left,
        right,
        default_left,
        is_leaf,
        leaf_values,
    )
    .map_err(|source| ConversionError::InvalidTree {
        tree: tree_idx,
        source,
    })
}
