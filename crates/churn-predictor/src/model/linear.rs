//! Linear booster (gblinear) for a single output.

use ndarray::{Array1, ArrayView1, aview1};

/// Linear model: `margin = features · weights + bias`.
///
/// ```
/// use churn_predictor::model::LinearModel;
/// use ndarray::array;
///
/// let model = LinearModel::new(array![0.5, -0.25], 0.1);
/// assert_eq!(model.n_features(), 2);
/// assert!((model.predict_margin(&[2.0, 4.0]) - 0.1).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Array1<f32>,
    bias: f32,
}

impl LinearModel {
    pub fn new(weights: Array1<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn weights(&self) -> ArrayView1<'_, f32> {
        self.weights.view()
    }

    #[inline]
    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// Raw margin for one row.
    ///
    /// # Panics
    ///
    /// Panics if `features.len() != self.n_features()`.
    #[inline]
    pub fn predict_margin(&self, features: &[f32]) -> f32 {
        aview1(features).dot(&self.weights) + self.bias
    }
}
