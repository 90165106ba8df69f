//! Margin → probability → label.
//!
//! The [`OutputTransform`] is derived from the model's objective when it is
//! loaded so inference never needs the training configuration.

use super::ChurnLabel;

/// Inference-time output transformation for binary objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputTransform {
    /// Logistic sigmoid; label is `p > 0.5`.
    /// Used by `binary:logistic`, `reg:logistic` and `binary:logitraw`.
    #[default]
    Sigmoid,

    /// Hard margin; label is `margin > 0`, probability is the label itself.
    /// Used by `binary:hinge`.
    Hinge,
}

impl OutputTransform {
    /// Transform for an XGBoost objective name, if it is a binary objective.
    pub fn for_objective(name: &str) -> Option<Self> {
        match name {
            "binary:logistic" | "reg:logistic" | "binary:logitraw" => Some(Self::Sigmoid),
            "binary:hinge" => Some(Self::Hinge),
            _ => None,
        }
    }

    /// Probability of churn for a raw margin.
    #[inline]
    pub fn probability(&self, margin: f32) -> f32 {
        match self {
            OutputTransform::Sigmoid => sigmoid(margin),
            OutputTransform::Hinge => {
                if margin > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Predicted class for a raw margin.
    #[inline]
    pub fn label(&self, margin: f32) -> ChurnLabel {
        // sigmoid(m) > 0.5 exactly when m > 0; compare margins to avoid rounding at the boundary.
        ChurnLabel::from_flag(margin > 0.0)
    }
}

/// Numerically stable sigmoid.
/// Clamps input to [-500, 500] to prevent overflow.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    let clamped = x.clamp(-500.0, 500.0);
    if clamped >= 0.0 {
        1.0 / (1.0 + (-clamped).exp())
    } else {
        let e = clamped.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case("binary:logistic", Some(OutputTransform::Sigmoid))]
    #[case("binary:logitraw", Some(OutputTransform::Sigmoid))]
    #[case("binary:hinge", Some(OutputTransform::Hinge))]
    #[case("reg:squarederror", None)]
    #[case("multi:softprob", None)]
    fn maps_objectives(#[case] name: &str, #[case] expected: Option<OutputTransform>) {
        assert_eq!(OutputTransform::for_objective(name), expected);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!(!sigmoid(f32::MAX).is_nan());
    }

    #[rstest]
    #[case(OutputTransform::Sigmoid, 0.3, ChurnLabel::Churn)]
    #[case(OutputTransform::Sigmoid, 0.0, ChurnLabel::NotChurn)]
    #[case(OutputTransform::Sigmoid, -2.0, ChurnLabel::NotChurn)]
    #[case(OutputTransform::Hinge, 0.1, ChurnLabel::Churn)]
    #[case(OutputTransform::Hinge, -0.1, ChurnLabel::NotChurn)]
    fn labels_by_margin_sign(
        #[case] transform: OutputTransform,
        #[case] margin: f32,
        #[case] expected: ChurnLabel,
    ) {
        assert_eq!(transform.label(margin), expected);
    }

    #[test]
    fn hinge_probability_is_the_label() {
        assert_eq!(OutputTransform::Hinge.probability(3.0), 1.0);
        assert_eq!(OutputTransform::Hinge.probability(-3.0), 0.0);
    }
}
