//! Loaders for models trained by other libraries.
//!
//! The churn model ships as an XGBoost JSON dump; see [`xgboost`].

pub mod xgboost;
