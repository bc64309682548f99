//! Match outcome prediction pipeline: feature engineering over historical
//! match data, a small family of classifiers, probabilistic predictions,
//! and a background scheduler for recurring refresh and retraining jobs.

pub mod data_processor;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predict;
pub mod scheduler;
pub mod store;
pub mod team_form;
pub mod training;
