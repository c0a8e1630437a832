pub mod effect;

pub use effect::{relative_lift, AdjustedEffect, EffectEstimator, EffectReport, LiftSummary};
