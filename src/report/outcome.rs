use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};

/// A report entry that may be unavailable.
///
/// Recoverable stage errors (non-convergence, insufficient variation,
/// undefined metrics) end up as `Unavailable` with the error text instead
/// of a stale or infinite value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Outcome<T> {
    pub fn unavailable(error: &AnalysisError) -> Self {
        Outcome::Unavailable { reason: error.to_string() }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Outcome::Available(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Available(value) => Some(value),
            Outcome::Unavailable { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Available(_) => None,
            Outcome::Unavailable { reason } => Some(reason.as_str()),
        }
    }

    pub fn map<U, F: FnOnce(&T) -> U>(&self, f: F) -> Outcome<U> {
        match self {
            Outcome::Available(value) => Outcome::Available(f(value)),
            Outcome::Unavailable { reason } => Outcome::Unavailable { reason: reason.clone() },
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Available(value),
            Err(error) => Outcome::unavailable(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        let ok: Outcome<f64> = Ok(1.5).into();
        assert_eq!(ok.value(), Some(&1.5));

        let err: Outcome<f64> = Err(AnalysisError::SingularDesign).into();
        assert!(!err.is_available());
        assert_eq!(err.reason(), Some("weighted normal matrix is singular"));
    }

    #[test]
    fn test_serialized_shape() {
        let ok: Outcome<f64> = Outcome::Available(0.25);
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"status":"available","value":0.25}"#
        );

        let missing: Outcome<f64> = Outcome::Unavailable { reason: "undefined".to_string() };
        let json = serde_json::to_string(&missing).unwrap();
        assert!(json.contains(r#""status":"unavailable""#));
        let back: Outcome<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, missing);
    }
}
