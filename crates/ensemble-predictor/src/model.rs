//! Per-symbol LSTM surrogate artifacts. A model file, if present, loads
//! via `LstmModel::load` and predicts from a 60-session feature window.
//! Absence of a file means "no LSTM for this symbol"; the ensemble treats
//! that as a missing component, never an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use screener_core::ScreenerError;

/// Sessions of features the model consumes.
pub const INPUT_WINDOW: usize = 60;

/// Affine surrogate exported by the training pipeline: one weight per
/// (session, feature) cell, squashed through tanh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmModel {
    pub symbol: String,
    pub input_window: usize,
    pub n_features: usize,
    /// Row-major weights, `input_window * n_features` long.
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Confidence calibration in (0, 1].
    pub confidence_scale: f64,
}

impl LstmModel {
    pub fn load(path: &Path) -> Result<Self, ScreenerError> {
        let bytes = std::fs::read(path).map_err(|e| ScreenerError::Component {
            component: "lstm".to_string(),
            reason: format!("read {:?}: {}", path, e),
        })?;
        let model: LstmModel =
            bincode::deserialize(&bytes).map_err(|e| ScreenerError::Component {
                component: "lstm".to_string(),
                reason: format!("decode {:?}: {}", path, e),
            })?;

        if model.input_window != INPUT_WINDOW {
            return Err(ScreenerError::Component {
                component: "lstm".to_string(),
                reason: format!(
                    "unexpected input window {} (want {})",
                    model.input_window, INPUT_WINDOW
                ),
            });
        }
        if model.weights.len() != model.input_window * model.n_features {
            return Err(ScreenerError::Component {
                component: "lstm".to_string(),
                reason: format!(
                    "weight arity {} does not match {}x{}",
                    model.weights.len(),
                    model.input_window,
                    model.n_features
                ),
            });
        }
        if !(0.0..=1.0).contains(&model.confidence_scale) {
            return Err(ScreenerError::Component {
                component: "lstm".to_string(),
                reason: "confidence scale out of range".to_string(),
            });
        }
        Ok(model)
    }

    /// Next-session direction and confidence from a `[60, n_features]`
    /// feature window.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<(f64, f64), ScreenerError> {
        if features.len() != self.input_window {
            return Err(ScreenerError::Component {
                component: "lstm".to_string(),
                reason: format!(
                    "feature window {} rows (want {})",
                    features.len(),
                    self.input_window
                ),
            });
        }

        let mut z = self.bias;
        for (row_idx, row) in features.iter().enumerate() {
            if row.len() != self.n_features {
                return Err(ScreenerError::Component {
                    component: "lstm".to_string(),
                    reason: format!(
                        "feature row {} has {} columns (want {})",
                        row_idx,
                        row.len(),
                        self.n_features
                    ),
                });
            }
            for (col_idx, value) in row.iter().enumerate() {
                let v = if value.is_finite() { *value } else { 0.0 };
                z += self.weights[row_idx * self.n_features + col_idx] * v;
            }
        }

        let direction = z.tanh();
        let confidence = ((0.4 + 0.6 * direction.abs()) * self.confidence_scale).clamp(0.0, 1.0);
        Ok((direction, confidence))
    }
}

/// `<models_path>/lstm/<symbol>.model`
pub fn model_path(models_dir: &Path, symbol: &str) -> PathBuf {
    let safe: String = symbol
        .chars()
        .map(|c| if c == '^' || c == '/' { '_' } else { c })
        .collect();
    models_dir.join("lstm").join(format!("{}.model", safe))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullish_model(n_features: usize) -> LstmModel {
        LstmModel {
            symbol: "CBA.AX".to_string(),
            input_window: INPUT_WINDOW,
            n_features,
            // Positive weight on feature 0 of the final session only.
            weights: {
                let mut w = vec![0.0; INPUT_WINDOW * n_features];
                w[(INPUT_WINDOW - 1) * n_features] = 2.0;
                w
            },
            bias: 0.1,
            confidence_scale: 0.9,
        }
    }

    #[test]
    fn load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_path(dir.path(), "CBA.AX");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let model = bullish_model(4);
        std::fs::write(&path, bincode::serialize(&model).unwrap()).unwrap();

        let loaded = LstmModel::load(&path).unwrap();
        assert_eq!(loaded.n_features, 4);
        assert_eq!(loaded.weights.len(), INPUT_WINDOW * 4);
    }

    #[test]
    fn load_rejects_wrong_arity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.model");
        let mut model = bullish_model(4);
        model.weights.pop();
        std::fs::write(&path, bincode::serialize(&model).unwrap()).unwrap();
        assert!(LstmModel::load(&path).is_err());
    }

    #[test]
    fn load_rejects_garbage_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.model");
        std::fs::write(&path, b"not a model").unwrap();
        assert!(LstmModel::load(&path).is_err());
    }

    #[test]
    fn predict_outputs_bounded() {
        let model = bullish_model(4);
        let mut features = vec![vec![0.0; 4]; INPUT_WINDOW];
        features[INPUT_WINDOW - 1][0] = 1.0;
        let (direction, confidence) = model.predict(&features).unwrap();

        assert!((-1.0..=1.0).contains(&direction));
        assert!((0.0..=1.0).contains(&confidence));
        assert!(direction > 0.5, "direction {}", direction);
    }

    #[test]
    fn predict_rejects_wrong_shape() {
        let model = bullish_model(4);
        let features = vec![vec![0.0; 4]; 30];
        assert!(model.predict(&features).is_err());

        let ragged = vec![vec![0.0; 3]; INPUT_WINDOW];
        assert!(model.predict(&ragged).is_err());
    }

    #[test]
    fn nan_features_are_neutralized() {
        let model = bullish_model(4);
        let mut features = vec![vec![f64::NAN; 4]; INPUT_WINDOW];
        features[0][0] = 0.0;
        let (direction, confidence) = model.predict(&features).unwrap();
        assert!(direction.is_finite());
        assert!(confidence.is_finite());
    }
}
