//! Online training of a linear predictor over extracted features.
//!
//! The intended loop: run the network with a layer offset to pull a
//! feature vector per image, feed labelled vectors into a [`Trainer`],
//! then [`Trainer::finalize`] into an immutable [`Predictor`] that scores
//! future feature vectors and persists to a file.
//!
//! The fit is logistic regression over the accumulated examples —
//! sigmoid activation, averaged-gradient descent, tolerance early-exit.
//! It is deterministic for a given example sequence, and the convex loss
//! makes the fixed point independent of accumulation order up to f32
//! rounding.

use crate::error::{PercibirError, Result};
use crate::primitives::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Mutable accumulator of labelled feature vectors.
///
/// Not shareable across threads while training — `train` takes `&mut
/// self`, so the borrow checker enforces the single-writer rule.
///
/// # Examples
///
/// ```
/// use percibir::linear::Trainer;
///
/// let mut trainer = Trainer::new();
/// trainer.train(1.0, &[2.0, 0.1]).unwrap();
/// trainer.train(0.0, &[0.1, 2.0]).unwrap();
/// let predictor = trainer.finalize().unwrap();
/// assert!(predictor.predict(&[2.0, 0.1]).unwrap() > 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct Trainer {
    /// Feature dimension, fixed by the first example.
    dimension: Option<usize>,
    labels: Vec<f32>,
    /// All examples, flattened row-major.
    features: Vec<f32>,
    learning_rate: f32,
    max_epochs: usize,
    tol: f32,
}

impl Trainer {
    /// Creates an empty trainer with default hyperparameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: None,
            labels: Vec::new(),
            features: Vec::new(),
            learning_rate: 0.5,
            max_epochs: 500,
            tol: 1e-4,
        }
    }

    /// Sets the gradient-descent step size.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Sets the maximum number of passes over the stored examples.
    #[must_use]
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    /// Sets the early-exit gradient tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tol: f32) -> Self {
        self.tol = tol;
        self
    }

    /// Accumulates one labelled example. Labels above 0.5 are the
    /// positive class.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::DimensionMismatch`] if `features` is
    /// empty or its length differs from earlier calls; the accumulated
    /// state is left unchanged in that case.
    pub fn train(&mut self, expected_label: f32, features: &[f32]) -> Result<()> {
        if features.is_empty() {
            return Err(PercibirError::DimensionMismatch {
                expected: "at least one feature".to_string(),
                actual: "0".to_string(),
            });
        }
        match self.dimension {
            None => self.dimension = Some(features.len()),
            Some(dimension) if dimension != features.len() => {
                return Err(PercibirError::dimension_mismatch(dimension, features.len()));
            }
            Some(_) => {}
        }
        self.labels.push(expected_label);
        self.features.extend_from_slice(features);
        Ok(())
    }

    /// Number of accumulated examples.
    #[must_use]
    pub fn example_count(&self) -> usize {
        self.labels.len()
    }

    /// Feature dimension, once the first example fixed it.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Fits the accumulated examples and produces the predictor,
    /// consuming the trainer.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::DimensionMismatch`] if no examples were
    /// accumulated.
    pub fn finalize(self) -> Result<Predictor> {
        let Some(dimension) = self.dimension else {
            return Err(PercibirError::DimensionMismatch {
                expected: "at least one training example".to_string(),
                actual: "0".to_string(),
            });
        };
        let count = self.labels.len();
        let mut weights = vec![0.0f32; dimension];
        let mut bias = 0.0f32;
        let mut gradients = vec![0.0f32; dimension];

        for _ in 0..self.max_epochs {
            gradients.fill(0.0);
            let mut bias_gradient = 0.0;

            for (example, &label) in self.labels.iter().enumerate() {
                let row = &self.features[example * dimension..(example + 1) * dimension];
                let mut z = bias;
                for (w, &x) in weights.iter().zip(row) {
                    z += w * x;
                }
                let target = if label > 0.5 { 1.0 } else { 0.0 };
                let error = sigmoid(z) - target;
                bias_gradient += error;
                for (g, &x) in gradients.iter_mut().zip(row) {
                    *g += error * x;
                }
            }

            let scale = 1.0 / count as f32;
            bias_gradient *= scale;
            for g in &mut gradients {
                *g *= scale;
            }

            bias -= self.learning_rate * bias_gradient;
            for (w, &g) in weights.iter_mut().zip(gradients.iter()) {
                *w -= self.learning_rate * g;
            }

            if bias_gradient.abs() < self.tol && gradients.iter().all(|g| g.abs() < self.tol) {
                break;
            }
        }

        Ok(Predictor {
            weights: Vector::from_vec(weights),
            bias,
        })
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// Immutable linear decision rule over feature vectors.
///
/// Produced by [`Trainer::finalize`] or loaded from a file; safe to share
/// across threads for unlimited concurrent predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    weights: Vector<f32>,
    bias: f32,
}

impl Predictor {
    pub(crate) fn from_parts(weights: Vector<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    /// Feature dimension this predictor was fitted for.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    /// The fitted weight vector.
    #[must_use]
    pub fn weights(&self) -> &Vector<f32> {
        &self.weights
    }

    /// The fitted bias term.
    #[must_use]
    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// Scores a feature vector: sigmoid of the weighted sum plus bias,
    /// in `(0, 1)` with the positive class toward 1.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::DimensionMismatch`] if `features` has the
    /// wrong length.
    pub fn predict(&self, features: &[f32]) -> Result<f32> {
        if features.len() != self.weights.len() {
            return Err(PercibirError::dimension_mismatch(
                self.weights.len(),
                features.len(),
            ));
        }
        let mut z = self.bias;
        for (w, &x) in self.weights.iter().zip(features) {
            z += w * x;
        }
        Ok(sigmoid(z))
    }

    /// Persists the predictor.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::WriteFailure`] if persisting fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::format::predictor::write_file(self, path)
    }

    /// Loads a predictor from a file.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptFile`] for malformed files, or an
    /// I/O error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::format::predictor::read_file(path)
    }
}

impl fmt::Display for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Predictor: {} weights, bias {:.6}",
            self.weights.len(),
            self.bias
        )
    }
}
