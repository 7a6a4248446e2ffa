//! Turning raw output activations into named, ranked predictions.
//!
//! Pure post-processing: inference produces a score vector, and the
//! label table pairs it 1:1 by index. Feature extraction (a positive
//! layer offset on [`Network::infer`]) returns a bare vector instead —
//! names are only ever attached to a full pass, where the score count
//! equals the label count by construction.

use crate::error::{PercibirError, Result};
use crate::image::ImageBuffer;
use crate::net::{InferOptions, Network};
use serde::{Deserialize, Serialize};

/// Score threshold the reference ranking uses.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.05;

/// One named score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Category name from the model's label table.
    pub name: String,
    /// Raw score from the output layer.
    pub score: f32,
}

/// The full, unsorted output of one classification: one entry per label,
/// in label-table order.
///
/// Callers apply their own ranking policy; [`PredictionSet::ranked`]
/// implements the reference one (threshold, then stable descending
/// sort).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    entries: Vec<Prediction>,
}

impl PredictionSet {
    /// Pairs scores with names 1:1.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ; [`classify`] guarantees they match.
    #[must_use]
    pub fn from_pairs(names: &[String], scores: &[f32]) -> Self {
        assert_eq!(names.len(), scores.len());
        let entries = names
            .iter()
            .zip(scores)
            .map(|(name, &score)| Prediction {
                name: name.clone(),
                score,
            })
            .collect();
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in label-table order.
    #[must_use]
    pub fn entries(&self) -> &[Prediction] {
        &self.entries
    }

    /// Iterates entries in label-table order.
    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.entries.iter()
    }

    /// Entries with `score >= threshold`, sorted descending by score.
    /// The sort is stable, so equal scores keep label-table order.
    #[must_use]
    pub fn ranked(&self, threshold: f32) -> Vec<Prediction> {
        let mut kept: Vec<Prediction> = self
            .entries
            .iter()
            .filter(|p| p.score >= threshold)
            .cloned()
            .collect();
        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        kept
    }
}

impl<'a> IntoIterator for &'a PredictionSet {
    type Item = &'a Prediction;
    type IntoIter = std::slice::Iter<'a, Prediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Classifies an image: full forward pass, scores paired with label
/// names.
///
/// Use [`Network::infer`] with a layer offset for feature extraction;
/// those vectors have no label mapping and this function refuses to
/// invent one.
///
/// # Errors
///
/// Returns an error if `options` carries a nonzero layer offset, or if
/// inference itself fails.
///
/// # Examples
///
/// ```no_run
/// use percibir::classify::{classify, DEFAULT_SCORE_THRESHOLD};
/// use percibir::image::ImageBuffer;
/// use percibir::net::{InferOptions, Network};
///
/// let network = Network::load("model.pcn")?;
/// let image = ImageBuffer::from_file("photo.ppm")?;
/// let predictions = classify(&network, &image, &InferOptions::default())?;
/// for p in predictions.ranked(DEFAULT_SCORE_THRESHOLD) {
///     println!("{}: {:.2}", p.name, p.score);
/// }
/// # Ok::<(), percibir::error::PercibirError>(())
/// ```
pub fn classify(
    network: &Network,
    image: &ImageBuffer,
    options: &InferOptions,
) -> Result<PredictionSet> {
    if options.layer_offset() != 0 {
        return Err(PercibirError::DimensionMismatch {
            expected: "layer offset 0 for labelled classification".to_string(),
            actual: format!("{}", options.layer_offset()),
        });
    }
    let scores = network.infer(image, options)?;
    Ok(PredictionSet::from_pairs(
        network.labels(),
        scores.as_slice(),
    ))
}
