//! The loaded network: architecture, weights, and label table.
//!
//! A [`Network`] is constructed once from a model file and is immutable
//! afterwards. Inference takes `&self` and mutates nothing, so one
//! network behind an `Arc` serves any number of concurrent
//! classification calls; release is the last holder dropping it.

pub mod layer;
pub mod ops;

pub use layer::{Conv, Dense, GroupedConv, Layer, Normalize, Pool};

use crate::error::{PercibirError, Result};
use crate::image::prepare::{InputPreparer, SamplePlan};
use crate::image::ImageBuffer;
use crate::primitives::{Tensor, Vector};
use std::fmt;
use std::path::Path;

/// Fixed input geometry a model was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputGeometry {
    /// Side length images are rescaled to before cropping.
    pub rescaled_size: usize,
    /// Side length of the crops the network consumes.
    pub input_size: usize,
    /// Input channel count.
    pub channels: usize,
}

/// Options for one inference call.
///
/// # Examples
///
/// ```
/// use percibir::net::InferOptions;
///
/// let features = InferOptions::default().with_layer_offset(2);
/// let robust = InferOptions::default().with_multi_sample(true);
/// assert_eq!(features.layer_offset(), 2);
/// assert!(robust.multi_sample());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferOptions {
    multi_sample: bool,
    layer_offset: usize,
    random_seed: Option<u64>,
}

impl InferOptions {
    /// Averages the ten-crop perturbation set instead of a single center
    /// crop.
    #[must_use]
    pub fn with_multi_sample(mut self, multi_sample: bool) -> Self {
        self.multi_sample = multi_sample;
        self
    }

    /// Stops that many layers before the end of the network, returning
    /// the intermediate activation as a feature vector.
    #[must_use]
    pub fn with_layer_offset(mut self, layer_offset: usize) -> Self {
        self.layer_offset = layer_offset;
        self
    }

    /// Samples a single seeded random crop instead of the center crop.
    /// Ignored when multi-sample is on.
    #[must_use]
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Whether multi-sample averaging is on.
    #[must_use]
    pub fn multi_sample(&self) -> bool {
        self.multi_sample
    }

    /// Layers dropped from the end of the pass.
    #[must_use]
    pub fn layer_offset(&self) -> usize {
        self.layer_offset
    }

    fn sample_plan(&self) -> SamplePlan {
        if self.multi_sample {
            SamplePlan::TenCrop
        } else if let Some(seed) = self.random_seed {
            SamplePlan::Random(seed)
        } else {
            SamplePlan::Center
        }
    }
}

/// A loaded convolutional network.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    labels: Vec<String>,
    geometry: InputGeometry,
    /// Mean tensor as stored in the model file, at rescaled size.
    mean: Tensor,
    preparer: InputPreparer,
}

impl Network {
    /// Assembles a network from its parts.
    ///
    /// `mean` is the training-set mean at `(rescaled, rescaled,
    /// channels)`; it is center-cropped to the input size here, once.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] on inconsistent geometry,
    /// a mean tensor of the wrong shape, an empty layer stack, a missing
    /// output layer, or a label table whose length differs from the
    /// output layer's unit count.
    pub fn from_parts(
        geometry: InputGeometry,
        mean: Tensor,
        layers: Vec<Layer>,
        labels: Vec<String>,
    ) -> Result<Self> {
        let InputGeometry {
            rescaled_size,
            input_size,
            channels,
        } = geometry;
        if input_size == 0 || channels == 0 || rescaled_size < input_size {
            return Err(PercibirError::corrupt_model(format!(
                "inconsistent input geometry: rescaled {rescaled_size}, input {input_size}, channels {channels}"
            )));
        }
        if mean.dims() != [rescaled_size, rescaled_size, channels] {
            return Err(PercibirError::corrupt_model(format!(
                "mean tensor shape {:?} does not match the declared geometry",
                mean.dims()
            )));
        }
        if layers.is_empty() {
            return Err(PercibirError::corrupt_model("model declares no layers"));
        }

        let output_units = layers
            .iter()
            .rev()
            .find_map(|layer| match layer {
                Layer::Dense(dense) => Some(dense.output_units()),
                _ => None,
            })
            .ok_or_else(|| {
                PercibirError::corrupt_model("model has no output layer to pair labels with")
            })?;
        if labels.len() != output_units {
            return Err(PercibirError::corrupt_model(format!(
                "label table has {} entries for {output_units} output units",
                labels.len()
            )));
        }

        let cropped_mean = center_crop(&mean, input_size);
        let preparer = InputPreparer::new(cropped_mean, rescaled_size, input_size, channels);

        Ok(Self {
            layers,
            labels,
            geometry,
            mean,
            preparer,
        })
    }

    /// Loads a network from a model file.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] /
    /// [`PercibirError::UnsupportedVersion`] for bad files, or an I/O
    /// error. A failed load never yields a partially built network.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use percibir::net::Network;
    ///
    /// let network = Network::load("model.pcn")?;
    /// println!("{} labels", network.labels().len());
    /// # Ok::<(), percibir::error::PercibirError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::format::network::read_file(path)
    }

    /// Writes the network back out as a model file.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::WriteFailure`] if persisting fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::format::network::write_file(self, path)
    }

    /// Runs forward inference and returns the raw score or feature
    /// vector.
    ///
    /// With the default options this is the full pass: one score per
    /// label, in label-table order. A positive layer offset stops early
    /// and returns that layer's activation as a feature vector. With
    /// multi-sample on, every perturbation runs the same pass and the
    /// elementwise mean comes back.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer offset consumes the whole network or
    /// the model's declared shapes turn out to be inconsistent mid-pass.
    pub fn infer(&self, image: &ImageBuffer, options: &InferOptions) -> Result<Vector<f32>> {
        if options.layer_offset >= self.layers.len() {
            return Err(PercibirError::DimensionMismatch {
                expected: format!("layer offset below {}", self.layers.len()),
                actual: format!("{}", options.layer_offset),
            });
        }

        let mut activation = self.preparer.prepare(image, options.sample_plan());
        let stop = self.layers.len() - options.layer_offset;
        for layer in &self.layers[..stop] {
            activation = layer.forward(&activation)?;
        }

        // Feature extraction can stop on a spatial activation; collapse
        // it to (samples, units) before averaging.
        if activation.rank() > 2 {
            let samples = activation.dims()[0];
            let units = activation.stride_of_first();
            activation
                .reshape(&[samples, units])
                .expect("reshape preserves the element count");
        }
        Ok(ops::mean_rows(&activation))
    }

    /// The ordered label table.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The ordered layer stack.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The input geometry the model was trained for.
    #[must_use]
    pub fn geometry(&self) -> InputGeometry {
        self.geometry
    }

    /// The stored mean tensor, at rescaled size.
    #[must_use]
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// One line per layer, for debugging.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{self}")
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network: {} layers, {} labels, input {}x{}x{}",
            self.layers.len(),
            self.labels.len(),
            self.geometry.input_size,
            self.geometry.input_size,
            self.geometry.channels
        )?;
        for (index, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  {index:>2}: {}", layer.kind_name())?;
        }
        Ok(())
    }
}

/// Center-crops a `(size, size, c)` tensor down to `(crop, crop, c)`.
fn center_crop(source: &Tensor, crop: usize) -> Tensor {
    let size = source.dims()[0];
    let channels = source.dims()[2];
    let margin = (size - crop) / 2;
    let mut output = Tensor::zeros(&[crop, crop, channels]);
    let src = source.as_slice();
    let dest = output.as_mut_slice();
    let row = crop * channels;
    for y in 0..crop {
        let src_base = ((y + margin) * size + margin) * channels;
        dest[y * row..(y + 1) * row].copy_from_slice(&src[src_base..src_base + row]);
    }
    output
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A tiny but complete network: 2x2 input, flatten, dense to 2 units,
    /// softmax. Weights make the first unit track the first pixel.
    pub(crate) fn tiny_network() -> Network {
        let geometry = InputGeometry {
            rescaled_size: 4,
            input_size: 2,
            channels: 1,
        };
        let mean = Tensor::zeros(&[4, 4, 1]);
        let mut weights = Tensor::zeros(&[4, 2]);
        weights.as_mut_slice()[0] = 0.02; // pixel 0 -> unit 0
        weights.as_mut_slice()[3] = 0.02; // pixel 1 -> unit 1
        let layers = vec![
            Layer::Flatten,
            Layer::Dense(Dense::new(weights, Vector::zeros(2), 0.0).expect("valid dense")),
            Layer::Softmax,
        ];
        Network::from_parts(
            geometry,
            mean,
            layers,
            vec!["left".to_string(), "right".to_string()],
        )
        .expect("valid network")
    }

    fn gradient_image() -> ImageBuffer {
        // Left half dark, right half bright.
        let mut bytes = vec![0u8; 8 * 8];
        for y in 0..8 {
            for x in 4..8 {
                bytes[y * 8 + x] = 200;
            }
        }
        ImageBuffer::from_raw_pixels(&bytes, 8, 8, 1, 8, false, false).expect("valid image")
    }

    #[test]
    fn test_network_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Network>();
    }

    #[test]
    fn test_label_invariant_enforced() {
        let geometry = InputGeometry {
            rescaled_size: 4,
            input_size: 2,
            channels: 1,
        };
        let layers = vec![
            Layer::Flatten,
            Layer::Dense(
                Dense::new(Tensor::zeros(&[4, 2]), Vector::zeros(2), 0.0).expect("valid"),
            ),
        ];
        let result = Network::from_parts(
            geometry,
            Tensor::zeros(&[4, 4, 1]),
            layers,
            vec!["only-one".to_string()],
        );
        assert!(matches!(result, Err(PercibirError::CorruptModel { .. })));
    }

    #[test]
    fn test_full_pass_length_matches_labels() {
        let network = tiny_network();
        let scores = network
            .infer(&gradient_image(), &InferOptions::default())
            .expect("inference runs");
        assert_eq!(scores.len(), network.labels().len());
        let total: f32 = scores.sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_feature_extraction_skips_softmax() {
        let network = tiny_network();
        let options = InferOptions::default().with_layer_offset(1);
        let features = network
            .infer(&gradient_image(), &options)
            .expect("inference runs");
        // Dense output, not softmax: does not sum to one.
        assert_eq!(features.len(), 2);
        let total: f32 = features.sum();
        assert!((total - 1.0).abs() > 1e-3);
    }

    #[test]
    fn test_layer_offset_cannot_consume_network() {
        let network = tiny_network();
        let options = InferOptions::default().with_layer_offset(3);
        assert!(matches!(
            network.infer(&gradient_image(), &options),
            Err(PercibirError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_multi_sample_close_to_center_for_uniform_image() {
        let network = tiny_network();
        let bytes = vec![128u8; 8 * 8];
        let image =
            ImageBuffer::from_raw_pixels(&bytes, 8, 8, 1, 8, false, false).expect("valid image");
        let single = network
            .infer(&image, &InferOptions::default())
            .expect("single");
        let multi = network
            .infer(&image, &InferOptions::default().with_multi_sample(true))
            .expect("multi");
        for (a, b) in single.iter().zip(multi.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_infer_is_deterministic() {
        let network = tiny_network();
        let image = gradient_image();
        let a = network.infer(&image, &InferOptions::default()).expect("a");
        let b = network.infer(&image, &InferOptions::default()).expect("b");
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_summary_lists_layers() {
        let network = tiny_network();
        let summary = network.summary();
        assert!(summary.contains("dense"));
        assert!(summary.contains("softmax"));
        assert!(summary.contains("2 labels"));
    }
}
