//! Layer descriptors and their forward implementations.
//!
//! The layer set is closed: a model file can only name these kinds, so a
//! plain enum carries the architecture. Weight-bearing kinds validate
//! their shapes at construction; `forward` only has to cross-check the
//! shapes that depend on the incoming activation.

use super::ops;
use crate::error::{PercibirError, Result};
use crate::primitives::{Tensor, Vector};
use serde::{Deserialize, Serialize};

/// Convolution: square kernels cross-correlated over the input, plus a
/// per-kernel bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv {
    kernels: Tensor,
    bias: Vector<f32>,
    kernel_size: usize,
    kernel_count: usize,
    stride: usize,
    margin: usize,
}

impl Conv {
    /// Creates a convolution layer.
    ///
    /// `kernels` must be `(kernel_size² * input_channels, kernel_count)`
    /// with one column per kernel; `bias` must have `kernel_count`
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] if the shapes disagree.
    pub fn new(
        kernels: Tensor,
        bias: Vector<f32>,
        kernel_size: usize,
        stride: usize,
        margin: usize,
    ) -> Result<Self> {
        if kernel_size == 0 || stride == 0 {
            return Err(PercibirError::corrupt_model(
                "convolution kernel size and stride must be positive",
            ));
        }
        if kernels.rank() != 2 {
            return Err(PercibirError::corrupt_model(
                "convolution kernels must be a rank-2 tensor",
            ));
        }
        let kernel_count = kernels.dims()[1];
        if bias.len() != kernel_count {
            return Err(PercibirError::corrupt_model(format!(
                "convolution bias has {} entries for {kernel_count} kernels",
                bias.len()
            )));
        }
        if kernels.dims()[0] % (kernel_size * kernel_size) != 0 {
            return Err(PercibirError::corrupt_model(format!(
                "convolution kernel rows {} are not a multiple of the {kernel_size}x{kernel_size} patch",
                kernels.dims()[0]
            )));
        }
        Ok(Self {
            kernels,
            bias,
            kernel_size,
            kernel_count,
            stride,
            margin,
        })
    }

    pub(crate) fn kernels(&self) -> &Tensor {
        &self.kernels
    }

    pub(crate) fn bias(&self) -> &Vector<f32> {
        &self.bias
    }

    pub(crate) fn geometry(&self) -> (usize, usize, usize) {
        (self.kernel_size, self.stride, self.margin)
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        check_spatial(input, "convolution")?;
        let channels = input.dims()[3];
        let expected_rows = self.kernel_size * self.kernel_size * channels;
        if self.kernels.dims()[0] != expected_rows {
            return Err(PercibirError::corrupt_model(format!(
                "convolution kernels expect {} patch values, activation provides {expected_rows}",
                self.kernels.dims()[0]
            )));
        }
        let padded;
        let source = if self.margin == 0 {
            input
        } else {
            padded = ops::insert_margin(input, self.margin);
            &padded
        };
        check_window(source, self.kernel_size, "convolution kernel")?;
        let mut output = ops::correlate(
            source,
            &self.kernels,
            self.kernel_size,
            self.kernel_count,
            self.stride,
        );
        ops::add_channel_bias(&mut output, &self.bias);
        Ok(output)
    }
}

/// Grouped convolution: input channels are split into equal groups, each
/// correlated with its own kernel bank, outputs concatenated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedConv {
    /// Per-group kernel banks, `(groups, patch_values, kernels_per_group)`.
    kernels: Tensor,
    bias: Vector<f32>,
    kernel_size: usize,
    stride: usize,
    margin: usize,
}

impl GroupedConv {
    /// Creates a grouped convolution layer from a rank-3 kernel tensor.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] if the shapes disagree.
    pub fn new(
        kernels: Tensor,
        bias: Vector<f32>,
        kernel_size: usize,
        stride: usize,
        margin: usize,
    ) -> Result<Self> {
        if kernels.rank() != 3 {
            return Err(PercibirError::corrupt_model(
                "grouped convolution kernels must be a rank-3 tensor",
            ));
        }
        let groups = kernels.dims()[0];
        let per_group = kernels.dims()[2];
        if groups == 0 || per_group == 0 {
            return Err(PercibirError::corrupt_model(
                "grouped convolution needs at least one group and one kernel",
            ));
        }
        if bias.len() != groups * per_group {
            return Err(PercibirError::corrupt_model(format!(
                "grouped convolution bias has {} entries for {} kernels",
                bias.len(),
                groups * per_group
            )));
        }
        if kernel_size == 0 || stride == 0 {
            return Err(PercibirError::corrupt_model(
                "grouped convolution kernel size and stride must be positive",
            ));
        }
        Ok(Self {
            kernels,
            bias,
            kernel_size,
            stride,
            margin,
        })
    }

    pub(crate) fn kernels(&self) -> &Tensor {
        &self.kernels
    }

    pub(crate) fn bias(&self) -> &Vector<f32> {
        &self.bias
    }

    pub(crate) fn geometry(&self) -> (usize, usize, usize) {
        (self.kernel_size, self.stride, self.margin)
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        check_spatial(input, "grouped convolution")?;
        let groups = self.kernels.dims()[0];
        let per_group = self.kernels.dims()[2];
        let channels = input.dims()[3];
        if channels % groups != 0 {
            return Err(PercibirError::corrupt_model(format!(
                "{channels} input channels cannot be split into {groups} groups"
            )));
        }
        let group_channels = channels / groups;
        let expected_rows = self.kernel_size * self.kernel_size * group_channels;
        if self.kernels.dims()[1] != expected_rows {
            return Err(PercibirError::corrupt_model(format!(
                "grouped convolution kernels expect {} patch values, activation provides {expected_rows}",
                self.kernels.dims()[1]
            )));
        }

        let mut parts = Vec::with_capacity(groups);
        for group in 0..groups {
            let slice = ops::channel_slice(input, group * group_channels, group_channels);
            let bank = Tensor::from_vec(
                &[expected_rows, per_group],
                self.kernels.first_dim_slice(group).to_vec(),
            )
            .expect("bank shape matches the validated kernel tensor");
            let padded;
            let source = if self.margin == 0 {
                &slice
            } else {
                padded = ops::insert_margin(&slice, self.margin);
                &padded
            };
            check_window(source, self.kernel_size, "grouped convolution kernel")?;
            parts.push(ops::correlate(
                source,
                &bank,
                self.kernel_size,
                per_group,
                self.stride,
            ));
        }
        let mut output = ops::channel_concat(&parts);
        ops::add_channel_bias(&mut output, &self.bias);
        Ok(output)
    }
}

/// Max pooling over square patches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pool {
    pub(crate) size: usize,
    pub(crate) stride: usize,
}

impl Pool {
    /// Creates a max-pooling layer.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] on a zero size or stride.
    pub fn new(size: usize, stride: usize) -> Result<Self> {
        if size == 0 || stride == 0 {
            return Err(PercibirError::corrupt_model(
                "pool size and stride must be positive",
            ));
        }
        Ok(Self { size, stride })
    }
}

/// Fully connected layer with optional inference-time dropout scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Tensor,
    bias: Vector<f32>,
    output_units: usize,
    /// Fraction of units dropped during the original training run; at
    /// inference the output is scaled by `1 - dropout`.
    dropout: f32,
}

impl Dense {
    /// Creates a dense layer from `(input_units, output_units)` weights.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] if the shapes disagree or
    /// dropout is outside `[0, 1)`.
    pub fn new(weights: Tensor, bias: Vector<f32>, dropout: f32) -> Result<Self> {
        if weights.rank() != 2 {
            return Err(PercibirError::corrupt_model(
                "dense weights must be a rank-2 tensor",
            ));
        }
        let output_units = weights.dims()[1];
        if bias.len() != output_units {
            return Err(PercibirError::corrupt_model(format!(
                "dense bias has {} entries for {output_units} output units",
                bias.len()
            )));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(PercibirError::corrupt_model(format!(
                "dense dropout {dropout} is outside [0, 1)"
            )));
        }
        Ok(Self {
            weights,
            bias,
            output_units,
            dropout,
        })
    }

    /// Output unit count; the label-table invariant checks this on the
    /// final weighted layer.
    #[must_use]
    pub fn output_units(&self) -> usize {
        self.output_units
    }

    pub(crate) fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub(crate) fn bias(&self) -> &Vector<f32> {
        &self.bias
    }

    pub(crate) fn dropout(&self) -> f32 {
        self.dropout
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_units = input.stride_of_first();
        if self.weights.dims()[0] != input_units {
            return Err(PercibirError::corrupt_model(format!(
                "dense weights expect {} inputs, activation provides {input_units}",
                self.weights.dims()[0]
            )));
        }
        let mut output = ops::dense(input, &self.weights, self.output_units);
        ops::add_channel_bias(&mut output, &self.bias);
        if self.dropout > 0.0 {
            ops::scale_inplace(&mut output, 1.0 - self.dropout);
        }
        Ok(output)
    }
}

/// Local response normalization parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Normalize {
    pub(crate) window: usize,
    pub(crate) k: f32,
    pub(crate) alpha: f32,
    pub(crate) beta: f32,
}

impl Normalize {
    /// Creates an LRN layer.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] on a zero window.
    pub fn new(window: usize, k: f32, alpha: f32, beta: f32) -> Result<Self> {
        if window == 0 {
            return Err(PercibirError::corrupt_model(
                "normalization window must be positive",
            ));
        }
        Ok(Self {
            window,
            k,
            alpha,
            beta,
        })
    }
}

/// One step of the forward pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Layer {
    /// Convolution with bias.
    Conv(Conv),
    /// Grouped convolution with bias.
    GroupedConv(GroupedConv),
    /// Max pooling.
    Pool(Pool),
    /// Fully connected with bias.
    Dense(Dense),
    /// Elementwise `max(0, x)`.
    Relu,
    /// Local response normalization across channels.
    Normalize(Normalize),
    /// Collapse `(images, h, w, c)` to `(images, units)`.
    Flatten,
    /// Identity at inference; kept so trained architectures round-trip.
    Dropout,
    /// Row-wise softmax, the terminal scoring layer.
    Softmax,
}

impl Layer {
    /// Runs the layer on an activation.
    ///
    /// # Errors
    ///
    /// Returns [`PercibirError::CorruptModel`] when the activation shape
    /// is inconsistent with the layer's weights — a model whose declared
    /// architecture doesn't line up with itself.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward(input),
            Layer::GroupedConv(gconv) => gconv.forward(input),
            Layer::Pool(pool) => {
                check_spatial(input, "pool")?;
                check_window(input, pool.size, "pool patch")?;
                Ok(ops::max_patch(input, pool.size, pool.stride))
            }
            Layer::Dense(dense) => dense.forward(input),
            Layer::Relu => Ok(ops::relu(input)),
            Layer::Normalize(n) => {
                check_spatial(input, "normalization")?;
                Ok(ops::local_response(input, n.window, n.k, n.alpha, n.beta))
            }
            Layer::Flatten => {
                let mut output = input.clone();
                let images = input.dims()[0];
                let units = input.stride_of_first();
                output
                    .reshape(&[images, units])
                    .expect("flatten preserves the element count");
                Ok(output)
            }
            Layer::Dropout => Ok(input.clone()),
            Layer::Softmax => Ok(ops::softmax_rows(input)),
        }
    }

    /// Short kind name for summaries.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Layer::Conv(_) => "conv",
            Layer::GroupedConv(_) => "gconv",
            Layer::Pool(_) => "pool",
            Layer::Dense(_) => "dense",
            Layer::Relu => "relu",
            Layer::Normalize(_) => "normalize",
            Layer::Flatten => "flatten",
            Layer::Dropout => "dropout",
            Layer::Softmax => "softmax",
        }
    }
}

/// Spatial layers need an `(images, h, w, c)` activation; hitting one
/// after a flatten means the declared architecture is inconsistent.
fn check_spatial(input: &Tensor, what: &str) -> Result<()> {
    if input.rank() != 4 {
        return Err(PercibirError::corrupt_model(format!(
            "{what} layer ran on a rank-{} activation, needs (images, h, w, c)",
            input.rank()
        )));
    }
    Ok(())
}

/// A window larger than the activation means the declared architecture
/// cannot run on its own geometry.
fn check_window(input: &Tensor, window: usize, what: &str) -> Result<()> {
    let dims = input.dims();
    let (h, w) = (dims[1], dims[2]);
    if window > h || window > w {
        return Err(PercibirError::corrupt_model(format!(
            "{what} of {window} does not fit a {h}x{w} activation"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_rejects_bias_mismatch() {
        let kernels = Tensor::zeros(&[4, 3]);
        let bias = Vector::zeros(2);
        assert!(matches!(
            Conv::new(kernels, bias, 2, 1, 0),
            Err(PercibirError::CorruptModel { .. })
        ));
    }

    #[test]
    fn test_conv_forward_checks_channels() {
        // Kernels built for 1 input channel, fed a 2-channel activation.
        let conv = Conv::new(Tensor::zeros(&[4, 1]), Vector::zeros(1), 2, 1, 0).expect("valid");
        let input = Tensor::zeros(&[1, 4, 4, 2]);
        assert!(conv.forward(&input).is_err());
    }

    #[test]
    fn test_dense_rejects_bad_dropout() {
        let result = Dense::new(Tensor::zeros(&[2, 2]), Vector::zeros(2), 1.0);
        assert!(matches!(result, Err(PercibirError::CorruptModel { .. })));
    }

    #[test]
    fn test_dense_dropout_scales_output() {
        let weights = Tensor::from_vec(&[1, 1], vec![1.0]).expect("shape");
        let dense = Dense::new(weights, Vector::zeros(1), 0.5).expect("valid");
        let input = Tensor::from_vec(&[1, 1], vec![8.0]).expect("shape");
        let output = dense.forward(&input).expect("runs");
        assert_eq!(output.as_slice(), &[4.0]);
    }

    #[test]
    fn test_flatten_collapses_spatial_dims() {
        let layer = Layer::Flatten;
        let input = Tensor::zeros(&[2, 3, 3, 4]);
        let output = layer.forward(&input).expect("runs");
        assert_eq!(output.dims(), &[2, 36]);
    }

    #[test]
    fn test_dropout_is_identity() {
        let layer = Layer::Dropout;
        let input = Tensor::from_vec(&[1, 3], vec![1.0, 2.0, 3.0]).expect("shape");
        assert_eq!(layer.forward(&input).expect("runs").as_slice(), input.as_slice());
    }

    #[test]
    fn test_grouped_conv_matches_two_plain_convs() {
        // Two groups of one 1x1 kernel each, identity weights: the output
        // is the input, channel order preserved.
        let kernels = Tensor::from_vec(&[2, 1, 1], vec![1.0, 1.0]).expect("shape");
        let gconv =
            GroupedConv::new(kernels, Vector::zeros(2), 1, 1, 0).expect("valid");
        let input = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).expect("shape");
        let output = gconv.forward(&input).expect("runs");
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn test_grouped_conv_rejects_indivisible_channels() {
        let kernels = Tensor::from_vec(&[2, 1, 1], vec![1.0, 1.0]).expect("shape");
        let gconv = GroupedConv::new(kernels, Vector::zeros(2), 1, 1, 0).expect("valid");
        let input = Tensor::zeros(&[1, 1, 1, 3]);
        assert!(gconv.forward(&input).is_err());
    }

    #[test]
    fn test_spatial_layer_after_flatten_is_rejected() {
        let layer = Layer::Pool(Pool::new(2, 1).expect("valid"));
        let input = Tensor::zeros(&[1, 16]);
        assert!(matches!(
            layer.forward(&input),
            Err(PercibirError::CorruptModel { .. })
        ));
    }

    #[test]
    fn test_pool_window_must_fit() {
        let layer = Layer::Pool(Pool::new(4, 1).expect("valid"));
        let input = Tensor::zeros(&[1, 2, 2, 1]);
        assert!(matches!(
            layer.forward(&input),
            Err(PercibirError::CorruptModel { .. })
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Layer::Relu.kind_name(), "relu");
        assert_eq!(Layer::Softmax.kind_name(), "softmax");
    }
}
