//! f32 kernels for the forward pass.
//!
//! Activations are `(images, height, width, channels)` tensors until a
//! flatten or dense layer collapses them to `(images, units)`. All output
//! extents follow `floor((input - window) / stride) + 1`.

use crate::primitives::{Tensor, Vector};

/// Zero-pads the spatial dimensions by `margin` on every side.
#[must_use]
pub fn insert_margin(input: &Tensor, margin: usize) -> Tensor {
    let [n, h, w, c] = spatial_dims(input);
    let out_h = h + 2 * margin;
    let out_w = w + 2 * margin;
    let mut output = Tensor::zeros(&[n, out_h, out_w, c]);
    let src = input.as_slice();
    let dest = output.as_mut_slice();
    let row = w * c;
    for image in 0..n {
        for y in 0..h {
            let src_base = (image * h + y) * row;
            let dest_base = ((image * out_h + y + margin) * out_w + margin) * c;
            dest[dest_base..dest_base + row].copy_from_slice(&src[src_base..src_base + row]);
        }
    }
    output
}

/// Cross-correlates every `kernel_size` square patch with each kernel.
///
/// `kernels` is `(kernel_size * kernel_size * channels, kernel_count)`:
/// one column per kernel, rows in patch order. Output is `(images, out_h,
/// out_w, kernel_count)`.
#[must_use]
pub fn correlate(
    input: &Tensor,
    kernels: &Tensor,
    kernel_size: usize,
    kernel_count: usize,
    stride: usize,
) -> Tensor {
    let [n, h, w, c] = spatial_dims(input);
    let out_h = (h - kernel_size) / stride + 1;
    let out_w = (w - kernel_size) / stride + 1;
    let mut output = Tensor::zeros(&[n, out_h, out_w, kernel_count]);

    let src = input.as_slice();
    let weights = kernels.as_slice();
    let dest = output.as_mut_slice();

    for image in 0..n {
        for out_y in 0..out_h {
            let y0 = out_y * stride;
            for out_x in 0..out_w {
                let x0 = out_x * stride;
                let acc_base = ((image * out_h + out_y) * out_w + out_x) * kernel_count;
                let acc = &mut dest[acc_base..acc_base + kernel_count];
                let mut value_index = 0;
                for ky in 0..kernel_size {
                    let row_base = ((image * h + y0 + ky) * w + x0) * c;
                    for &x in &src[row_base..row_base + kernel_size * c] {
                        let row = &weights[value_index * kernel_count..][..kernel_count];
                        for (a, &k) in acc.iter_mut().zip(row) {
                            *a += x * k;
                        }
                        value_index += 1;
                    }
                }
            }
        }
    }

    output
}

/// Max pooling over `size` square patches.
#[must_use]
pub fn max_patch(input: &Tensor, size: usize, stride: usize) -> Tensor {
    let [n, h, w, c] = spatial_dims(input);
    let out_h = (h - size) / stride + 1;
    let out_w = (w - size) / stride + 1;
    let mut output = Tensor::zeros(&[n, out_h, out_w, c]);
    let src = input.as_slice();
    let dest = output.as_mut_slice();

    for image in 0..n {
        for out_y in 0..out_h {
            for out_x in 0..out_w {
                let out_base = ((image * out_h + out_y) * out_w + out_x) * c;
                for channel in 0..c {
                    let mut best = f32::NEG_INFINITY;
                    for ky in 0..size {
                        let y = out_y * stride + ky;
                        for kx in 0..size {
                            let x = out_x * stride + kx;
                            let v = src[((image * h + y) * w + x) * c + channel];
                            if v > best {
                                best = v;
                            }
                        }
                    }
                    dest[out_base + channel] = best;
                }
            }
        }
    }

    output
}

/// Local response normalization across channels.
///
/// For each position, a rolling window of squared magnitudes scales each
/// channel by `(k + (alpha / window) * sum)^-beta`.
#[must_use]
pub fn local_response(input: &Tensor, window: usize, k: f32, alpha: f32, beta: f32) -> Tensor {
    let [_, _, _, channels] = spatial_dims(input);
    let mut output = Tensor::zeros(input.dims());
    let src = input.as_slice();
    let dest = output.as_mut_slice();

    let alpha_over_size = alpha / window as f32;
    let half = window / 2;
    let mut squares = vec![0.0f32; channels];

    let mut base = 0;
    while base < src.len() {
        let pixel = &src[base..base + channels];
        for (s, &v) in squares.iter_mut().zip(pixel) {
            *s = v * v * alpha_over_size;
        }
        let mut windowed: f32 = squares[..half.min(channels)].iter().sum();
        for channel in 0..channels {
            if channel + half < channels {
                windowed += squares[channel + half];
            }
            let magnitude = k + windowed;
            dest[base + channel] = pixel[channel] * magnitude.powf(-beta);
            if channel >= half {
                windowed -= squares[channel - half];
            }
        }
        base += channels;
    }

    output
}

/// Elementwise `max(0, x)`.
#[must_use]
pub fn relu(input: &Tensor) -> Tensor {
    let mut output = input.clone();
    for v in output.as_mut_slice() {
        *v = v.max(0.0);
    }
    output
}

/// Row-wise softmax over `(images, units)`.
#[must_use]
pub fn softmax_rows(input: &Tensor) -> Tensor {
    let mut output = input.clone();
    let rows = output.dims()[0];
    for row in 0..rows {
        let data = output.first_dim_slice_mut(row);
        let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0;
        for v in data.iter_mut() {
            *v = (*v - max).exp();
            total += *v;
        }
        if total > 0.0 {
            for v in data.iter_mut() {
                *v /= total;
            }
        }
    }
    output
}

/// Fully connected layer: flattens each image and multiplies by
/// `(input_units, output_units)` weights.
#[must_use]
pub fn dense(input: &Tensor, weights: &Tensor, output_units: usize) -> Tensor {
    let images = input.dims()[0];
    let input_units = input.stride_of_first();
    debug_assert_eq!(weights.dims(), &[input_units, output_units]);

    let mut output = Tensor::zeros(&[images, output_units]);
    let src = input.as_slice();
    let w = weights.as_slice();
    let dest = output.as_mut_slice();

    for image in 0..images {
        let row = &src[image * input_units..(image + 1) * input_units];
        let out = &mut dest[image * output_units..(image + 1) * output_units];
        for (value_index, &x) in row.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let w_row = &w[value_index * output_units..][..output_units];
            for (o, &k) in out.iter_mut().zip(w_row) {
                *o += x * k;
            }
        }
    }

    output
}

/// Adds a per-channel bias along the last dimension.
pub fn add_channel_bias(output: &mut Tensor, bias: &Vector<f32>) {
    let channels = bias.len();
    for (i, v) in output.as_mut_slice().iter_mut().enumerate() {
        *v += bias[i % channels];
    }
}

/// Scales every element in place.
pub fn scale_inplace(output: &mut Tensor, scale: f32) {
    for v in output.as_mut_slice() {
        *v *= scale;
    }
}

/// Extracts a channel range from `(images, h, w, c)`.
#[must_use]
pub fn channel_slice(input: &Tensor, start: usize, count: usize) -> Tensor {
    let [n, h, w, c] = spatial_dims(input);
    let mut output = Tensor::zeros(&[n, h, w, count]);
    let src = input.as_slice();
    let dest = output.as_mut_slice();
    for pixel in 0..n * h * w {
        let src_base = pixel * c + start;
        dest[pixel * count..(pixel + 1) * count].copy_from_slice(&src[src_base..src_base + count]);
    }
    output
}

/// Concatenates same-geometry tensors along the channel dimension.
///
/// # Panics
///
/// Panics if `parts` is empty or geometries disagree; callers pass the
/// per-group outputs of one grouped convolution.
#[must_use]
pub fn channel_concat(parts: &[Tensor]) -> Tensor {
    let [n, h, w, _] = spatial_dims(&parts[0]);
    let total: usize = parts.iter().map(|p| p.dims()[3]).sum();
    let mut output = Tensor::zeros(&[n, h, w, total]);
    let dest = output.as_mut_slice();
    for pixel in 0..n * h * w {
        let mut offset = pixel * total;
        for part in parts {
            let c = part.dims()[3];
            let src = &part.as_slice()[pixel * c..(pixel + 1) * c];
            dest[offset..offset + c].copy_from_slice(src);
            offset += c;
        }
    }
    output
}

/// Column-wise mean of `(rows, units)`, the multi-sample average.
#[must_use]
pub fn mean_rows(input: &Tensor) -> Vector<f32> {
    let rows = input.dims()[0];
    let units = input.stride_of_first();
    let mut mean = vec![0.0f32; units];
    for row in 0..rows {
        for (m, &v) in mean.iter_mut().zip(input.first_dim_slice(row)) {
            *m += v;
        }
    }
    let scale = 1.0 / rows as f32;
    for m in &mut mean {
        *m *= scale;
    }
    Vector::from_vec(mean)
}

fn spatial_dims(input: &Tensor) -> [usize; 4] {
    let dims = input.dims();
    assert_eq!(dims.len(), 4, "expected an (images, h, w, c) activation");
    [dims[0], dims[1], dims[2], dims[3]]
}
