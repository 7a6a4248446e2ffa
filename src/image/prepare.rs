//! Input preparation: resampling an [`ImageBuffer`] into the network's
//! canonical input batch.
//!
//! The network sees fixed-geometry inputs: the image is bilinearly
//! rescaled to the model's rescaled size, one or more crops of the model's
//! input size are taken, and the model's mean tensor is subtracted from
//! each crop.

use super::ImageBuffer;
use crate::primitives::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How crops are sampled from the rescaled image.
///
/// Every plan is deterministic: [`SamplePlan::Random`] carries its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePlan {
    /// A single center crop.
    Center,
    /// Ten crops: center plus the four corners, each plain and
    /// horizontally flipped. Averaging their scores trades latency for
    /// robustness.
    TenCrop,
    /// A single crop at a seeded pseudo-random offset.
    Random(u64),
}

impl SamplePlan {
    /// Number of samples this plan produces.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        match self {
            SamplePlan::Center | SamplePlan::Random(_) => 1,
            SamplePlan::TenCrop => 10,
        }
    }
}

/// Prepares caller images for a specific network's input geometry.
#[derive(Debug, Clone)]
pub struct InputPreparer {
    /// Mean tensor at crop size, subtracted from every sample.
    mean: Tensor,
    rescaled_size: usize,
    input_size: usize,
    channels: usize,
}

impl InputPreparer {
    /// Creates a preparer. `mean` must be `(input_size, input_size,
    /// channels)`; the network loader center-crops the stored mean to this
    /// shape.
    ///
    /// # Panics
    ///
    /// Panics if the mean shape disagrees with the geometry; the loader
    /// establishes this invariant before constructing a preparer.
    #[must_use]
    pub fn new(mean: Tensor, rescaled_size: usize, input_size: usize, channels: usize) -> Self {
        assert_eq!(mean.dims(), &[input_size, input_size, channels]);
        assert!(rescaled_size >= input_size);
        Self {
            mean,
            rescaled_size,
            input_size,
            channels,
        }
    }

    /// Produces the input batch `(samples, input, input, channels)` for an
    /// image under the given sample plan.
    #[must_use]
    pub fn prepare(&self, image: &ImageBuffer, plan: SamplePlan) -> Tensor {
        let rescaled = rescale_bilinear(image, self.rescaled_size, self.channels);
        let delta = self.rescaled_size - self.input_size;
        let margin = delta / 2;

        let count = plan.sample_count();
        let mut batch = Tensor::zeros(&[count, self.input_size, self.input_size, self.channels]);

        match plan {
            SamplePlan::Center => {
                self.blit_sample(&mut batch, 0, &rescaled, margin, margin, false);
            }
            SamplePlan::Random(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let x = if delta == 0 { 0 } else { rng.gen_range(0..=delta) };
                let y = if delta == 0 { 0 } else { rng.gen_range(0..=delta) };
                self.blit_sample(&mut batch, 0, &rescaled, x, y, false);
            }
            SamplePlan::TenCrop => {
                for (pass, flip) in [false, true].into_iter().enumerate() {
                    let base = pass * 5;
                    self.blit_sample(&mut batch, base, &rescaled, margin, margin, flip);
                    for y_index in 0..2 {
                        for x_index in 0..2 {
                            let sample = base + y_index * 2 + x_index + 1;
                            self.blit_sample(
                                &mut batch,
                                sample,
                                &rescaled,
                                x_index * delta,
                                y_index * delta,
                                flip,
                            );
                        }
                    }
                }
            }
        }

        batch
    }

    /// Crops `(offset_x, offset_y)` out of the rescaled image into batch
    /// entry `sample`, optionally mirrored, and subtracts the mean.
    fn blit_sample(
        &self,
        batch: &mut Tensor,
        sample: usize,
        rescaled: &Tensor,
        offset_x: usize,
        offset_y: usize,
        flip_horizontal: bool,
    ) {
        let size = self.input_size;
        let channels = self.channels;
        let rescaled_data = rescaled.as_slice();
        let mean_data = self.mean.as_slice();
        let dest = batch.first_dim_slice_mut(sample);

        for y in 0..size {
            let src_row = ((y + offset_y) * self.rescaled_size + offset_x) * channels;
            for x in 0..size {
                let src_x = if flip_horizontal { size - 1 - x } else { x };
                let src = src_row + src_x * channels;
                let out = (y * size + x) * channels;
                for c in 0..channels {
                    dest[out + c] = rescaled_data[src + c] - mean_data[out + c];
                }
            }
        }
    }
}

/// Bilinearly resamples an image to `(size, size, channels)`.
///
/// Missing source channels are zero-filled and extra source channels are
/// dropped, so a grayscale or RGBA caller image feeds an RGB network
/// without a separate conversion pass.
#[must_use]
pub fn rescale_bilinear(image: &ImageBuffer, size: usize, channels: usize) -> Tensor {
    let in_w = image.width();
    let in_h = image.height();
    let in_c = image.channels();
    let src = image.pixels().as_slice();

    let mut output = Tensor::zeros(&[size, size, channels]);
    let dest = output.as_mut_slice();

    let channels_to_write = channels.min(in_c);
    let scale_x = in_w as f32 / size as f32;
    let scale_y = in_h as f32 / size as f32;

    for out_y in 0..size {
        let in_y = out_y as f32 * scale_y;
        let y0 = (in_y.floor() as usize).min(in_h - 1);
        let y1 = (in_y.ceil() as usize).min(in_h - 1);
        let fy = in_y - y0 as f32;
        for out_x in 0..size {
            let in_x = out_x as f32 * scale_x;
            let x0 = (in_x.floor() as usize).min(in_w - 1);
            let x1 = (in_x.ceil() as usize).min(in_w - 1);
            let fx = in_x - x0 as f32;

            let base00 = (y0 * in_w + x0) * in_c;
            let base01 = (y0 * in_w + x1) * in_c;
            let base10 = (y1 * in_w + x0) * in_c;
            let base11 = (y1 * in_w + x1) * in_c;
            let out = (out_y * size + out_x) * channels;

            for c in 0..channels_to_write {
                let top = src[base00 + c] * (1.0 - fx) + src[base01 + c] * fx;
                let bottom = src[base10 + c] * (1.0 - fx) + src[base11 + c] * fx;
                dest[out + c] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_image(width: usize, height: usize, value: u8) -> ImageBuffer {
        let bytes = vec![value; width * height * 3];
        ImageBuffer::from_raw_pixels(&bytes, width, height, 3, width * 3, false, false)
            .expect("valid image")
    }

    fn identity_preparer(input: usize, rescaled: usize) -> InputPreparer {
        InputPreparer::new(Tensor::zeros(&[input, input, 3]), rescaled, input, 3)
    }

    #[test]
    fn test_rescale_uniform_stays_uniform() {
        let image = uniform_image(17, 9, 100);
        let rescaled = rescale_bilinear(&image, 8, 3);
        assert_eq!(rescaled.dims(), &[8, 8, 3]);
        for &v in rescaled.as_slice() {
            assert!((v - 100.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_rescale_zero_fills_missing_channels() {
        let bytes = vec![200u8; 4 * 4];
        let gray = ImageBuffer::from_raw_pixels(&bytes, 4, 4, 1, 4, false, false).expect("valid");
        let rescaled = rescale_bilinear(&gray, 4, 3);
        let data = rescaled.as_slice();
        assert!((data[0] - 200.0).abs() < 1e-3);
        assert_eq!(data[1], 0.0);
        assert_eq!(data[2], 0.0);
    }

    #[test]
    fn test_center_plan_shape_and_mean_subtraction() {
        let preparer = InputPreparer::new(
            Tensor::from_vec(&[2, 2, 3], vec![10.0; 12]).expect("mean"),
            4,
            2,
            3,
        );
        let image = uniform_image(8, 8, 50);
        let batch = preparer.prepare(&image, SamplePlan::Center);
        assert_eq!(batch.dims(), &[1, 2, 2, 3]);
        for &v in batch.as_slice() {
            assert!((v - 40.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_ten_crop_count_and_flip_symmetry() {
        let preparer = identity_preparer(4, 6);
        let image = uniform_image(12, 12, 77);
        let batch = preparer.prepare(&image, SamplePlan::TenCrop);
        assert_eq!(batch.dims(), &[10, 4, 4, 3]);
        // A uniform image is flip-invariant, so all ten samples agree.
        let first = batch.first_dim_slice(0).to_vec();
        for sample in 1..10 {
            assert_eq!(batch.first_dim_slice(sample), &first[..]);
        }
    }

    #[test]
    fn test_random_plan_is_deterministic() {
        let preparer = identity_preparer(4, 8);
        let image = uniform_image(16, 10, 3);
        let a = preparer.prepare(&image, SamplePlan::Random(42));
        let b = preparer.prepare(&image, SamplePlan::Random(42));
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_sample_counts() {
        assert_eq!(SamplePlan::Center.sample_count(), 1);
        assert_eq!(SamplePlan::TenCrop.sample_count(), 10);
        assert_eq!(SamplePlan::Random(7).sample_count(), 1);
    }
}
