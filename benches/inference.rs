//! Benchmarks for the forward pass.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use percibir::image::ImageBuffer;
use percibir::net::{Conv, Dense, InferOptions, InputGeometry, Layer, Network, Pool};
use percibir::primitives::{Tensor, Vector};

fn ramp(count: usize, scale: f32) -> Vec<f32> {
    (0..count).map(|i| i as f32 * scale - 0.5).collect()
}

fn bench_network() -> Network {
    let geometry = InputGeometry {
        rescaled_size: 32,
        input_size: 24,
        channels: 3,
    };
    let mean = Tensor::from_vec(&[32, 32, 3], vec![120.0; 32 * 32 * 3]).expect("mean");
    let conv = Conv::new(
        Tensor::from_vec(&[75, 8], ramp(600, 0.001)).expect("kernels"),
        Vector::zeros(8),
        5,
        2,
        2,
    )
    .expect("conv");
    // Conv output is 12x12x8; pool to 6x6x8, then score 4 classes.
    let dense = Dense::new(
        Tensor::from_vec(&[288, 4], ramp(288 * 4, 0.0005)).expect("weights"),
        Vector::zeros(4),
        0.0,
    )
    .expect("dense");
    Network::from_parts(
        geometry,
        mean,
        vec![
            Layer::Conv(conv),
            Layer::Relu,
            Layer::Pool(Pool::new(2, 2).expect("pool")),
            Layer::Flatten,
            Layer::Dense(dense),
            Layer::Softmax,
        ],
        (0..4).map(|i| format!("class_{i}")).collect(),
    )
    .expect("network")
}

fn bench_image() -> ImageBuffer {
    let bytes: Vec<u8> = (0..64 * 64 * 3).map(|i| (i % 256) as u8).collect();
    ImageBuffer::from_raw_pixels(&bytes, 64, 64, 3, 64 * 3, false, false).expect("image")
}

fn bench_forward_pass(c: &mut Criterion) {
    let network = bench_network();
    let image = bench_image();

    c.bench_function("infer_center_crop", |b| {
        b.iter(|| {
            network
                .infer(black_box(&image), &InferOptions::default())
                .expect("inference")
        });
    });

    c.bench_function("infer_multi_sample", |b| {
        b.iter(|| {
            network
                .infer(
                    black_box(&image),
                    &InferOptions::default().with_multi_sample(true),
                )
                .expect("inference")
        });
    });
}

criterion_group!(benches, bench_forward_pass);
criterion_main!(benches);
