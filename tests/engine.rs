//! End-to-end engine test: author a small model file, load it back, and
//! drive the whole surface — classification, feature extraction, online
//! training, predictor persistence.

use percibir::classify::{classify, DEFAULT_SCORE_THRESHOLD};
use percibir::image::ImageBuffer;
use percibir::linear::{Predictor, Trainer};
use percibir::net::{
    Conv, Dense, GroupedConv, InferOptions, InputGeometry, Layer, Network, Normalize, Pool,
};
use percibir::primitives::{Tensor, Vector};
use std::io::Write;

/// A deterministic weight ramp so the fixture has no randomness.
fn ramp(count: usize, scale: f32, offset: f32) -> Vec<f32> {
    (0..count).map(|i| i as f32 * scale + offset).collect()
}

/// A small but representative network: conv, relu, LRN, pool, grouped
/// conv, relu, flatten, dense, softmax over three labels.
fn build_network() -> Network {
    let geometry = InputGeometry {
        rescaled_size: 8,
        input_size: 6,
        channels: 3,
    };
    let mean = Tensor::from_vec(&[8, 8, 3], vec![128.0; 8 * 8 * 3]).expect("mean shape");

    let conv = Conv::new(
        Tensor::from_vec(&[27, 4], ramp(27 * 4, 0.001, -0.05)).expect("kernel shape"),
        Vector::from_slice(&[0.0, 0.05, -0.05, 0.1]),
        3,
        1,
        1,
    )
    .expect("conv");
    let gconv = GroupedConv::new(
        Tensor::from_vec(&[2, 2, 2], ramp(8, 0.05, -0.1)).expect("kernel shape"),
        Vector::zeros(4),
        1,
        1,
        0,
    )
    .expect("gconv");
    let dense = Dense::new(
        Tensor::from_vec(&[36, 3], ramp(36 * 3, 0.002, -0.1)).expect("weight shape"),
        Vector::from_slice(&[0.1, 0.0, -0.1]),
        0.5,
    )
    .expect("dense");

    Network::from_parts(
        geometry,
        mean,
        vec![
            Layer::Conv(conv),
            Layer::Relu,
            Layer::Normalize(Normalize::new(3, 2.0, 1e-4, 0.75).expect("lrn")),
            Layer::Pool(Pool::new(2, 2).expect("pool")),
            Layer::GroupedConv(gconv),
            Layer::Relu,
            Layer::Flatten,
            Layer::Dense(dense),
            Layer::Softmax,
        ],
        vec!["cat".to_string(), "dog".to_string(), "hat".to_string()],
    )
    .expect("network")
}

fn checker_image(bright: u8) -> ImageBuffer {
    let mut bytes = vec![0u8; 12 * 12 * 3];
    for y in 0..12 {
        for x in 0..12 {
            if (x + y) % 2 == 0 {
                let base = (y * 12 + x) * 3;
                bytes[base] = bright;
                bytes[base + 1] = bright / 2;
                bytes[base + 2] = 255 - bright;
            }
        }
    }
    ImageBuffer::from_raw_pixels(&bytes, 12, 12, 3, 36, false, false).expect("image")
}

#[test]
fn model_file_roundtrip_drives_classification() {
    let network = build_network();
    let model_file = tempfile::NamedTempFile::new().expect("temp file");
    network.save(model_file.path()).expect("save model");
    let loaded = Network::load(model_file.path()).expect("load model");
    assert_eq!(loaded.labels(), ["cat", "dog", "hat"]);

    let image = checker_image(220);
    let predictions =
        classify(&loaded, &image, &InferOptions::default()).expect("classification");
    assert_eq!(predictions.len(), 3);
    let total: f32 = predictions.iter().map(|p| p.score).sum();
    assert!((total - 1.0).abs() < 1e-4, "softmax scores sum to {total}");

    // Ranked output is sorted descending and respects the threshold.
    let ranked = predictions.ranked(DEFAULT_SCORE_THRESHOLD);
    for pair in ranked.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for p in &ranked {
        assert!(p.score >= DEFAULT_SCORE_THRESHOLD);
    }

    // The loaded network classifies exactly like the one in memory.
    let original = classify(&network, &image, &InferOptions::default()).expect("original");
    assert_eq!(predictions, original);
}

#[test]
fn classification_from_netpbm_file() {
    let network = build_network();
    let mut ppm = tempfile::NamedTempFile::new().expect("temp file");
    ppm.write_all(b"P6\n12 12\n255\n").expect("header");
    let body: Vec<u8> = (0..12 * 12 * 3).map(|i| (i % 251) as u8).collect();
    ppm.write_all(&body).expect("payload");

    let image = ImageBuffer::from_file(ppm.path()).expect("decode");
    let predictions = classify(&network, &image, &InferOptions::default()).expect("classify");
    assert_eq!(predictions.len(), network.labels().len());
}

#[test]
fn feature_extraction_feeds_the_trainer() {
    let network = build_network();
    // Two layers from the end: stop after flatten, 36 units.
    let feature_options = InferOptions::default().with_layer_offset(2);

    let bright = network
        .infer(&checker_image(240), &feature_options)
        .expect("bright features");
    let dark = network
        .infer(&checker_image(20), &feature_options)
        .expect("dark features");
    assert_eq!(bright.len(), 36);
    assert_eq!(dark.len(), 36);

    let mut trainer = Trainer::new();
    for _ in 0..3 {
        trainer.train(1.0, bright.as_slice()).expect("train bright");
        trainer.train(0.0, dark.as_slice()).expect("train dark");
    }
    let predictor = trainer.finalize().expect("finalize");

    let bright_score = predictor.predict(bright.as_slice()).expect("predict");
    let dark_score = predictor.predict(dark.as_slice()).expect("predict");
    assert!(
        bright_score > dark_score,
        "expected separation, got {bright_score} vs {dark_score}"
    );

    // Persisted predictor scores identically.
    let predictor_file = tempfile::NamedTempFile::new().expect("temp file");
    predictor.save(predictor_file.path()).expect("save");
    let loaded = Predictor::load(predictor_file.path()).expect("load");
    assert_eq!(
        loaded.predict(bright.as_slice()).expect("predict"),
        bright_score
    );
}

#[test]
fn multi_sample_stays_close_on_a_uniform_image() {
    let network = build_network();
    let bytes = vec![128u8; 12 * 12 * 3];
    let image = ImageBuffer::from_raw_pixels(&bytes, 12, 12, 3, 36, false, false).expect("image");

    let single = network
        .infer(&image, &InferOptions::default())
        .expect("single");
    let multi = network
        .infer(&image, &InferOptions::default().with_multi_sample(true))
        .expect("multi");
    assert_eq!(single.len(), multi.len());
    for (a, b) in single.iter().zip(multi.iter()) {
        assert!((a - b).abs() < 1e-3, "multi-sample drifted: {a} vs {b}");
    }
}

#[test]
fn concurrent_classification_shares_one_network() {
    use std::sync::Arc;

    let network = Arc::new(build_network());
    let reference = classify(&network, &checker_image(200), &InferOptions::default())
        .expect("reference");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let network = Arc::clone(&network);
            std::thread::spawn(move || {
                classify(&network, &checker_image(200), &InferOptions::default())
                    .expect("classify in thread")
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().expect("thread");
        assert_eq!(result, reference);
    }
}
