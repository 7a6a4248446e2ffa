//! Percibir: convolutional network inference with an online linear
//! classifier in pure Rust.
//!
//! Percibir loads a pretrained convolutional network from a binary model
//! file and classifies images against its label table. Intermediate-layer
//! activations double as feature vectors for a lightweight online
//! trainer, so a caller can teach a custom two-class predictor on top of
//! the network's features and persist it.
//!
//! # Quick Start
//!
//! ```no_run
//! use percibir::prelude::*;
//!
//! // One network serves many classifications; wrap it in an Arc to
//! // share across threads.
//! let network = Network::load("model.pcn")?;
//!
//! let image = ImageBuffer::from_file("photo.ppm")?;
//! let predictions = classify(&network, &image, &InferOptions::default())?;
//! for p in predictions.ranked(DEFAULT_SCORE_THRESHOLD) {
//!     println!("{}: {:.2}", p.name, p.score);
//! }
//!
//! // Feature extraction two layers from the end, then a custom
//! // predictor on top.
//! let features = network.infer(&image, &InferOptions::default().with_layer_offset(2))?;
//! let mut trainer = Trainer::new();
//! trainer.train(1.0, features.as_slice())?;
//! let predictor = trainer.finalize()?;
//! predictor.save("custom.pcp")?;
//! # Ok::<(), percibir::error::PercibirError>(())
//! ```
//!
//! # Modules
//!
//! - [`primitives`]: Core Vector and Tensor types
//! - [`image`]: Validated pixel buffers and input preparation
//! - [`net`]: Network loading and forward inference
//! - [`classify`]: Named, rankable prediction sets
//! - [`linear`]: Online trainer and linear predictor
//! - [`format`]: Binary model and predictor file codecs
//! - [`error`]: Crate-wide error type

pub mod classify;
pub mod error;
pub mod format;
pub mod image;
pub mod linear;
pub mod net;
pub mod prelude;
pub mod primitives;

pub use error::{PercibirError, Result};
pub use primitives::{Tensor, Vector};
