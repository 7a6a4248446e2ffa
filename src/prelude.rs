//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use percibir::prelude::*;
//! ```

pub use crate::classify::{classify, Prediction, PredictionSet, DEFAULT_SCORE_THRESHOLD};
pub use crate::error::{PercibirError, Result};
pub use crate::image::ImageBuffer;
pub use crate::linear::{Predictor, Trainer};
pub use crate::net::{InferOptions, Network};
pub use crate::primitives::{Tensor, Vector};
