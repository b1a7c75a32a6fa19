//! dx-dsp: DSP primitives for Demix
//!
//! Building blocks shared by the separation pipeline:
//!
//! ## Modules
//! - `window` - Hann analysis/synthesis window (cached per size) and the
//!   triangular cross-fade weight used for segment stitching
//! - `stft` - Centered STFT / ISTFT pair with reflect padding, `1/sqrt(nfft)`
//!   scaling and squared-window overlap-add normalization
//! - `normalize` - Whole-tensor mean/std normalization and its inverse

pub mod normalize;
pub mod stft;
pub mod window;

mod error;

pub use error::{DspError, DspResult};
pub use normalize::{
    NormalizationStats, denormalize, denormalize_in_place, normalize, normalize_in_place, normalize_with,
};
pub use stft::{Stft, reflect_pad};
pub use window::{hann, hann_window, triangular_overlap_weight};

/// Default FFT size (matches the separator's training preprocessing)
pub const DEFAULT_FFT_SIZE: usize = 4096;

/// Epsilon added to the standard deviation of model features
pub const FEATURE_EPSILON: f32 = 1e-5;

/// Epsilon added to the standard deviation of the file-level reference
pub const REFERENCE_EPSILON: f32 = 1e-8;
