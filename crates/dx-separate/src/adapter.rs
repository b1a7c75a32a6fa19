//! Model adapter
//!
//! Binds the pipeline's fixed-rank tensors to the backend's I/O contract:
//! - `pack`: reshape the normalized mix and CAC features into model inputs
//! - `unpack`: verify the raw outputs and reshape them to fixed rank
//!
//! No numeric change happens here. A backend that returns the wrong number
//! of elements is rejected, never truncated or padded.

use ndarray::{Array3, Array4, ArrayD, ArrayView2, ArrayView4, Axis};

use crate::config::SeparationConfig;
use crate::error::{SeparationError, SeparationResult};
use crate::tensor::{CHANNELS, ModelInputs, ModelOutput, RawModelOutput};

// ═══════════════════════════════════════════════════════════════════════════════
// INFERENCE BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// The opaque separation model: `infer(mix, mag) -> (x, xt)`
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name for logs and reports
    fn name(&self) -> &str;

    /// Run the model once.
    ///
    /// * `mix` - `[1, 1, channels, segment_length]`
    /// * `mag` - `[1, channels * 2, freq_bins, frames]`
    fn infer(&self, mix: ArrayView4<f32>, mag: ArrayView4<f32>) -> SeparationResult<RawModelOutput>;

    /// Whether `infer` may be called from several threads at once
    fn supports_concurrent_sessions(&self) -> bool {
        false
    }
}

/// Any thread-safe function can act as a backend
impl<F> InferenceBackend for F
where
    F: Fn(ArrayView4<f32>, ArrayView4<f32>) -> SeparationResult<RawModelOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    fn infer(&self, mix: ArrayView4<f32>, mag: ArrayView4<f32>) -> SeparationResult<RawModelOutput> {
        self(mix, mag)
    }

    fn supports_concurrent_sessions(&self) -> bool {
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL ADAPTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Expected tensor geometry of one model call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAdapter {
    pub stems: usize,
    pub channels: usize,
    pub freq_bins: usize,
    pub frames: usize,
    pub segment_length: usize,
}

impl ModelAdapter {
    pub fn from_config(config: &SeparationConfig) -> Self {
        Self {
            stems: config.num_stems(),
            channels: CHANNELS,
            freq_bins: config.freq_bins(),
            frames: config.frames(),
            segment_length: config.segment_length(),
        }
    }

    /// Shape of the `mix` input
    pub fn mix_shape(&self) -> [usize; 4] {
        [1, 1, self.channels, self.segment_length]
    }

    /// Shape of the `mag` input
    pub fn mag_shape(&self) -> [usize; 4] {
        [1, self.channels * 2, self.freq_bins, self.frames]
    }

    /// Reshape `[channels, segment_length]` and the CAC features into model inputs
    pub fn pack(&self, mix: ArrayView2<f32>, mag: Array4<f32>) -> SeparationResult<ModelInputs> {
        let expected_mix = [self.channels, self.segment_length];
        if mix.shape() != expected_mix {
            return Err(SeparationError::ContractViolation(format!(
                "mix shape {:?}, adapter expects {:?}",
                mix.shape(),
                expected_mix
            )));
        }
        if mag.shape() != self.mag_shape() {
            return Err(SeparationError::ContractViolation(format!(
                "mag shape {:?}, adapter expects {:?}",
                mag.shape(),
                self.mag_shape()
            )));
        }

        let mix = mix.to_owned().insert_axis(Axis(0)).insert_axis(Axis(0));
        Ok(ModelInputs { mix, mag })
    }

    /// Verify and reshape the backend output.
    ///
    /// `x` must hold exactly `stems * channels * 2 * freq_bins * frames`
    /// elements with trailing dims `[freq_bins, frames]`; `xt` exactly
    /// `stems * channels * segment_length` with trailing dim `segment_length`.
    pub fn unpack(&self, raw: RawModelOutput) -> SeparationResult<ModelOutput> {
        let x_shape = (self.stems, self.channels * 2, self.freq_bins, self.frames);
        let xt_shape = (self.stems, self.channels, self.segment_length);

        let x_elements = x_shape.0 * x_shape.1 * x_shape.2 * x_shape.3;
        let xt_elements = xt_shape.0 * xt_shape.1 * xt_shape.2;
        check_layout("x", &raw.x, x_elements, &[self.freq_bins, self.frames])?;
        check_layout("xt", &raw.xt, xt_elements, &[self.segment_length])?;

        // Logical (row-major) order, whatever the backend's memory layout
        let mask = Array4::from_shape_vec(x_shape, raw.x.iter().copied().collect())
            .map_err(|e| SeparationError::ContractViolation(e.to_string()))?;
        let residual = Array3::from_shape_vec(xt_shape, raw.xt.iter().copied().collect())
            .map_err(|e| SeparationError::ContractViolation(e.to_string()))?;

        Ok(ModelOutput { mask, residual })
    }
}

fn check_layout(tensor: &'static str, array: &ArrayD<f32>, elements: usize, trailing: &[usize]) -> SeparationResult<()> {
    let shape = array.shape();
    let trailing_ok = shape.len() >= trailing.len() && shape[shape.len() - trailing.len()..] == *trailing;

    if array.len() != elements || !trailing_ok {
        return Err(SeparationError::OutputShape {
            tensor,
            expected: format!("{} elements ending in {:?}", elements, trailing),
            got: format!("{} elements with shape {:?}", array.len(), shape),
        });
    }
    Ok(())
}
