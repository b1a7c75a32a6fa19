//! Tensor value types exchanged between pipeline stages
//!
//! Every tensor has a fixed rank; the layout of each axis is part of the type
//! documentation below.

use ndarray::{Array2, Array3, Array4, ArrayD, ArrayView1, ArrayView2, Axis};

use crate::error::{SeparationError, SeparationResult};

/// Channels every waveform is canonicalized to
pub const CHANNELS: usize = 2;

/// Stereo PCM, `[2, length]`
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    data: Array2<f32>,
    sample_rate: u32,
}

impl Waveform {
    /// Build from interleaved samples with any channel count. Mono is
    /// duplicated to both sides, channels past the second are dropped.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> SeparationResult<Self> {
        if channels == 0 {
            return Err(SeparationError::InvalidInput("zero channels".into()));
        }
        if samples.len() % channels != 0 {
            return Err(SeparationError::InvalidInput(format!(
                "{} interleaved samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        let frames = samples.len() / channels;
        let mut data = Array2::<f32>::zeros((CHANNELS, frames));
        for (i, frame) in samples.chunks_exact(channels).enumerate() {
            let left = frame[0];
            let right = if channels == 1 { frame[0] } else { frame[1] };
            data[[0, i]] = left;
            data[[1, i]] = right;
        }

        Self::from_array(data, sample_rate)
    }

    /// Build from two channel vectors of equal length
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> SeparationResult<Self> {
        if left.len() != right.len() {
            return Err(SeparationError::InvalidInput(format!(
                "channel lengths differ: {} vs {}",
                left.len(),
                right.len()
            )));
        }

        let length = left.len();
        let mut flat = left;
        flat.extend(right);
        let data = Array2::from_shape_vec((CHANNELS, length), flat)
            .map_err(|e| SeparationError::ContractViolation(e.to_string()))?;

        Self::from_array(data, sample_rate)
    }

    /// Wrap a `[2, length]` array
    pub fn from_array(data: Array2<f32>, sample_rate: u32) -> SeparationResult<Self> {
        if data.nrows() != CHANNELS {
            return Err(SeparationError::InvalidInput(format!(
                "expected {} channels, got {}",
                CHANNELS,
                data.nrows()
            )));
        }
        if sample_rate == 0 {
            return Err(SeparationError::InvalidInput("sample rate must be > 0".into()));
        }
        Ok(Self { data, sample_rate })
    }

    /// Silence of `length` samples
    pub fn silence(length: usize, sample_rate: u32) -> SeparationResult<Self> {
        Self::from_array(Array2::zeros((CHANNELS, length)), sample_rate)
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// One channel (0 = left, 1 = right)
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }
}

/// What the adapter hands to the backend
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// Normalized time-domain mix, `[1, 1, channels, segment_length]`
    pub mix: Array4<f32>,
    /// Normalized CAC spectrogram, `[1, channels * 2, freq_bins, frames]`
    pub mag: Array4<f32>,
}

/// Backend output before any shape checking
#[derive(Debug, Clone)]
pub struct RawModelOutput {
    /// Masked spectrum in CAC layout, any rank
    pub x: ArrayD<f32>,
    /// Time-domain residual, any rank
    pub xt: ArrayD<f32>,
}

/// Model output after the adapter verified and reshaped it
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[stems, channels * 2, freq_bins, frames]`
    pub mask: Array4<f32>,
    /// `[stems, channels, segment_length]`
    pub residual: Array3<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let wf = Waveform::from_interleaved(&[0.1, 0.2, 0.3], 1, 44100).unwrap();
        assert_eq!(wf.len(), 3);
        assert_eq!(wf.channel(0), wf.channel(1));
        assert_eq!(wf.channel(1)[2], 0.3);
    }

    #[test]
    fn test_extra_channels_dropped() {
        let samples = [1.0, 2.0, 9.0, 9.0, 3.0, 4.0, 9.0, 9.0];
        let wf = Waveform::from_interleaved(&samples, 4, 48000).unwrap();
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.channel(0).to_vec(), vec![1.0, 3.0]);
        assert_eq!(wf.channel(1).to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Waveform::from_interleaved(&[0.0; 4], 0, 44100).is_err());
        assert!(Waveform::from_interleaved(&[0.0; 5], 2, 44100).is_err());
        assert!(Waveform::from_channels(vec![0.0; 3], vec![0.0; 4], 44100).is_err());
        assert!(Waveform::from_channels(vec![0.0; 3], vec![0.0; 3], 0).is_err());
        assert!(Waveform::from_array(Array2::zeros((1, 10)), 44100).is_err());
    }

    #[test]
    fn test_from_channels() {
        let wf = Waveform::from_channels(vec![1.0, 2.0], vec![3.0, 4.0], 44100).unwrap();
        assert_eq!(wf.view()[[1, 0]], 3.0);
        assert!((wf.duration_secs() - 2.0 / 44100.0).abs() < 1e-12);
    }
}
