//! Spectral branch of the model contract
//!
//! The separator was trained on a very specific spectrogram layout:
//! - input reflect-padded by `3 * (hop / 2)` on the left and up to a whole
//!   number of hops on the right
//! - centered STFT, Nyquist bin dropped, two frames cropped on each side
//! - complex values split into real/imag channel pairs (CAC)
//!
//! These offsets are part of the contract with the trained weights and must
//! not be changed independently of the model.

use dx_dsp::{DspError, Stft, reflect_pad};
use ndarray::{Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView4, Axis, s};
use num_complex::Complex32;

use crate::error::{SeparationError, SeparationResult};

/// Frames cropped on each side of the model spectrogram
const EDGE_FRAMES: usize = 2;

/// Spectrogram front end and its inverse
#[derive(Debug, Clone)]
pub struct SpectralFrontend {
    stft: Stft,
}

impl SpectralFrontend {
    pub fn new(fft_size: usize) -> SeparationResult<Self> {
        Ok(Self { stft: Stft::new(fft_size)? })
    }

    pub fn hop(&self) -> usize {
        self.stft.hop()
    }

    /// Bins per frame after the Nyquist bin is dropped
    pub fn freq_bins(&self) -> usize {
        self.stft.nfft() / 2
    }

    /// Frames produced for `length` samples
    pub fn frames(&self, length: usize) -> usize {
        length.div_ceil(self.hop())
    }

    /// Left reflect padding, also the crop offset of `ispec`
    fn pad(&self) -> usize {
        self.hop() / 2 * 3
    }

    /// Complex spectrogram `[channels, freq_bins, frames]` of `[channels, length]`
    pub fn spectrogram(&self, mix: ArrayView2<f32>) -> SeparationResult<Array3<Complex32>> {
        let (channels, length) = mix.dim();
        if length == 0 {
            return Err(DspError::EmptySignal.into());
        }

        let hop = self.hop();
        let le = self.frames(length);
        let pad = self.pad();
        let freq_bins = self.freq_bins();

        let mut z = Array3::<Complex32>::zeros((channels, freq_bins, le));
        for (row, mut dst) in mix.axis_iter(Axis(0)).zip(z.axis_iter_mut(Axis(0))) {
            let padded = reflect_pad(&row.to_vec(), pad, pad + le * hop - length);
            let spec = self.stft.forward(&padded)?;

            let expected = le + 2 * EDGE_FRAMES;
            if spec.ncols() != expected {
                return Err(DspError::FrameCountMismatch { expected, got: spec.ncols() }.into());
            }

            dst.assign(&spec.slice(s![..freq_bins, EDGE_FRAMES..EDGE_FRAMES + le]));
        }

        Ok(z)
    }

    /// Complex-as-channels layout `[1, channels * 2, freq_bins, frames]`:
    /// channel `2c` holds the real part of audio channel `c`, `2c + 1` the
    /// imaginary part.
    pub fn cac(&self, z: &Array3<Complex32>) -> Array4<f32> {
        let (channels, freq_bins, frames) = z.dim();
        let mut out = Array4::<f32>::zeros((1, channels * 2, freq_bins, frames));
        for ((c, f, t), value) in z.indexed_iter() {
            out[[0, 2 * c, f, t]] = value.re;
            out[[0, 2 * c + 1, f, t]] = value.im;
        }
        out
    }

    /// Inverse of the CAC layout for a stack of stems:
    /// `[stems, channels * 2, F, T]` -> `[stems, channels, F, T]`
    pub fn mask_to_complex(&self, mask: ArrayView4<f32>) -> SeparationResult<Array4<Complex32>> {
        let (stems, cac_channels, freq_bins, frames) = mask.dim();
        if cac_channels % 2 != 0 {
            return Err(SeparationError::ContractViolation(format!(
                "CAC tensor needs an even channel count, got {}",
                cac_channels
            )));
        }

        Ok(Array4::from_shape_fn(
            (stems, cac_channels / 2, freq_bins, frames),
            |(s, c, f, t)| Complex32::new(mask[[s, 2 * c, f, t]], mask[[s, 2 * c + 1, f, t]]),
        ))
    }

    /// Time-domain signal `[stems, channels, length]` from `[stems, channels, F, T]`
    pub fn ispec(&self, z: ArrayView4<Complex32>, length: usize) -> SeparationResult<Array3<f32>> {
        let (stems, channels, freq_bins, frames) = z.dim();
        if freq_bins != self.freq_bins() {
            return Err(DspError::ShapeMismatch {
                expected: format!("{} frequency bins", self.freq_bins()),
                got: format!("{} frequency bins", freq_bins),
            }
            .into());
        }

        let pad = self.pad();
        let mut full = Array2::<Complex32>::zeros((freq_bins + 1, frames + 2 * EDGE_FRAMES));
        let mut out = Array3::<f32>::zeros((stems, channels, length));

        for stem in 0..stems {
            for c in 0..channels {
                // Zero Nyquist row and zero edge frames around the model frames
                full.fill(Complex32::new(0.0, 0.0));
                full.slice_mut(s![..freq_bins, EDGE_FRAMES..EDGE_FRAMES + frames])
                    .assign(&z.slice(s![stem, c, .., ..]));

                let signal = self.stft.inverse(full.view(), Some(pad + length))?;
                out.slice_mut(s![stem, c, ..])
                    .assign(&ArrayView1::from(&signal[pad..]));
            }
        }

        Ok(out)
    }
}
