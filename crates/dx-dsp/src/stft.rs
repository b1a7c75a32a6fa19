//! Short-time Fourier transform
//!
//! Centered STFT / ISTFT pair built on realfft:
//! - Reflect padding of `nfft / 2` on both sides
//! - Hann analysis and synthesis window, hop = `nfft / 4`
//! - `1 / sqrt(nfft)` scaling in both directions
//! - Squared-window overlap-add normalization on the way back

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{DspError, DspResult};
use crate::window::hann;

/// Overlap-add positions whose summed squared window is at or below this
/// value are left at zero.
const WINDOW_SUM_FLOOR: f32 = 1e-10;

/// Mirror-pad `signal` by `left` and `right` samples without repeating the
/// edge sample. Padding longer than the signal keeps reflecting back and
/// forth across it.
pub fn reflect_pad(signal: &[f32], left: usize, right: usize) -> Vec<f32> {
    let len = signal.len();
    if len == 0 {
        return vec![0.0; left + right];
    }

    let mut padded = Vec::with_capacity(left + len + right);
    for j in 0..left + len + right {
        let virtual_index = j as isize - left as isize;
        padded.push(signal[reflect_index(virtual_index, len)]);
    }
    padded
}

fn reflect_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let folded = index.rem_euclid(period);
    if folded >= len as isize {
        (period - folded) as usize
    } else {
        folded as usize
    }
}

/// Centered STFT with fixed FFT size
#[derive(Clone)]
pub struct Stft {
    nfft: usize,
    hop: usize,
    scale: f32,
    window: Arc<[f32]>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft")
            .field("nfft", &self.nfft)
            .field("hop", &self.hop)
            .finish()
    }
}

impl Stft {
    /// Create a transform for `nfft` (positive, divisible by 4)
    pub fn new(nfft: usize) -> DspResult<Self> {
        if nfft == 0 || nfft % 4 != 0 {
            return Err(DspError::InvalidFftSize { nfft });
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(nfft);
        let fft_inverse = planner.plan_fft_inverse(nfft);

        Ok(Self {
            nfft,
            hop: nfft / 4,
            scale: 1.0 / (nfft as f32).sqrt(),
            window: hann(nfft),
            fft_forward,
            fft_inverse,
        })
    }

    /// FFT size
    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Hop between frames
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Number of complex bins per frame (`nfft / 2 + 1`)
    pub fn num_bins(&self) -> usize {
        self.nfft / 2 + 1
    }

    /// Number of frames `forward` produces for a signal of `length` samples
    pub fn num_frames(&self, length: usize) -> usize {
        length / self.hop + 1
    }

    fn center_pad(&self) -> (usize, usize) {
        (self.nfft / 2, self.nfft - self.nfft / 2)
    }

    /// Forward transform. Returns `[nfft/2 + 1, frames]` (frequency-major).
    pub fn forward(&self, signal: &[f32]) -> DspResult<Array2<Complex32>> {
        if signal.is_empty() {
            return Err(DspError::EmptySignal);
        }

        let (left, right) = self.center_pad();
        let padded = reflect_pad(signal, left, right);
        let n_frames = (padded.len() - self.nfft) / self.hop + 1;
        let n_bins = self.num_bins();

        let mut spectrum = Array2::<Complex32>::zeros((n_bins, n_frames));
        let mut input_buffer = self.fft_forward.make_input_vec();
        let mut output_buffer = self.fft_forward.make_output_vec();
        let mut scratch = self.fft_forward.make_scratch_vec();

        for frame_idx in 0..n_frames {
            let start = frame_idx * self.hop;

            for (i, (dst, &sample)) in input_buffer
                .iter_mut()
                .zip(&padded[start..start + self.nfft])
                .enumerate()
            {
                *dst = sample * self.window[i];
            }

            self.fft_forward
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| DspError::Fft(format!("forward FFT failed: {}", e)))?;

            for (bin, &val) in output_buffer.iter().enumerate() {
                spectrum[[bin, frame_idx]] = val * self.scale;
            }
        }

        Ok(spectrum)
    }

    /// Inverse transform of a `[bins, frames]` spectrum.
    ///
    /// `bins` may be smaller than `nfft/2 + 1`; absent bins are treated as
    /// zero. With `length` the centered output is truncated or zero-padded to
    /// exactly that many samples, otherwise `nfft/2` is stripped from each end
    /// of the overlap-add buffer.
    pub fn inverse(&self, spec: ArrayView2<Complex32>, length: Option<usize>) -> DspResult<Vec<f32>> {
        let (n_bins, n_frames) = spec.dim();
        let full_bins = self.num_bins();
        if n_bins > full_bins {
            return Err(DspError::ShapeMismatch {
                expected: format!("at most {} bins", full_bins),
                got: format!("{} bins", n_bins),
            });
        }
        if n_frames == 0 {
            return Err(DspError::EmptySignal);
        }

        let ola_len = self.nfft + (n_frames - 1) * self.hop;
        let mut output = vec![0.0f32; ola_len];
        let mut window_sum = vec![0.0f32; ola_len];

        let mut input_buffer = self.fft_inverse.make_input_vec();
        let mut output_buffer = self.fft_inverse.make_output_vec();
        let mut scratch = self.fft_inverse.make_scratch_vec();

        for frame_idx in 0..n_frames {
            input_buffer.fill(Complex32::new(0.0, 0.0));
            for (dst, &val) in input_buffer.iter_mut().zip(spec.column(frame_idx)) {
                *dst = val;
            }
            // A real signal has purely real DC and Nyquist bins
            input_buffer[0].im = 0.0;
            input_buffer[full_bins - 1].im = 0.0;

            self.fft_inverse
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| DspError::Fft(format!("inverse FFT failed: {}", e)))?;

            let start = frame_idx * self.hop;
            for (i, &sample) in output_buffer.iter().enumerate() {
                let w = self.window[i];
                output[start + i] += sample * self.scale * w;
                window_sum[start + i] += w * w;
            }
        }

        for (sample, &sum) in output.iter_mut().zip(&window_sum) {
            if sum > WINDOW_SUM_FLOOR {
                *sample /= sum;
            } else {
                *sample = 0.0;
            }
        }

        let (left, right) = self.center_pad();
        let signal = match length {
            Some(length) => {
                let end = (left + length).min(ola_len);
                let mut signal = output[left.min(end)..end].to_vec();
                signal.resize(length, 0.0);
                signal
            }
            None => output[left..ola_len - right].to_vec(),
        };

        Ok(signal)
    }

    /// Forward transform of every row of `[batch, samples]` into
    /// `[batch, nfft/2 + 1, frames]`
    pub fn forward_batch(&self, signals: ArrayView2<f32>) -> DspResult<Array3<Complex32>> {
        let (batch, samples) = signals.dim();
        if samples == 0 {
            return Err(DspError::EmptySignal);
        }

        let mut spectra = Array3::<Complex32>::zeros((batch, self.num_bins(), self.num_frames(samples)));
        for (row, mut dst) in signals.axis_iter(Axis(0)).zip(spectra.axis_iter_mut(Axis(0))) {
            let owned;
            let slice = match row.as_slice() {
                Some(slice) => slice,
                None => {
                    owned = row.to_vec();
                    &owned
                }
            };
            dst.assign(&self.forward(slice)?);
        }

        Ok(spectra)
    }

    /// Inverse transform of `[batch, bins, frames]` into `[batch, samples]`
    pub fn inverse_batch(&self, spec: ArrayView3<Complex32>, length: Option<usize>) -> DspResult<Array2<f32>> {
        let batch = spec.len_of(Axis(0));
        let n_frames = spec.len_of(Axis(2));
        let out_len = length.unwrap_or(n_frames.saturating_sub(1) * self.hop);

        let mut signals = Array2::<f32>::zeros((batch, out_len));
        for (item, mut dst) in spec.axis_iter(Axis(0)).zip(signals.axis_iter_mut(Axis(0))) {
            let signal = self.inverse(item, Some(out_len))?;
            for (d, s) in dst.iter_mut().zip(signal) {
                *d = s;
            }
        }

        Ok(signals)
    }
}
