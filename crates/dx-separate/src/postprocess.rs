//! Stem post-processing
//!
//! Turns the stitched `[stems, channels, total]` output into named stems:
//! - reverse the file-level reference normalization
//! - optionally derive the instrumental (sum of all non-vocal stems)
//! - scale each stem down just enough to stay inside [-1, 1]
//! - split into per-channel buffers

use dx_dsp::NormalizationStats;
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{INSTRUMENTAL, VOCALS};
use crate::error::{SeparationError, SeparationResult};

/// Headroom applied on top of the measured peak
const PEAK_HEADROOM: f32 = 1.01;

/// Single separated stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stem {
    /// Stem name (`drums`, `vocals`, `instrumental`, ...)
    pub name: String,

    /// `[left, right]`
    pub channels: [Vec<f32>; 2],

    /// Divisor applied by peak normalization (>= 1)
    pub peak_norm_factor: f32,

    pub sample_rate: u32,
}

impl Stem {
    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn left(&self) -> &[f32] {
        &self.channels[0]
    }

    pub fn right(&self) -> &[f32] {
        &self.channels[1]
    }

    /// Interleaved stereo `[L0, R0, L1, R1, ...]`
    pub fn interleaved(&self) -> Vec<f32> {
        self.left()
            .iter()
            .zip(self.right())
            .flat_map(|(&l, &r)| [l, r])
            .collect()
    }

    /// Compute peak level
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|s| s.abs())
            .fold(0.0f32, f32::max)
    }

    /// Compute RMS level over both channels
    pub fn rms(&self) -> f32 {
        let count = self.len() * 2;
        if count == 0 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum_sq / count as f64).sqrt() as f32
    }
}

/// Scale `data` so its peak stays below 1.0. Returns the divisor used,
/// `max(1.01 * peak, 1.0)`. Non-finite samples are zeroed first.
pub fn peak_normalize(data: &mut Array2<f32>) -> f32 {
    let mut non_finite = 0usize;
    for v in data.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
            non_finite += 1;
        }
    }
    if non_finite > 0 {
        log::warn!("Zeroed {} non-finite samples before peak normalization", non_finite);
    }

    let max_abs = data.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
    let factor = (PEAK_HEADROOM * max_abs).max(1.0);
    if factor > 1.0 {
        data.mapv_inplace(|v| v / factor);
    }
    factor
}

/// Stitched output to named, peak-safe stems
#[derive(Debug, Clone)]
pub struct StemPostProcessor {
    reference: NormalizationStats,
    instrumental: bool,
    sample_rate: u32,
}

impl StemPostProcessor {
    pub fn new(reference: NormalizationStats, sample_rate: u32) -> Self {
        Self {
            reference,
            instrumental: false,
            sample_rate,
        }
    }

    pub fn with_instrumental(mut self, instrumental: bool) -> Self {
        self.instrumental = instrumental;
        self
    }

    /// Process `[stems, 2, total]`; `names` gives the stem order
    pub fn process(&self, mut assembled: Array3<f32>, names: &[String]) -> SeparationResult<Vec<Stem>> {
        let (stems, channels, total) = assembled.dim();
        if stems != names.len() {
            return Err(SeparationError::ContractViolation(format!(
                "{} stem names for {} stems",
                names.len(),
                stems
            )));
        }
        if channels != 2 {
            return Err(SeparationError::ContractViolation(format!(
                "stems must be stereo, got {} channels",
                channels
            )));
        }

        let reference = self.reference;
        assembled.mapv_inplace(|v| reference.denormalize_value(v));

        // Summed before any per-stem scaling
        let instrumental = if self.instrumental {
            let mut sum = Array2::<f32>::zeros((channels, total));
            for (stem, name) in assembled.axis_iter(Axis(0)).zip(names) {
                if name != VOCALS {
                    sum += &stem;
                }
            }
            Some(sum)
        } else {
            None
        };

        let mut out = Vec::with_capacity(stems + usize::from(self.instrumental));
        for (stem, name) in assembled.axis_iter(Axis(0)).zip(names) {
            out.push(self.finish(name, stem.to_owned()));
        }
        if let Some(sum) = instrumental {
            out.push(self.finish(INSTRUMENTAL, sum));
        }

        Ok(out)
    }

    fn finish(&self, name: &str, mut data: Array2<f32>) -> Stem {
        let factor = peak_normalize(&mut data);
        if factor > 1.0 {
            log::debug!("Stem {} scaled down by {:.3}", name, factor);
        }

        let mut rows = data.outer_iter().map(|row| row.to_vec());
        let left = rows.next().unwrap_or_default();
        let right = rows.next().unwrap_or_default();

        Stem {
            name: name.to_string(),
            channels: [left, right],
            peak_norm_factor: factor,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_quiet_stems_untouched() {
        let processor = StemPostProcessor::new(NormalizationStats::identity(), 44100);
        let assembled = Array3::from_shape_fn((2, 2, 10), |(s, c, i)| 0.01 * (s + c + i) as f32);
        let stems = processor.process(assembled.clone(), &names(&["bass", "vocals"])).unwrap();

        assert_eq!(stems.len(), 2);
        assert_eq!(stems[0].peak_norm_factor, 1.0);
        assert_eq!(stems[1].right()[3], assembled[[1, 1, 3]]);
    }

    #[test]
    fn test_loud_stem_normalized_below_one() {
        let processor = StemPostProcessor::new(NormalizationStats::identity(), 44100);
        let assembled = Array3::from_shape_fn((1, 2, 100), |(_, c, i)| if c == 1 && i == 50 { -4.0 } else { 0.5 });
        let stems = processor.process(assembled, &names(&["drums"])).unwrap();

        let stem = &stems[0];
        assert_relative_eq!(stem.peak_norm_factor, 4.04, epsilon = 1e-5);
        assert!(stem.peak() <= 1.0);
        assert_relative_eq!(stem.peak(), 1.0 / 1.01, epsilon = 1e-5);
    }

    #[test]
    fn test_reference_denormalization() {
        let reference = NormalizationStats { mean: 0.1, std: 0.5 };
        let processor = StemPostProcessor::new(reference, 44100);
        let assembled = Array3::from_elem((1, 2, 4), 0.4f32);
        let stems = processor.process(assembled, &names(&["other"])).unwrap();
        assert!(stems[0].left().iter().all(|&v| (v - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_instrumental_sums_non_vocals() {
        let processor = StemPostProcessor::new(NormalizationStats::identity(), 44100).with_instrumental(true);
        let assembled = Array3::from_shape_fn((4, 2, 8), |(s, _, _)| 0.1 * (s + 1) as f32);
        let stems = processor
            .process(assembled, &names(&["drums", "bass", "other", "vocals"]))
            .unwrap();

        assert_eq!(stems.len(), 5);
        let instrumental = &stems[4];
        assert_eq!(instrumental.name, INSTRUMENTAL);
        // 0.1 + 0.2 + 0.3, vocals (0.4) excluded
        assert!(instrumental.left().iter().all(|&v| (v - 0.6).abs() < 1e-6));
    }

    #[test]
    fn test_instrumental_peak_is_independent() {
        let processor = StemPostProcessor::new(NormalizationStats::identity(), 44100).with_instrumental(true);
        // Each stem 0.8, their sum 1.6 needs its own scaling
        let assembled = Array3::from_elem((3, 2, 16), 0.8f32);
        let stems = processor.process(assembled, &names(&["drums", "bass", "vocals"])).unwrap();

        assert_eq!(stems[0].peak_norm_factor, 1.0);
        assert_relative_eq!(stems[3].peak_norm_factor, 1.616, epsilon = 1e-5);
        assert!(stems.iter().all(|s| s.peak() <= 1.0));
    }

    #[test]
    fn test_non_finite_samples_zeroed() {
        let mut data = Array2::from_elem((2, 4), 0.5f32);
        data[[0, 1]] = f32::NAN;
        data[[1, 2]] = f32::INFINITY;
        let factor = peak_normalize(&mut data);
        assert_eq!(factor, 1.0);
        assert_eq!(data[[0, 1]], 0.0);
        assert_eq!(data[[1, 2]], 0.0);
    }

    #[test]
    fn test_name_count_mismatch() {
        let processor = StemPostProcessor::new(NormalizationStats::identity(), 44100);
        let err = processor.process(Array3::zeros((2, 2, 4)), &names(&["vocals"])).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_stem_helpers() {
        let stem = Stem {
            name: "bass".into(),
            channels: [vec![0.5, -0.5], vec![0.25, 0.0]],
            peak_norm_factor: 1.0,
            sample_rate: 2,
        };
        assert_eq!(stem.interleaved(), vec![0.5, 0.25, -0.5, 0.0]);
        assert_eq!(stem.peak(), 0.5);
        assert_relative_eq!(stem.rms(), 0.375, epsilon = 1e-6);
        assert_eq!(stem.duration(), 1.0);
    }
}
