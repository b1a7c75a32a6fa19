//! Mean / standard deviation normalization
//!
//! Statistics are taken over the entire tensor (every channel, bin and frame
//! together), accumulated in f64. The stored `std` already includes the
//! epsilon, so `normalize` and `denormalize` are exact inverses of each other.

use ndarray::{Array, ArrayBase, Data, Dimension};

/// Mean and (epsilon-adjusted) standard deviation of a tensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
    /// Arithmetic mean
    pub mean: f32,
    /// Population standard deviation plus epsilon, always > 0
    pub std: f32,
}

impl Default for NormalizationStats {
    fn default() -> Self {
        Self::identity()
    }
}

impl NormalizationStats {
    /// Stats that leave values unchanged
    pub fn identity() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }

    /// Compute stats over any sequence of samples
    pub fn from_samples<I: IntoIterator<Item = f32>>(values: I, eps: f32) -> Self {
        // Welford in f64
        let mut count = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        for v in values {
            count += 1;
            let v = v as f64;
            let delta = v - mean;
            mean += delta / count as f64;
            m2 += delta * (v - mean);
        }

        if count == 0 {
            return Self { mean: 0.0, std: eps.max(f32::MIN_POSITIVE) };
        }

        let std = (m2 / count as f64).sqrt() as f32 + eps;
        Self {
            mean: mean as f32,
            std: if std > 0.0 { std } else { f32::MIN_POSITIVE },
        }
    }

    /// Compute stats over a flat buffer
    pub fn compute(values: &[f32], eps: f32) -> Self {
        Self::from_samples(values.iter().copied(), eps)
    }

    /// Stats of the mono reference `(left + right) / 2`
    pub fn mono_reference(left: &[f32], right: &[f32], eps: f32) -> Self {
        Self::from_samples(left.iter().zip(right).map(|(l, r)| (l + r) * 0.5), eps)
    }

    /// Map a raw value into normalized space
    #[inline]
    pub fn normalize_value(&self, value: f32) -> f32 {
        (value - self.mean) / self.std
    }

    /// Map a normalized value back
    #[inline]
    pub fn denormalize_value(&self, value: f32) -> f32 {
        value * self.std + self.mean
    }
}

/// Normalize a whole tensor, returning the normalized copy and its stats
pub fn normalize<S, D>(tensor: &ArrayBase<S, D>, eps: f32) -> (Array<f32, D>, NormalizationStats)
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let stats = NormalizationStats::from_samples(tensor.iter().copied(), eps);
    (normalize_with(tensor, &stats), stats)
}

/// Normalize a tensor with previously computed stats
pub fn normalize_with<S, D>(tensor: &ArrayBase<S, D>, stats: &NormalizationStats) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    tensor.mapv(|v| stats.normalize_value(v))
}

/// `tensor * std + mean`
pub fn denormalize<S, D>(tensor: &ArrayBase<S, D>, stats: &NormalizationStats) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    tensor.mapv(|v| stats.denormalize_value(v))
}

/// Normalize a buffer in place and return the stats used
pub fn normalize_in_place(values: &mut [f32], eps: f32) -> NormalizationStats {
    let stats = NormalizationStats::compute(values, eps);
    for v in values.iter_mut() {
        *v = stats.normalize_value(*v);
    }
    stats
}

/// Denormalize a buffer in place
pub fn denormalize_in_place(values: &mut [f32], stats: &NormalizationStats) {
    for v in values.iter_mut() {
        *v = stats.denormalize_value(*v);
    }
}
