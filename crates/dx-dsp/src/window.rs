//! Window functions
//!
//! - Symmetric Hann window used for STFT analysis and synthesis
//! - Triangular cross-fade weight used when stitching overlapping segments

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

static HANN_CACHE: LazyLock<Mutex<HashMap<usize, Arc<[f32]>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Symmetric Hann window: `0.5 * (1 - cos(2*pi*i / (size - 1)))`
pub fn hann_window(size: usize) -> Vec<f32> {
    match size {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (size - 1) as f64;
            (0..size)
                .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos())) as f32)
                .collect()
        }
    }
}

/// Cached Hann window, shared between all transforms of the same size
pub fn hann(size: usize) -> Arc<[f32]> {
    let mut cache = HANN_CACHE.lock();
    cache
        .entry(size)
        .or_insert_with(|| {
            log::trace!("Caching Hann window of size {}", size);
            Arc::from(hann_window(size))
        })
        .clone()
}

/// Smallest weight a touched sample can receive
const MIN_WEIGHT: f64 = f32::EPSILON as f64;

/// Triangular overlap-add weight for a segment of `segment_length` samples.
///
/// Ramps linearly up to the midpoint and back down, normalized so the peak is
/// exactly 1, then raised to `transition_power`. Computed in f64 and floored
/// at `f32::EPSILON`, so every sample a segment touches receives non-zero
/// weight for any power.
pub fn triangular_overlap_weight(segment_length: usize, transition_power: f32) -> Vec<f32> {
    if segment_length == 0 {
        return Vec::new();
    }
    if segment_length == 1 {
        return vec![1.0];
    }

    let half = (segment_length / 2) as f64;
    let ramp: Vec<f64> = (0..segment_length)
        .map(|i| {
            if (i as f64) < half {
                (i + 1) as f64 / half
            } else {
                (segment_length - i) as f64 / half
            }
        })
        .collect();

    let max = ramp.iter().copied().fold(0.0f64, f64::max);
    let power = transition_power as f64;
    ramp.into_iter()
        .map(|w| ((w / max).powf(power)).max(MIN_WEIGHT) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(1024);
        assert_eq!(window.len(), 1024);
        assert!(window[0].abs() < 1e-7);
        assert!(window[1023].abs() < 1e-7);
        assert!(window[511] > 0.99 && window[512] > 0.99);
        // Symmetric
        for i in 0..512 {
            assert_relative_eq!(window[i], window[1023 - i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_hann_degenerate_sizes() {
        assert!(hann_window(0).is_empty());
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn test_hann_cache_shares_allocation() {
        let a = hann(256);
        let b = hann(256);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&a[..], &hann_window(256)[..]);
    }

    #[test]
    fn test_steep_transition_power_stays_positive() {
        // 1 / 110250 raised to the 10th underflows f32
        for power in [10.0, 25.0, 1000.0] {
            let weight = triangular_overlap_weight(220_500, power);
            assert!(weight.iter().all(|&w| w > 0.0), "power {}", power);
            assert_relative_eq!(weight[110_249], 1.0);
            assert_eq!(weight[0], f32::EPSILON);
        }
    }

    #[test]
    fn test_triangular_weight_peak_and_ends() {
        let weight = triangular_overlap_weight(100, 1.0);
        assert_eq!(weight.len(), 100);

        let max = weight.iter().copied().fold(0.0f32, f32::max);
        assert_relative_eq!(max, 1.0);
        assert_relative_eq!(weight[49], 1.0);
        assert_relative_eq!(weight[50], 1.0);

        assert_relative_eq!(weight[0], 0.02, epsilon = 1e-6);
        assert_relative_eq!(weight[99], 0.02, epsilon = 1e-6);
        assert!(weight.iter().all(|&w| w > 0.0 && w <= 1.0));
    }

    #[test]
    fn test_triangular_weight_odd_length() {
        let weight = triangular_overlap_weight(7, 1.0);
        // half = 3: [1/3, 2/3, 1, 4/3, 1, 2/3, 1/3] normalized by 4/3
        assert_relative_eq!(weight[3], 1.0);
        assert_relative_eq!(weight[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(weight[6], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_transition_power_sharpens() {
        let linear = triangular_overlap_weight(64, 1.0);
        let sharp = triangular_overlap_weight(64, 2.0);
        for (l, s) in linear.iter().zip(&sharp) {
            assert_relative_eq!(*s, l * l, epsilon = 1e-6);
        }

        let flat = triangular_overlap_weight(64, 0.0);
        assert!(flat.iter().all(|&w| w == 1.0));
    }
}
