//! DSP Integration Tests
//!
//! Verifies the primitives together:
//! - STFT -> ISTFT reconstruction on realistic material
//! - Normalization round trip through the spectral domain
//! - Overlap weights summing to a usable partition

use dx_dsp::{
    FEATURE_EPSILON, NormalizationStats, Stft, denormalize, normalize, reflect_pad,
    triangular_overlap_weight,
};

const SAMPLE_RATE: f32 = 44100.0;

/// Generate test sine wave
fn generate_sine(samples: usize, freq: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

/// Deterministic pseudo-noise in [-1, 1]
fn generate_noise(samples: usize) -> Vec<f32> {
    let mut state = 0x2545_f491u32;
    (0..samples)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Check signal has no NaN or Infinity
fn is_valid_signal(signal: &[f32]) -> bool {
    signal.iter().all(|x| x.is_finite())
}

fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[test]
fn test_stft_round_trip_noise_full_size() {
    let stft = Stft::new(4096).unwrap();
    let signal = generate_noise(3 * 44100 + 17);

    let spec = stft.forward(&signal).unwrap();
    assert_eq!(spec.nrows(), 2049);

    let rebuilt = stft.inverse(spec.view(), Some(signal.len())).unwrap();
    assert!(is_valid_signal(&rebuilt));
    assert!(max_abs_diff(&signal, &rebuilt) < 1e-4);
}

#[test]
fn test_stft_round_trip_short_signal() {
    // Shorter than half the FFT: reflect padding has to fold repeatedly
    let stft = Stft::new(1024).unwrap();
    let signal = generate_sine(300, 1000.0);

    let spec = stft.forward(&signal).unwrap();
    let rebuilt = stft.inverse(spec.view(), Some(signal.len())).unwrap();
    assert!(max_abs_diff(&signal, &rebuilt) < 1e-4);
}

#[test]
fn test_sine_energy_lands_in_expected_bin() {
    let nfft = 4096;
    let stft = Stft::new(nfft).unwrap();
    // Exactly on bin 100
    let freq = 100.0 * SAMPLE_RATE / nfft as f32;
    let spec = stft.forward(&generate_sine(44100, freq)).unwrap();

    let frame = spec.ncols() / 2;
    let peak_bin = (0..spec.nrows())
        .max_by(|&a, &b| spec[[a, frame]].norm().total_cmp(&spec[[b, frame]].norm()))
        .unwrap();
    assert_eq!(peak_bin, 100);
}

#[test]
fn test_normalize_spectral_features_round_trip() {
    let stft = Stft::new(1024).unwrap();
    let spec = stft.forward(&generate_noise(8192)).unwrap();
    let real = spec.mapv(|c| c.re);

    let (normalized, stats) = normalize(&real, FEATURE_EPSILON);
    let check = NormalizationStats::from_samples(normalized.iter().copied(), 0.0);
    assert!(check.mean.abs() < 1e-4);

    let restored = denormalize(&normalized, &stats);
    for (a, b) in real.iter().zip(restored.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_overlap_weights_partition_interior() {
    // Three quarter stride: every interior sample is covered by at least one
    // segment, and the accumulated weight never vanishes.
    let segment = 1000;
    let stride = 750;
    let total = 4000;
    let weight = triangular_overlap_weight(segment, 1.0);

    let mut sum = vec![0.0f32; total];
    let mut offset = 0;
    while offset < total {
        let n = segment.min(total - offset);
        for i in 0..n {
            sum[offset + i] += weight[i];
        }
        offset += stride;
    }
    assert!(sum.iter().all(|&w| w > 0.0));
}

#[test]
fn test_reflect_pad_preserves_center() {
    let signal = generate_sine(100, 440.0);
    let padded = reflect_pad(&signal, 37, 11);
    assert_eq!(padded.len(), 148);
    assert_eq!(&padded[37..137], &signal[..]);
    assert_eq!(padded[36], signal[1]);
    assert_eq!(padded[137], signal[98]);
}
