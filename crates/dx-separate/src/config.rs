//! Separation configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SeparationError, SeparationResult};

/// Stem order of the 4-source model
pub const STEMS_4: [&str; 4] = ["drums", "bass", "other", "vocals"];

/// Stem order of the 6-source model
pub const STEMS_6: [&str; 6] = ["drums", "bass", "other", "vocals", "guitar", "piano"];

/// Name of the stem excluded from the instrumental sum
pub const VOCALS: &str = "vocals";

/// Name of the derived pseudo-stem
pub const INSTRUMENTAL: &str = "instrumental";

/// Sample rate the separator was trained at
pub const MODEL_SAMPLE_RATE: u32 = 44100;

/// Slack added before flooring a sample count so decimal durations such as
/// 0.7 s land on the sample they name rather than one below it
const SAMPLE_COUNT_SLACK: f64 = 1e-6;

/// Separation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Segment length in seconds
    pub segment_seconds: f64,

    /// Fraction of a segment shared with its neighbour, in [0, 1)
    pub overlap: f64,

    /// Exponent applied to the normalized cross-fade weight
    pub transition_power: f32,

    /// STFT size of the spectral branch
    pub fft_size: usize,

    /// Sample rate the model expects
    pub sample_rate: u32,

    /// Stem names in model output order
    pub stems: Vec<String>,

    /// Also emit the sum of all non-vocal stems
    pub instrumental: bool,

    /// Run segments of one file concurrently when the backend allows it
    pub parallel_segments: bool,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 5.0,
            overlap: 0.25,
            transition_power: 1.0,
            fft_size: dx_dsp::DEFAULT_FFT_SIZE,
            sample_rate: MODEL_SAMPLE_RATE,
            stems: STEMS_4.iter().map(|s| s.to_string()).collect(),
            instrumental: false,
            parallel_segments: false,
        }
    }
}

impl SeparationConfig {
    /// 4-stem model (drums, bass, other, vocals)
    pub fn four_stems() -> Self {
        Self::default()
    }

    /// 6-stem model (adds guitar, piano)
    pub fn six_stems() -> Self {
        Self {
            stems: STEMS_6.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SeparationResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_segment_seconds(mut self, seconds: f64) -> Self {
        self.segment_seconds = seconds;
        self
    }

    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_transition_power(mut self, power: f32) -> Self {
        self.transition_power = power;
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    pub fn with_stems<I, S>(mut self, stems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stems = stems.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_instrumental(mut self, instrumental: bool) -> Self {
        self.instrumental = instrumental;
        self
    }

    pub fn with_parallel_segments(mut self, parallel: bool) -> Self {
        self.parallel_segments = parallel;
        self
    }

    // ============ Derived sizes ============

    /// Samples per segment
    pub fn segment_length(&self) -> usize {
        (self.sample_rate as f64 * self.segment_seconds + SAMPLE_COUNT_SLACK).floor() as usize
    }

    /// Samples between consecutive segment offsets
    pub fn stride(&self) -> usize {
        ((1.0 - self.overlap) * self.segment_length() as f64 + SAMPLE_COUNT_SLACK).floor() as usize
    }

    /// STFT hop of the spectral branch
    pub fn hop(&self) -> usize {
        self.fft_size / 4
    }

    /// Frequency bins fed to the model (Nyquist dropped)
    pub fn freq_bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Spectrogram frames per segment
    pub fn frames(&self) -> usize {
        self.segment_length().div_ceil(self.hop())
    }

    /// Number of output stems, not counting the instrumental
    pub fn num_stems(&self) -> usize {
        self.stems.len()
    }

    /// Check every parameter; returns the first violation
    pub fn validate(&self) -> SeparationResult<()> {
        let invalid = |msg: String| Err(SeparationError::InvalidConfig(msg));

        if !(self.segment_seconds.is_finite() && self.segment_seconds > 0.0) {
            return invalid(format!("segment_seconds must be > 0, got {}", self.segment_seconds));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return invalid(format!("overlap must be in [0, 1), got {}", self.overlap));
        }
        if !(self.transition_power.is_finite() && self.transition_power >= 0.0) {
            return invalid(format!("transition_power must be >= 0, got {}", self.transition_power));
        }
        if self.fft_size == 0 || self.fft_size % 4 != 0 {
            return invalid(format!("fft_size must be a positive multiple of 4, got {}", self.fft_size));
        }
        if self.sample_rate == 0 {
            return invalid("sample_rate must be > 0".into());
        }
        if self.stems.is_empty() {
            return invalid("at least one stem name is required".into());
        }
        for (i, name) in self.stems.iter().enumerate() {
            if name.is_empty() {
                return invalid(format!("stem {} has an empty name", i));
            }
            if name == INSTRUMENTAL {
                return invalid(format!("`{}` is reserved for the derived stem", INSTRUMENTAL));
            }
            if self.stems[..i].contains(name) {
                return invalid(format!("duplicate stem name `{}`", name));
            }
        }
        if self.segment_length() == 0 {
            return invalid("segment is shorter than one sample".into());
        }
        if self.stride() == 0 {
            return invalid(format!(
                "overlap {} leaves no stride for a {}-sample segment",
                self.overlap,
                self.segment_length()
            ));
        }

        Ok(())
    }

    /// Estimate peak memory usage in MB for a file of `duration_secs`
    pub fn estimated_memory_mb(&self, duration_secs: f32) -> f32 {
        let bytes = 4.0;
        let channels = 2.0;
        let stems = self.num_stems() as f32 + if self.instrumental { 1.0 } else { 0.0 };

        // Input + normalized copy + accumulator + stems
        let samples = duration_secs * self.sample_rate as f32;
        let file_mb = samples * channels * (2.0 + 2.0 * stems) * bytes / 1_000_000.0;

        // Per segment: features, mask, complex spectra, time outputs
        let spec = (self.freq_bins() * self.frames()) as f32 * channels * 2.0;
        let segment = self.segment_length() as f32 * channels;
        let segment_mb = (spec * (2.0 + 2.0 * stems) + segment * (2.0 + 2.0 * stems)) * bytes / 1_000_000.0;

        let concurrent = if self.parallel_segments {
            rayon::current_num_threads() as f32
        } else {
            1.0
        };

        file_mb + segment_mb * concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SeparationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment_length(), 220_500);
        assert_eq!(config.stride(), 165_375);
        assert_eq!(config.hop(), 1024);
        assert_eq!(config.freq_bins(), 2048);
        assert_eq!(config.frames(), 216);
        assert_eq!(config.stems, STEMS_4);
    }

    #[test]
    fn test_presets() {
        let six = SeparationConfig::six_stems();
        assert_eq!(six.num_stems(), 6);
        assert_eq!(six.stems[4], "guitar");
        assert_eq!(six.stems[5], "piano");
        assert!(six.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let base = SeparationConfig::default();
        assert!(base.clone().with_overlap(1.0).validate().is_err());
        assert!(base.clone().with_overlap(-0.1).validate().is_err());
        assert!(base.clone().with_overlap(0.0).validate().is_ok());
        assert!(base.clone().with_transition_power(-1.0).validate().is_err());
        assert!(base.clone().with_fft_size(4094).validate().is_err());
        assert!(base.clone().with_segment_seconds(0.0).validate().is_err());
        assert!(base.clone().with_stems(Vec::<String>::new()).validate().is_err());
        assert!(base.clone().with_stems(["a", "a"]).validate().is_err());
        assert!(base.clone().with_stems(["a", INSTRUMENTAL]).validate().is_err());

        // 0.9999 overlap on a tiny segment leaves no stride
        let tiny = base.with_segment_seconds(0.0001).with_overlap(0.9999);
        assert!(matches!(tiny.validate(), Err(SeparationError::InvalidConfig(_))));
    }

    #[test]
    fn test_decimal_durations_are_exact() {
        // 0.7 * 44100 is 30869.999... in binary floating point
        let config = SeparationConfig::default().with_segment_seconds(0.7);
        assert_eq!(config.segment_length(), 30_870);
        assert_eq!(config.stride(), 23_152);

        let config = SeparationConfig::default().with_segment_seconds(2.3).with_overlap(0.1);
        assert_eq!(config.segment_length(), 101_430);
        assert_eq!(config.stride(), 91_287);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config: SeparationConfig =
            serde_json::from_str(r#"{ "overlap": 0.5, "instrumental": true }"#).unwrap();
        assert_eq!(config.overlap, 0.5);
        assert!(config.instrumental);
        assert_eq!(config.fft_size, 4096);
        assert_eq!(config.segment_seconds, 5.0);
    }

    #[test]
    fn test_from_json_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{ "segment_seconds": 7.8 }"#).unwrap();
        let config = SeparationConfig::from_json_file(&path).unwrap();
        assert_eq!(config.segment_length(), 343_980);

        std::fs::write(&path, r#"{ "overlap": 2.0 }"#).unwrap();
        assert!(SeparationConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn test_memory_estimation() {
        let config = SeparationConfig::default();
        let mem = config.estimated_memory_mb(180.0);

        // 3 minute song: more than the raw input, well under 2 GB
        assert!(mem > 60.0);
        assert!(mem < 2000.0);
        assert!(config.clone().with_instrumental(true).estimated_memory_mb(180.0) > mem);
    }
}
