//! Per-file separation context
//!
//! Owns everything that is fixed for a run (config, spectral front end,
//! adapter, cross-fade weight, backend) and drives one file at a time:
//!
//! normalize -> segment -> model -> stitch -> post-process
//!
//! Each call builds its own accumulator, so several files can be separated
//! concurrently from one `Separator`.

use std::sync::Arc;
use std::time::Instant;

use dx_dsp::{FEATURE_EPSILON, NormalizationStats, REFERENCE_EPSILON, denormalize, normalize, triangular_overlap_weight};
use ndarray::{Array3, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adapter::{InferenceBackend, ModelAdapter};
use crate::chunking::{ChunkScheduler, Segment, SegmentWindow, center_trim};
use crate::config::SeparationConfig;
use crate::error::{SeparationError, SeparationResult};
use crate::postprocess::{Stem, StemPostProcessor};
use crate::spectral::SpectralFrontend;
use crate::stitch::OutputAccumulator;
use crate::tensor::{CHANNELS, Waveform};

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Stage of a running separation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Normalizing,
    Separating,
    Stitching,
    PostProcessing,
    Complete,
}

/// Snapshot passed to progress callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparationProgress {
    pub state: PipelineState,
    pub segments_done: usize,
    pub segments_total: usize,
    pub elapsed_ms: u64,
}

impl SeparationProgress {
    /// 0.0 - 1.0 over the segment loop
    pub fn fraction(&self) -> f64 {
        match self.state {
            PipelineState::Normalizing => 0.0,
            PipelineState::Separating if self.segments_total > 0 => {
                self.segments_done as f64 / self.segments_total as f64
            }
            PipelineState::Separating => 0.0,
            _ => 1.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Separation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeparationStats {
    /// Number of segments processed
    pub segments_processed: usize,

    /// Total processing time (ms)
    pub total_time_ms: u64,

    /// Real-time factor (audio duration / processing time)
    pub rtf: f32,

    /// Backend that ran the model
    pub backend: String,
}

/// All stems of one file
#[derive(Debug, Clone)]
pub struct SeparatedStems {
    /// Model stems in output order, then `instrumental` if requested
    pub stems: Vec<Stem>,
    pub sample_rate: u32,
    /// Samples per channel, equal to the input length
    pub length: usize,
    pub stats: SeparationStats,
}

impl SeparatedStems {
    /// Get a stem by name
    pub fn get(&self, name: &str) -> Option<&Stem> {
        self.stems.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.stems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEPARATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Source separator bound to one backend and one configuration
pub struct Separator {
    config: SeparationConfig,
    backend: Arc<dyn InferenceBackend>,
    frontend: SpectralFrontend,
    adapter: ModelAdapter,
    overlap_weight: Arc<[f32]>,
}

impl Separator {
    pub fn new(config: SeparationConfig, backend: Arc<dyn InferenceBackend>) -> SeparationResult<Self> {
        config.validate()?;

        let frontend = SpectralFrontend::new(config.fft_size)?;
        let adapter = ModelAdapter::from_config(&config);
        let overlap_weight: Arc<[f32]> =
            Arc::from(triangular_overlap_weight(config.segment_length(), config.transition_power));

        log::info!(
            "Separator ready: backend {}, {} stems, segment {} samples, stride {}",
            backend.name(),
            config.num_stems(),
            config.segment_length(),
            config.stride()
        );

        Ok(Self {
            config,
            backend,
            frontend,
            adapter,
            overlap_weight,
        })
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Whether whole files may be separated on several threads at once
    pub fn supports_concurrent_files(&self) -> bool {
        self.backend.supports_concurrent_sessions()
    }

    fn parallel_segments(&self) -> bool {
        self.config.parallel_segments && self.backend.supports_concurrent_sessions()
    }

    /// Separate one file
    pub fn separate(&self, waveform: &Waveform) -> SeparationResult<SeparatedStems> {
        self.separate_with_progress(waveform, |_| {})
    }

    /// Separate one file, reporting progress after every segment
    pub fn separate_with_progress<P>(&self, waveform: &Waveform, mut progress: P) -> SeparationResult<SeparatedStems>
    where
        P: FnMut(&SeparationProgress),
    {
        let start = Instant::now();
        let total = waveform.len();
        if total == 0 {
            return Err(SeparationError::InvalidInput("waveform has no samples".into()));
        }
        if waveform.sample_rate() != self.config.sample_rate {
            return Err(SeparationError::InvalidInput(format!(
                "sample rate {} Hz, model expects {} Hz",
                waveform.sample_rate(),
                self.config.sample_rate
            )));
        }

        let segments_total = ChunkScheduler::new(total, self.config.segment_length(), self.config.stride())?
            .num_segments();
        let mut report = |state: PipelineState, segments_done: usize| {
            progress(&SeparationProgress {
                state,
                segments_done,
                segments_total,
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        };

        // ============ File reference normalization ============
        report(PipelineState::Normalizing, 0);
        let reference = NormalizationStats::mono_reference(
            &waveform.channel(0).to_vec(),
            &waveform.channel(1).to_vec(),
            REFERENCE_EPSILON,
        );
        log::debug!("Reference mean {:.6}, std {:.6}", reference.mean, reference.std);
        let normalized = waveform.view().mapv(|v| reference.normalize_value(v));

        // ============ Segment loop ============
        report(PipelineState::Separating, 0);
        let accumulator = self.stitch_segments(
            normalized.view(),
            &|segment: &Segment| self.process_segment(segment),
            &mut |done| report(PipelineState::Separating, done),
        )?;
        drop(normalized);

        report(PipelineState::Stitching, segments_total);
        let assembled = accumulator.finalize()?;

        // ============ Stems ============
        report(PipelineState::PostProcessing, segments_total);
        let stems = StemPostProcessor::new(reference, self.config.sample_rate)
            .with_instrumental(self.config.instrumental)
            .process(assembled, &self.config.stems)?;

        let elapsed = start.elapsed();
        let stats = SeparationStats {
            segments_processed: segments_total,
            total_time_ms: elapsed.as_millis() as u64,
            rtf: (waveform.duration_secs() / elapsed.as_secs_f64().max(1e-9)) as f32,
            backend: self.backend.name().to_string(),
        };
        report(PipelineState::Complete, segments_total);

        log::info!(
            "Separated {:.1}s into {} stems in {} ms ({:.2}x real-time)",
            waveform.duration_secs(),
            stems.len(),
            stats.total_time_ms,
            stats.rtf
        );

        Ok(SeparatedStems {
            stems,
            sample_rate: waveform.sample_rate(),
            length: total,
            stats,
        })
    }

    /// Run the model on one padded segment and return the stem estimates
    /// for its observed samples, `[stems, channels, length]`.
    pub fn process_segment(&self, segment: &Segment) -> SeparationResult<Array3<f32>> {
        let segment_length = self.adapter.segment_length;
        if segment.padded.dim() != (CHANNELS, segment_length) {
            return Err(SeparationError::ContractViolation(format!(
                "segment {} has shape {:?}, expected [{}, {}]",
                segment.index,
                segment.padded.dim(),
                CHANNELS,
                segment_length
            )));
        }

        // Spectral features
        let z = self.frontend.spectrogram(segment.padded.view())?;
        let (mag, mag_stats) = normalize(&self.frontend.cac(&z), FEATURE_EPSILON);
        drop(z);

        // Time-domain features
        let (mix, mix_stats) = normalize(&segment.padded, FEATURE_EPSILON);

        let inputs = self.adapter.pack(mix.view(), mag)?;
        let raw = self.backend.infer(inputs.mix.view(), inputs.mag.view())?;
        drop(inputs);
        let output = self.adapter.unpack(raw)?;

        // Spectral branch back to time domain
        let mask = denormalize(&output.mask, &mag_stats);
        let spec = self.frontend.mask_to_complex(mask.view())?;
        drop(mask);
        let mut result = self.frontend.ispec(spec.view(), segment_length)?;
        drop(spec);

        // Plus the time branch
        result += &denormalize(&output.residual, &mix_stats);

        log::debug!(
            "Segment {} at {}: {} samples ({} padded)",
            segment.index,
            segment.offset,
            segment.length,
            segment_length
        );

        center_trim(result.view(), segment.length)
    }

    /// Chunk and stitch `waveform` with an arbitrary per-segment function
    /// instead of the model. Returns the finalized `[stems, channels, total]`.
    pub fn run_segments<F>(&self, waveform: &Waveform, segment_fn: F) -> SeparationResult<Array3<f32>>
    where
        F: Fn(&Segment) -> SeparationResult<Array3<f32>> + Sync,
    {
        if waveform.is_empty() {
            return Err(SeparationError::InvalidInput("waveform has no samples".into()));
        }
        self.stitch_segments(waveform.view(), &segment_fn, &mut |_| {})?
            .finalize()
    }

    fn stitch_segments<F>(
        &self,
        mix: ArrayView2<f32>,
        segment_fn: &F,
        on_segment: &mut dyn FnMut(usize),
    ) -> SeparationResult<OutputAccumulator>
    where
        F: Fn(&Segment) -> SeparationResult<Array3<f32>> + Sync,
    {
        let total = mix.ncols();
        let segment_length = self.config.segment_length();
        let scheduler = ChunkScheduler::new(total, segment_length, self.config.stride())?;
        let mut accumulator = OutputAccumulator::try_new(
            self.config.num_stems(),
            CHANNELS,
            total,
            Arc::clone(&self.overlap_weight),
        )?;

        let run = |window: &SegmentWindow| -> SeparationResult<Array3<f32>> {
            let segment = Segment::extract(mix, *window, segment_length)?;
            segment_fn(&segment)
        };

        let windows: Vec<SegmentWindow> = scheduler.windows().collect();
        let mut done = 0;

        if self.parallel_segments() {
            // Bounded batches; accumulation stays sequential in offset order
            let batch = rayon::current_num_threads().max(1);
            for chunk in windows.chunks(batch) {
                let outputs: Vec<SeparationResult<Array3<f32>>> = chunk.par_iter().map(|window| run(window)).collect();
                for (window, output) in chunk.iter().zip(outputs) {
                    accumulator.accumulate(window.offset, output?.view())?;
                    done += 1;
                    on_segment(done);
                }
            }
        } else {
            for window in &windows {
                let output = run(window)?;
                accumulator.accumulate(window.offset, output.view())?;
                done += 1;
                on_segment(done);
            }
        }

        Ok(accumulator)
    }

    /// Separate several files. Files run in parallel when the backend allows
    /// concurrent sessions; each has its own accumulator and its own result.
    pub fn separate_batch(&self, waveforms: &[Waveform]) -> Vec<SeparationResult<SeparatedStems>> {
        if self.supports_concurrent_files() && waveforms.len() > 1 {
            log::info!("Separating {} files in parallel", waveforms.len());
            waveforms.par_iter().map(|wf| self.separate(wf)).collect()
        } else {
            waveforms.iter().map(|wf| self.separate(wf)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RawModelOutput;
    use ndarray::{Array2, ArrayD, ArrayView4, Axis, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Model that returns all-zero masks and residuals of the right shape
    struct SilentModel {
        adapter: ModelAdapter,
        calls: AtomicUsize,
    }

    impl InferenceBackend for SilentModel {
        fn name(&self) -> &str {
            "silent"
        }

        fn infer(&self, mix: ArrayView4<f32>, mag: ArrayView4<f32>) -> SeparationResult<RawModelOutput> {
            assert_eq!(mix.shape(), self.adapter.mix_shape());
            assert_eq!(mag.shape(), self.adapter.mag_shape());
            self.calls.fetch_add(1, Ordering::SeqCst);

            let a = &self.adapter;
            Ok(RawModelOutput {
                x: ArrayD::zeros(IxDyn(&[1, a.stems, a.channels * 2, a.freq_bins, a.frames])),
                xt: ArrayD::zeros(IxDyn(&[1, a.stems, a.channels, a.segment_length])),
            })
        }
    }

    fn small_config() -> SeparationConfig {
        // 0.1 s segments keep the tests fast
        SeparationConfig::default().with_segment_seconds(0.1).with_fft_size(512)
    }

    fn silent_separator(config: SeparationConfig) -> (Separator, Arc<SilentModel>) {
        let model = Arc::new(SilentModel {
            adapter: ModelAdapter::from_config(&config),
            calls: AtomicUsize::new(0),
        });
        let separator = Separator::new(config, model.clone()).unwrap();
        (separator, model)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let (_, model) = silent_separator(small_config());
        assert!(Separator::new(small_config().with_overlap(1.5), model).is_err());
    }

    #[test]
    fn test_rejects_bad_input() {
        let (separator, _) = silent_separator(small_config());
        let empty = Waveform::silence(0, 44100).unwrap();
        assert!(matches!(separator.separate(&empty), Err(SeparationError::InvalidInput(_))));

        let wrong_rate = Waveform::silence(100, 48000).unwrap();
        assert!(matches!(separator.separate(&wrong_rate), Err(SeparationError::InvalidInput(_))));
    }

    #[test]
    fn test_one_call_per_segment() {
        let config = small_config();
        let (separator, model) = silent_separator(config.clone());
        let wf = Waveform::silence(20_000, 44100).unwrap();

        let stems = separator.separate(&wf).unwrap();
        let expected = 20_000usize.div_ceil(config.stride());
        assert_eq!(model.calls.load(Ordering::SeqCst), expected);
        assert_eq!(stems.stats.segments_processed, expected);
        assert_eq!(stems.stats.backend, "silent");
        assert_eq!(stems.names(), vec!["drums", "bass", "other", "vocals"]);
        assert!(stems.stems.iter().all(|s| s.len() == 20_000));
    }

    #[test]
    fn test_progress_sequence() {
        let (separator, _) = silent_separator(small_config());
        let wf = Waveform::silence(10_000, 44100).unwrap();
        let mut seen = Vec::new();
        separator.separate_with_progress(&wf, |p| seen.push(*p)).unwrap();

        assert_eq!(seen.first().map(|p| p.state), Some(PipelineState::Normalizing));
        assert_eq!(seen.last().map(|p| p.state), Some(PipelineState::Complete));

        let separating: Vec<usize> = seen
            .iter()
            .filter(|p| p.state == PipelineState::Separating)
            .map(|p| p.segments_done)
            .collect();
        let total = seen[0].segments_total;
        assert_eq!(separating, (0..=total).collect::<Vec<_>>());
        assert_eq!(seen.last().map(|p| p.fraction()), Some(1.0));
    }

    #[test]
    fn test_instrumental_appended() {
        let config = small_config().with_instrumental(true);
        let (separator, _) = silent_separator(config);
        let wf = Waveform::silence(5_000, 44100).unwrap();
        let stems = separator.separate(&wf).unwrap();
        assert_eq!(stems.len(), 5);
        assert!(stems.get("instrumental").is_some());
    }

    #[test]
    fn test_process_segment_rejects_wrong_length() {
        let (separator, _) = silent_separator(small_config());
        let segment = Segment {
            index: 0,
            offset: 0,
            length: 10,
            padded: Array2::zeros((2, 10)),
        };
        assert!(separator.process_segment(&segment).unwrap_err().is_contract_violation());
    }

    fn truncated_model(_mix: ArrayView4<f32>, _mag: ArrayView4<f32>) -> SeparationResult<RawModelOutput> {
        Ok(RawModelOutput {
            x: ArrayD::zeros(IxDyn(&[1, 4, 4, 256, 3])),
            xt: ArrayD::zeros(IxDyn(&[1, 4, 2, 100])),
        })
    }

    #[test]
    fn test_wrong_output_shape_aborts_file() {
        let separator = Separator::new(small_config(), Arc::new(truncated_model)).unwrap();
        let err = separator.separate(&Waveform::silence(5_000, 44100).unwrap()).unwrap_err();
        assert!(matches!(err, SeparationError::OutputShape { .. }));
    }

    #[test]
    fn test_run_segments_identity_parallel_matches_sequential() {
        let wf = Waveform::from_channels(
            (0..30_000).map(|i| (i as f32 * 0.01).sin()).collect(),
            (0..30_000).map(|i| (i as f32 * 0.02).cos()).collect(),
            44100,
        )
        .unwrap();

        let identity = |segment: &Segment| -> SeparationResult<Array3<f32>> {
            let trimmed = center_trim(segment.padded.view().insert_axis(Axis(0)), segment.length)?;
            let plane = trimmed.index_axis(Axis(0), 0);
            ndarray::stack(Axis(0), &[plane; 4]).map_err(|e| SeparationError::ContractViolation(e.to_string()))
        };

        let (sequential, _) = silent_separator(small_config());
        let (parallel, _) = silent_separator(small_config().with_parallel_segments(true));

        let a = sequential.run_segments(&wf, identity).unwrap();
        let b = parallel.run_segments(&wf, identity).unwrap();
        assert_eq!(a.dim(), (4, 2, 30_000));
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
        for plane in a.outer_iter() {
            for (x, y) in plane.iter().zip(wf.view().iter()) {
                assert!((x - y).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_batch_keeps_files_independent() {
        let (separator, model) = silent_separator(small_config());
        let files = vec![
            Waveform::silence(3_000, 44100).unwrap(),
            Waveform::silence(9_000, 44100).unwrap(),
            Waveform::silence(0, 44100).unwrap(),
        ];
        let results = separator.separate_batch(&files);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().length, 3_000);
        assert_eq!(results[1].as_ref().unwrap().length, 9_000);
        assert!(results[2].is_err());
        assert!(model.calls.load(Ordering::SeqCst) > 0);
    }
}
