//! # dx-separate: Blind Audio Source Separation
//!
//! Splits a stereo mix into stems (drums, bass, other, vocals and optionally
//! guitar, piano) with a hybrid time/frequency separator network:
//!
//! ```text
//! Waveform ──► reference normalize ──► ChunkScheduler ──► Segment (padded)
//!                                                           │
//!                     ┌─────────── SpectralFrontend ◄───────┤
//!                     │   STFT ─► CAC ─► normalize          │ normalize
//!                     ▼                                     ▼
//!                ModelAdapter::pack ─► InferenceBackend::infer ─► unpack
//!                                                           │
//!            ispec(mask) + residual ─► center_trim ─► OutputAccumulator
//!                                                           │
//!                          StemPostProcessor ◄── finalize ◄─┘
//! ```
//!
//! ## Modules
//! - `config` - Segment/overlap/FFT/stem configuration with validation
//! - `tensor` - Waveform container and model I/O tensors
//! - `spectral` - Model-side spectrogram (pad, crop, CAC) and its inverse
//! - `adapter` - Model contract: input packing, output verification
//! - `inference` - tract ONNX backend
//! - `chunking` - Segment schedule, tail padding, center trimming
//! - `stitch` - Triangular-weighted overlap-add accumulator
//! - `postprocess` - Denormalization, instrumental sum, peak normalization
//! - `separator` - Per-file pipeline, progress and batch entry point

pub mod adapter;
pub mod chunking;
pub mod config;
pub mod inference;
pub mod postprocess;
pub mod separator;
pub mod spectral;
pub mod stitch;
pub mod tensor;

mod error;

pub use adapter::{InferenceBackend, ModelAdapter};
pub use chunking::{ChunkScheduler, Segment, SegmentWindow, center_trim, coverage_gaps, pad_segment};
pub use config::{INSTRUMENTAL, MODEL_SAMPLE_RATE, STEMS_4, STEMS_6, SeparationConfig, VOCALS};
pub use error::{SeparationError, SeparationResult};
pub use inference::TractBackend;
pub use postprocess::{Stem, StemPostProcessor, peak_normalize};
pub use separator::{PipelineState, SeparatedStems, SeparationProgress, SeparationStats, Separator};
pub use spectral::SpectralFrontend;
pub use stitch::OutputAccumulator;
pub use tensor::{CHANNELS, ModelInputs, ModelOutput, RawModelOutput, Waveform};
