//! dx-io: Audio I/O for Demix
//!
//! The separator's collaborators on both ends of the pipeline:
//! - `decoder` - WAV via hound, compressed formats via symphonia, converted
//!   to the canonical stereo `Waveform` at the model rate
//! - `resample` - rubato sinc resampling
//! - `encoder` - 16-bit stereo WAV export of finished stems

pub mod decoder;
pub mod encoder;
pub mod resample;

mod error;

pub use decoder::{AudioDecoder, AudioFileInfo, AudioFormat, DecodedAudio};
pub use encoder::{WavEncoder, to_pcm16, write_stems};
pub use error::{AudioIoError, AudioIoResult};
pub use resample::resample_channels;
