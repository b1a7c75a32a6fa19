//! WAV stem export
//!
//! 16-bit PCM, stereo. Samples are clamped to [-1, 1] and scaled
//! asymmetrically (`32768` below zero, `32767` above) so both full-scale
//! ends map to the extreme codes.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use dx_separate::Stem;

use crate::error::{AudioIoError, AudioIoResult};

/// Convert one float sample to 16-bit PCM
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Stereo 16-bit WAV encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl WavEncoder {
    fn spec(sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Encode a stem into a complete WAV file image
    pub fn encode(&self, stem: &Stem) -> AudioIoResult<Vec<u8>> {
        if stem.left().len() != stem.right().len() {
            return Err(AudioIoError::EncodingError(format!(
                "stem {} has channels of {} and {} samples",
                stem.name,
                stem.left().len(),
                stem.right().len()
            )));
        }

        let encode_failed = |e: hound::Error| AudioIoError::EncodingError(e.to_string());
        let mut cursor = Cursor::new(Vec::with_capacity(44 + stem.len() * 4));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, Self::spec(stem.sample_rate)).map_err(encode_failed)?;
            for (&l, &r) in stem.left().iter().zip(stem.right()) {
                writer.write_sample(to_pcm16(l)).map_err(encode_failed)?;
                writer.write_sample(to_pcm16(r)).map_err(encode_failed)?;
            }
            writer.finalize().map_err(encode_failed)?;
        }

        Ok(cursor.into_inner())
    }

    /// Encode and write one stem to `path`
    pub fn write<P: AsRef<Path>>(&self, path: P, stem: &Stem) -> AudioIoResult<()> {
        let path = path.as_ref();
        let bytes = self.encode(stem)?;
        fs::write(path, bytes).map_err(|e| AudioIoError::WriteError(format!("{}: {}", path.display(), e)))
    }
}

/// Write every stem as `<dir>/<stem name>.wav`, creating `dir` if needed.
/// Returns the written paths in stem order.
pub fn write_stems<P: AsRef<Path>>(dir: P, stems: &[Stem]) -> AudioIoResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| AudioIoError::WriteError(format!("{}: {}", dir.display(), e)))?;

    let encoder = WavEncoder;
    let mut written = Vec::with_capacity(stems.len());
    for stem in stems {
        let path = dir.join(format!("{}.wav", stem.name));
        encoder.write(&path, stem)?;
        log::debug!("Wrote {} ({:.2}s)", path.display(), stem.duration());
        written.push(path);
    }

    log::info!("Wrote {} stems to {}", written.len(), dir.display());
    Ok(written)
}
