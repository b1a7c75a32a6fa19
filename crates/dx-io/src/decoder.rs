//! Audio decoding
//!
//! Supports:
//! - WAV (via hound, 8/16/24/32-bit int and 32-bit float)
//! - FLAC, MP3, OGG Vorbis, AAC/M4A, AIFF, ALAC (via symphonia)
//!
//! Decoded audio is turned into the canonical separator input by
//! `DecodedAudio::into_waveform`: mono is duplicated, extra channels are
//! dropped and the result is resampled to the model rate.

use std::fs::File;
use std::path::Path;

use dx_separate::Waveform;
use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{AudioIoError, AudioIoResult};
use crate::resample::resample_channels;

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    Aac,
    Aiff,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            "aac" | "m4a" | "mp4" => Self::Aac,
            "aif" | "aiff" => Self::Aiff,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

/// Audio file metadata, read without decoding the samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFileInfo {
    pub format: AudioFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Total sample frames, 0 when the container does not say
    pub num_frames: u64,
    /// Duration in seconds
    pub duration: f64,
    pub file_size: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECODED AUDIO
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded audio at its native rate and channel count
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Deinterleaved, one Vec per channel
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
    pub format: AudioFormat,
}

impl DecodedAudio {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames
    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Canonical stereo waveform at `target_rate`
    pub fn into_waveform(self, target_rate: u32) -> AudioIoResult<Waveform> {
        let mut channels = self.channels;
        match channels.len() {
            0 => return Err(AudioIoError::ReadError("no audio channels".into())),
            1 => {
                let mono = channels[0].clone();
                channels.push(mono);
            }
            2 => {}
            n => {
                log::warn!("Keeping the first 2 of {} channels", n);
                channels.truncate(2);
            }
        }

        let mut channels = if self.sample_rate != target_rate {
            resample_channels(&channels, self.sample_rate, target_rate)?
        } else {
            channels
        };

        let right = channels.pop().unwrap_or_default();
        let left = channels.pop().unwrap_or_default();
        Ok(Waveform::from_channels(left, right, target_rate)?)
    }
}

fn deinterleave(samples: &[f32], num_channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / num_channels.max(1);
    let mut channels = vec![Vec::with_capacity(num_frames); num_channels];
    for frame in samples.chunks_exact(num_channels.max(1)) {
        for (ch, &sample) in channels.iter_mut().zip(frame) {
            ch.push(sample);
        }
    }
    channels
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECODER
// ═══════════════════════════════════════════════════════════════════════════════

/// File decoder front end
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode a whole file
    pub fn decode<P: AsRef<Path>>(path: P) -> AudioIoResult<DecodedAudio> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AudioIoError::InputNotFound(path.display().to_string()));
        }

        let format = AudioFormat::from_path(path);
        let decoded = if format == AudioFormat::Wav {
            Self::decode_wav(path)?
        } else {
            Self::decode_symphonia(path, format)?
        };

        log::info!(
            "Decoded {}: {} ch, {} Hz, {:.2}s",
            path.display(),
            decoded.num_channels(),
            decoded.sample_rate,
            decoded.duration()
        );
        Ok(decoded)
    }

    /// Read file metadata without decoding
    pub fn probe<P: AsRef<Path>>(path: P) -> AudioIoResult<AudioFileInfo> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)
            .map_err(|_| AudioIoError::InputNotFound(path.display().to_string()))?
            .len();
        let format = AudioFormat::from_path(path);

        if format == AudioFormat::Wav {
            let reader = hound::WavReader::open(path).map_err(|e| AudioIoError::ReadError(e.to_string()))?;
            let spec = reader.spec();
            let num_frames = reader.duration() as u64;
            return Ok(AudioFileInfo {
                format,
                channels: spec.channels,
                sample_rate: spec.sample_rate,
                num_frames,
                duration: num_frames as f64 / spec.sample_rate as f64,
                file_size,
            });
        }

        let probed = Self::open_symphonia(path)?;
        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioIoError::ReadError("no audio track found".into()))?;

        let channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioIoError::ReadError("unknown sample rate".into()))?;
        let num_frames = track.codec_params.n_frames.unwrap_or(0);

        Ok(AudioFileInfo {
            format,
            channels,
            sample_rate,
            num_frames,
            duration: num_frames as f64 / sample_rate as f64,
            file_size,
        })
    }

    fn decode_wav(path: &Path) -> AudioIoResult<DecodedAudio> {
        let read_failed = |e: hound::Error| AudioIoError::ReadError(e.to_string());
        let reader = hound::WavReader::open(path).map_err(read_failed)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(read_failed)?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<Result<_, _>>()
                    .map_err(read_failed)?
            }
        };

        Ok(DecodedAudio {
            channels: deinterleave(&samples, spec.channels as usize),
            sample_rate: spec.sample_rate,
            format: AudioFormat::Wav,
        })
    }

    fn open_symphonia(path: &Path) -> AudioIoResult<symphonia::core::probe::ProbeResult> {
        let file = File::open(path).map_err(|_| AudioIoError::InputNotFound(path.display().to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioIoError::ReadError(e.to_string()))
    }

    fn decode_symphonia(path: &Path, format: AudioFormat) -> AudioIoResult<DecodedAudio> {
        let mut reader = Self::open_symphonia(path)?.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioIoError::ReadError("no audio track found".into()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioIoError::ReadError("unknown sample rate".into()))?;
        let mut num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioIoError::ReadError(e.to_string()))?;

        let mut interleaved: Vec<f32> = Vec::new();
        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(AudioIoError::ReadError(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    num_channels = spec.channels.count();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
                }
                Err(e) => return Err(AudioIoError::ReadError(e.to_string())),
            }
        }

        if num_channels == 0 {
            return Err(AudioIoError::ReadError("could not determine channel count".into()));
        }

        Ok(DecodedAudio {
            channels: deinterleave(&interleaved, num_channels),
            sample_rate,
            format,
        })
    }
}
