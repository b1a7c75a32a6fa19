//! Sample rate conversion to the model rate (rubato)

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{AudioIoError, AudioIoResult};

/// Resample planar channels from `from_rate` to `to_rate`.
///
/// The whole file is one chunk; the resampler is flushed afterwards and its
/// delay removed, so every output channel has `round(len * to / from)`
/// samples aligned with the input.
pub fn resample_channels(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> AudioIoResult<Vec<Vec<f32>>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioIoError::SampleRateConversion(format!(
            "invalid sample rates: {} Hz -> {} Hz",
            from_rate, to_rate
        )));
    }
    let input_len = channels.first().map(|c| c.len()).unwrap_or(0);
    if from_rate == to_rate || input_len == 0 {
        return Ok(channels.to_vec());
    }
    if channels.iter().any(|c| c.len() != input_len) {
        return Err(AudioIoError::SampleRateConversion("channels differ in length".into()));
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (input_len as f64 * ratio).round() as usize;
    log::info!("Resampling {} Hz -> {} Hz ({} samples)", from_rate, to_rate, input_len);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let failed = |e: &dyn std::fmt::Display| AudioIoError::SampleRateConversion(e.to_string());
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, channels.len()).map_err(|e| failed(&e))?;
    let delay = resampler.output_delay();

    let mut output = resampler.process(channels, None).map_err(|e| failed(&e))?;
    let tail = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|e| failed(&e))?;

    for (channel, rest) in output.iter_mut().zip(tail) {
        channel.extend(rest);
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]];
        assert_eq!(resample_channels(&input, 44100, 44100).unwrap(), input);
    }

    #[test]
    fn test_invalid_rates() {
        let input = vec![vec![0.0; 4]];
        assert!(matches!(
            resample_channels(&input, 0, 44100),
            Err(AudioIoError::SampleRateConversion(_))
        ));
    }

    #[test]
    fn test_upsample_length_and_level() {
        let from = 22050;
        let len = 22050;
        let sine: Vec<f32> = (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 441.0 * i as f32 / from as f32).sin() * 0.5)
            .collect();
        let input = vec![sine.clone(), sine];

        let output = resample_channels(&input, from, 44100).unwrap();
        assert_eq!(output.len(), 2);
        assert!(output.iter().all(|c| c.len() == 44100));

        // Level preserved away from the edges
        let peak = output[0][4410..39690].iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.5).abs() < 0.02, "peak {}", peak);
    }
}
