//! Sample-rate conversion using a windowed-sinc resampler

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 4096;

/// Resample mono audio from `from_rate` to `to_rate`
///
/// The resampler's output delay is trimmed so that sample `n` of the result
/// lines up with time `n / to_rate` of the input.
pub fn resample_to_target(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        anyhow::bail!("Cannot resample from {}Hz to {}Hz", from_rate, to_rate);
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .context("Failed to construct resampler")?;

    let expected_len = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected_len + delay + CHUNK_SIZE);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let take = resampler.input_frames_next();
        let chunk = [&samples[pos..pos + take]];
        let out = resampler.process(&chunk, None).context("Resampling failed")?;
        output.extend_from_slice(&out[0]);
        pos += take;
    }

    if pos < samples.len() {
        let tail = [&samples[pos..]];
        let out = resampler
            .process_partial(Some(&tail[..]), None)
            .context("Resampling tail failed")?;
        output.extend_from_slice(&out[0]);
    }

    // Flush until the delayed samples have all come out
    while output.len() < expected_len + delay {
        let out = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .context("Resampler flush failed")?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let end = (delay + expected_len).min(output.len());
    let start = delay.min(end);
    Ok(output[start..end].to_vec())
}
