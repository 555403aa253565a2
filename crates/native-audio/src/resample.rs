use crate::AudioDeviceError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames per resampler call.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioDeviceError> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resamples one complete buffer. The result always holds exactly
/// `round(len * out / in)` samples so scheduled durations stay exact.
pub fn resample_buffer(
    samples: &[f32],
    in_sampling_rate: f64,
    out_sampling_rate: f64,
) -> Result<Vec<f32>, AudioDeviceError> {
    if in_sampling_rate == out_sampling_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected =
        (samples.len() as f64 * out_sampling_rate / in_sampling_rate).round() as usize;
    let mut resampler = create_resampler(in_sampling_rate, out_sampling_rate, RESAMPLE_CHUNK)?;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let res = resampler.process(&[&samples[pos..pos + n]], None)?;
        out.extend_from_slice(&res[0]);
        pos += n;
    }
    if pos < samples.len() {
        let res = resampler.process_partial(Some(&[&samples[pos..]][..]), None)?;
        out.extend_from_slice(&res[0]);
    }
    let tail = resampler.process_partial(None::<&[&[f32]]>, None)?;
    out.extend_from_slice(&tail[0]);

    out.resize(expected, 0.0);
    Ok(out)
}

/// Resamples an unbounded stream arriving in arbitrary block sizes.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Passes samples through untouched when the rates already match.
    pub fn new(in_sampling_rate: f64, out_sampling_rate: f64) -> Result<Self, AudioDeviceError> {
        let inner = if in_sampling_rate == out_sampling_rate {
            None
        } else {
            Some(create_resampler(
                in_sampling_rate,
                out_sampling_rate,
                RESAMPLE_CHUNK,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Appends resampled output for `input` to `out`. Input that does not yet
    /// fill a resampler chunk is held for the next call.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), AudioDeviceError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        let mut pos = 0;
        while self.pending.len() - pos >= resampler.input_frames_next() {
            let n = resampler.input_frames_next();
            let res = resampler.process(&[&self.pending[pos..pos + n]], None)?;
            out.extend_from_slice(&res[0]);
            pos += n;
        }
        self.pending.drain(..pos);
        Ok(())
    }
}
