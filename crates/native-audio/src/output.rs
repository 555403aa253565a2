//! Speaker output backed by the default cpal device.

use crate::AudioDeviceError;
use crate::mixer::Mixer;
use crate::resample::resample_buffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use live_voice_core::codec::AudioBuffer;
use live_voice_core::level::LevelMeter;
use live_voice_core::scheduler::{AudioOutput, SourceId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    meter: LevelMeter,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    _stream: Stream,
}

impl CpalOutput {
    /// Opens the default output device. Every source that plays to the end is
    /// reported on `ended_tx`.
    pub fn open(ended_tx: mpsc::UnboundedSender<SourceId>) -> Result<Self, AudioDeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioDeviceError::NoDevice("No output device available".to_string()))?;
        let supported = device.default_output_config()?;
        let config = supported.config();
        info!(
            device = ?device.name().ok(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?supported.sample_format(),
            "Opening audio output"
        );

        let meter = LevelMeter::new();
        let mixer = Arc::new(Mutex::new(Mixer::new(
            config.sample_rate.0,
            config.channels,
            meter.clone(),
            ended_tx.clone(),
        )));

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer.clone())?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer.clone())?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer.clone())?,
            format => {
                return Err(AudioDeviceError::Config(format!(
                    "Unsupported output format: {format:?}"
                )));
            }
        };
        stream.play()?;

        Ok(Self {
            mixer,
            sample_rate: config.sample_rate.0,
            meter,
            ended_tx,
            _stream: stream,
        })
    }

    /// Level handle on the playback mix.
    pub fn level(&self) -> LevelMeter {
        self.meter.clone()
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        lock(&self.mixer)
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer().current_time()
    }

    fn start_source(&mut self, id: SourceId, buffer: &AudioBuffer, start_at: f64) {
        let mono = buffer.to_mono();
        match resample_buffer(
            &mono,
            f64::from(buffer.sample_rate()),
            f64::from(self.sample_rate),
        ) {
            Ok(samples) => self.mixer().add(id, samples, start_at, buffer.duration()),
            Err(e) => {
                error!(source_id = id.0, error = %e, "Failed to resample playback chunk");
                let _ = self.ended_tx.send(id);
            }
        }
    }

    fn stop_source(&mut self, id: SourceId) {
        self.mixer().stop(id);
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<Stream, AudioDeviceError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            lock(&mixer).render(&mut scratch);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*sample);
            }
        },
        |err| error!(error = %err, "Audio output stream error"),
        None,
    )?;
    Ok(stream)
}
