//! Microphone input backed by the default cpal device.

use crate::AudioDeviceError;
use crate::resample::StreamResampler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use live_voice_core::capture::{CaptureError, CaptureStream, FrameSink, Microphone};
use live_voice_core::codec::INPUT_SAMPLE_RATE;
use tracing::{error, info};

/// Opens the named input device, or the host default.
#[derive(Debug, Default, Clone)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn device(&self) -> Result<Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {e}")))?
                .find(|dev| dev.name().unwrap_or_default() == *name)
                .ok_or_else(|| CaptureError::Device(format!("Device '{name}' not found"))),
            None => host.default_input_device().ok_or_else(|| {
                CaptureError::Device("No default input device available".to_string())
            }),
        }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&mut self, sink: FrameSink) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let device = self.device()?;
        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        let config = supported.config();
        info!(
            device = ?device.name().ok(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?supported.sample_format(),
            "Opening microphone"
        );

        let resampler = StreamResampler::new(
            f64::from(config.sample_rate.0),
            f64::from(INPUT_SAMPLE_RATE),
        )
        .map_err(|e| CaptureError::Device(e.to_string()))?;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, sink, resampler),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, sink, resampler),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, sink, resampler),
            format => {
                return Err(CaptureError::Device(format!(
                    "Unsupported input format: {format:?}"
                )));
            }
        }
        .map_err(open_error)?;

        stream
            .play()
            .map_err(|e| CaptureError::Device(format!("Failed to start stream: {e}")))?;

        Ok(Box::new(CpalCaptureStream {
            stream: Some(stream),
        }))
    }
}

/// Backend-specific build failures are how hosts report a refused microphone.
fn open_error(error: AudioDeviceError) -> CaptureError {
    match error {
        AudioDeviceError::Build(BuildStreamError::BackendSpecific { err }) => {
            CaptureError::PermissionDenied(err.description)
        }
        other => CaptureError::Device(other.to_string()),
    }
}

struct CpalCaptureStream {
    stream: Option<Stream>,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                error!(error = %e, "Failed to pause microphone stream");
            }
        }
    }
}

/// Averages interleaved frames into mono f32.
pub fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
            sum / frame.len() as f32
        })
        .collect()
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut sink: FrameSink,
    mut resampler: StreamResampler,
) -> Result<Stream, AudioDeviceError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    let mut resampled = Vec::new();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = downmix(data, channels);
            resampled.clear();
            if let Err(e) = resampler.process(&mono, &mut resampled) {
                error!(error = %e, "Failed to resample microphone input");
                return;
            }
            // A closed sink means capture was torn down; the stream is dropped shortly.
            sink.push_samples(&resampled);
        },
        |err| error!(error = %err, "Microphone stream error"),
        None,
    )?;
    Ok(stream)
}
