//! cpal-backed speaker and microphone for the live voice agent.

pub mod microphone;
pub mod mixer;
pub mod output;
pub mod resample;

pub use microphone::CpalMicrophone;
pub use output::CpalOutput;

use cpal::{BuildStreamError, DefaultStreamConfigError, PlayStreamError};
use rubato::{ResampleError, ResamplerConstructionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioDeviceError {
    #[error("audio device unavailable: {0}")]
    NoDevice(String),
    #[error("unsupported device configuration: {0}")]
    Config(String),
    #[error("failed to query device configuration: {0}")]
    DefaultConfig(#[from] DefaultStreamConfigError),
    #[error("failed to build stream: {0}")]
    Build(#[from] BuildStreamError),
    #[error("failed to start stream: {0}")]
    Play(#[from] PlayStreamError),
    #[error("failed to create resampler: {0}")]
    ResamplerConstruction(#[from] ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] ResampleError),
}
