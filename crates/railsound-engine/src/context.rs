//! Audio device/context lifecycle.
//!
//! One [`AudioContext`] per process, created by the host before any track
//! and dropped after the last one; that ordering is caller discipline, not
//! enforced here. The context owns the output device and stream. Tracks
//! only ever see the cloneable [`EngineHandle`], which keeps the dependency
//! explicit in every constructor signature instead of hiding a global.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::LoadError;
use crate::events::EventSink;
use crate::mixer::{self, Mixer};
use crate::voice::{Buffer, Voice};

/// Listener position at startup.
pub const LISTENER_POSITION: [f32; 3] = [0.0, 0.0, 0.0];
/// Listener velocity at startup.
pub const LISTENER_VELOCITY: [f32; 3] = [0.0, 0.0, 0.0];
/// Listener orientation at startup: front (0,0,-1), up (0,1,0).
pub const LISTENER_ORIENTATION: [f32; 6] = [0.0, 0.0, -1.0, 0.0, 1.0, 0.0];

/// Output rate assumed by a headless context.
const HEADLESS_RATE: u32 = 44_100;

/// Fixed listener attributes, set once at context creation.
#[derive(Debug, Clone, Copy)]
pub struct Listener {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub orientation: [f32; 6],
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            position: LISTENER_POSITION,
            velocity: LISTENER_VELOCITY,
            orientation: LISTENER_ORIENTATION,
        }
    }
}

/// The process-wide audio context.
pub struct AudioContext {
    handle: EngineHandle,
    listener: Listener,
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl AudioContext {
    /// Open the default output device and start the output stream.
    ///
    /// This is the engine's one fatal failure path: without a device no
    /// audio is possible at all, so the error is returned to the host
    /// instead of being swallowed.
    pub fn open(sink: Arc<dyn EventSink>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"))?;
        let config = pick_output_config(&device)?;
        let stream_config: cpal::StreamConfig = config.clone().into();

        let mixer = Arc::new(Mixer::new(stream_config.sample_rate));
        let stream =
            mixer::build_output_stream(&device, &stream_config, config.sample_format(), &mixer)
                .context("build output stream")?;
        stream.play().context("start output stream")?;

        let device_name = device.description().ok().map(|d| d.to_string());
        tracing::info!(
            device = device_name.as_deref().unwrap_or("unknown"),
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            "audio context opened"
        );

        Ok(AudioContext {
            handle: EngineHandle { mixer, sink },
            listener: Listener::default(),
            device_name,
            stream: Some(stream),
        })
    }

    /// A context with no device or stream. Voices register and hold state
    /// but are never rendered; used by tests and CI machines with no audio
    /// hardware.
    pub fn headless(sink: Arc<dyn EventSink>) -> Self {
        AudioContext {
            handle: EngineHandle {
                mixer: Arc::new(Mixer::new(HEADLESS_RATE)),
                sink,
            },
            listener: Listener::default(),
            device_name: None,
            stream: None,
        }
    }

    /// The cloneable handle tracks are constructed with.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Tear down stream then device. Consumes the context so it can only
    /// happen once; every track must already be dropped.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
        }
        let orphaned = self.handle.mixer.voice_count();
        if orphaned > 0 {
            tracing::warn!(voices = orphaned, "context closed with live voices");
        }
        self.handle.mixer.clear_voices();
        tracing::info!("audio context closed");
    }
}

/// Send + Sync handle used to allocate voices and buffers and to reach the
/// event sink. Cloned freely into tracks, sequencers, and managers.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) mixer: Arc<Mixer>,
    pub(crate) sink: Arc<dyn EventSink>,
}

impl EngineHandle {
    pub(crate) fn create_voice(&self) -> Result<Voice, LoadError> {
        self.mixer.create_voice()
    }

    pub(crate) fn create_buffers(&self, count: usize) -> Result<Vec<Buffer>, LoadError> {
        self.mixer.create_buffers(count)
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}

/// Choose the best output config: highest sample rate, then the friendliest
/// sample format.
fn pick_output_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = range.max_sample_rate();
        let format_rank = sample_format_rank(range.sample_format());
        let cfg = range.with_sample_rate(rate);
        let replace = match &best {
            None => true,
            Some((b_rate, b_rank, _)) => {
                rate > *b_rate || (rate == *b_rate && format_rank < *b_rank)
            }
        };
        if replace {
            best = Some((rate, format_rank, cfg));
        }
    }

    Ok(best.unwrap().2)
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}
