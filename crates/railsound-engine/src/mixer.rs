//! Voice registry and output-stream construction.
//!
//! One mixer per [`AudioContext`](crate::context::AudioContext). The CPAL
//! callback sums every playing voice into the device buffer each period;
//! with a headless context no stream exists and [`Mixer::render`] is only
//! driven by tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::error::LoadError;
use crate::voice::{Buffer, BufferSlot, MAX_BUFFERS, MAX_VOICES, Voice, VoiceShared};

/// Registry of live voices plus the shared buffer pool.
pub(crate) struct Mixer {
    voices: Mutex<Vec<MixerSlot>>,
    buffers: Arc<AtomicUsize>,
    next_id: AtomicU64,
    out_rate: u32,
}

struct MixerSlot {
    id: u64,
    shared: Arc<VoiceShared>,
}

impl Mixer {
    pub(crate) fn new(out_rate: u32) -> Self {
        Mixer {
            voices: Mutex::new(Vec::new()),
            buffers: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            out_rate,
        }
    }

    /// Allocate a playback voice; fails when the registry is full.
    pub(crate) fn create_voice(self: &Arc<Self>) -> Result<Voice, LoadError> {
        let mut voices = self.voices.lock().unwrap();
        if voices.len() >= MAX_VOICES {
            return Err(LoadError::SourceAllocFailed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(VoiceShared::default());
        voices.push(MixerSlot {
            id,
            shared: shared.clone(),
        });
        Ok(Voice::new(shared, self.clone(), id))
    }

    /// Allocate `count` segment buffers from the pool.
    pub(crate) fn create_buffers(&self, count: usize) -> Result<Vec<Buffer>, LoadError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = BufferSlot::acquire(&self.buffers, MAX_BUFFERS)
                .ok_or(LoadError::BufferAllocFailed)?;
            out.push(Buffer::new(slot));
        }
        Ok(out)
    }

    pub(crate) fn release_voice(&self, id: u64) {
        self.voices.lock().unwrap().retain(|slot| slot.id != id);
    }

    pub(crate) fn voice_count(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    pub(crate) fn clear_voices(&self) {
        self.voices.lock().unwrap().clear();
    }

    /// Sum every playing voice into `out` (interleaved `f32`).
    pub(crate) fn render(&self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let voices = self.voices.lock().unwrap();
        for slot in voices.iter() {
            let mut ctrl = slot.shared.ctrl.lock().unwrap();
            ctrl.render(out, channels, self.out_rate);
        }
    }
}

/// Build a CPAL output stream that renders the mixer.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: &Arc<Mixer>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: &Arc<Mixer>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mixer_cb = mixer.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() != data.len() {
                scratch.resize(data.len(), 0.0);
            }
            mixer_cb.render(&mut scratch, channels);
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
