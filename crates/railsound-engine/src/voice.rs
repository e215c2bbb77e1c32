//! Software playback voices.
//!
//! A voice is the engine's rendition of a hardware playback source: it owns
//! an ordered queue of uploaded buffers, a byte cursor across their
//! concatenation, a whole-queue loop flag, and the
//! gain/pitch/position/velocity attributes. The mixer callback pulls sample
//! frames out of every playing voice each output period; everything here is
//! plain shared state, so voices also work without a device (headless
//! context) and under test.
//!
//! The byte cursor lives in source-byte space (frames × frame size), which
//! is what the segment boundaries of a labeled track are expressed in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LoadError;
use crate::mixer::Mixer;
use crate::wave::WaveFormat;

/// Voice registry capacity; exhaustion is the source-allocation failure.
pub(crate) const MAX_VOICES: usize = 64;

/// Buffer pool capacity (three segment buffers per voice).
pub(crate) const MAX_BUFFERS: usize = 3 * MAX_VOICES;

/// Playback state of a voice, queried directly by tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// A pool reservation; releases its slot when dropped.
pub(crate) struct BufferSlot {
    counter: Arc<AtomicUsize>,
}

impl BufferSlot {
    /// Reserve one slot, rolling back on exhaustion.
    pub(crate) fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let prev = counter.fetch_add(1, Ordering::Relaxed);
        if prev >= max {
            counter.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(BufferSlot {
            counter: counter.clone(),
        })
    }
}

impl Drop for BufferSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// PCM bytes plus the format needed to read them.
#[derive(Clone)]
pub(crate) struct UploadedData {
    pub(crate) bytes: Arc<[u8]>,
    pub(crate) format: WaveFormat,
    pub(crate) sample_rate: u32,
}

/// An allocated (and possibly uploaded) segment buffer.
///
/// Allocation and upload are separate steps with separate failure modes,
/// mirroring the load pipeline's error taxonomy.
pub struct Buffer {
    slot: Option<BufferSlot>,
    data: Option<UploadedData>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("allocated", &self.slot.is_some())
            .field("uploaded", &self.data.is_some())
            .finish()
    }
}

impl Buffer {
    pub(crate) fn new(slot: BufferSlot) -> Self {
        Buffer {
            slot: Some(slot),
            data: None,
        }
    }

    /// Upload segment bytes. Rejects empty or frame-misaligned payloads and
    /// a zero sample rate.
    pub fn upload(
        &mut self,
        bytes: &[u8],
        format: WaveFormat,
        sample_rate: u32,
    ) -> Result<(), LoadError> {
        if sample_rate == 0 || bytes.is_empty() || bytes.len() % format.frame_bytes() != 0 {
            return Err(LoadError::BufferUploadFailed);
        }
        self.data = Some(UploadedData {
            bytes: bytes.into(),
            format,
            sample_rate,
        });
        Ok(())
    }
}

/// A buffer attached to a voice queue; keeps its pool slot reserved.
pub(crate) struct QueuedBuffer {
    pub(crate) data: UploadedData,
    _slot: BufferSlot,
}

/// State shared between the voice handle, the mixer callback, and a track's
/// cursor watcher.
#[derive(Default)]
pub(crate) struct VoiceShared {
    pub(crate) ctrl: Mutex<VoiceCtrl>,
}

impl VoiceShared {
    pub(crate) fn byte_offset(&self) -> u64 {
        self.ctrl.lock().unwrap().byte_offset()
    }

    pub(crate) fn set_byte_offset(&self, bytes: u64) {
        self.ctrl.lock().unwrap().set_byte_offset(bytes);
    }

    pub(crate) fn state(&self) -> VoiceState {
        self.ctrl.lock().unwrap().state
    }
}

/// The mutable voice state proper.
pub(crate) struct VoiceCtrl {
    pub(crate) queue: Vec<QueuedBuffer>,
    pub(crate) state: VoiceState,
    /// Fractional frame position across the concatenated queue.
    pub(crate) cursor_frames: f64,
    pub(crate) gain: f32,
    pub(crate) pitch: f32,
    pub(crate) looping: bool,
    pub(crate) position: [f32; 3],
    pub(crate) velocity: [f32; 3],
}

impl Default for VoiceCtrl {
    fn default() -> Self {
        VoiceCtrl {
            queue: Vec::new(),
            state: VoiceState::Initial,
            cursor_frames: 0.0,
            gain: 1.0,
            pitch: 1.0,
            looping: false,
            position: [0.0; 3],
            velocity: [0.0; 3],
        }
    }
}

impl VoiceCtrl {
    fn frame_bytes(&self) -> usize {
        self.queue
            .first()
            .map(|b| b.data.format.frame_bytes())
            .unwrap_or(0)
    }

    fn total_frames(&self) -> u64 {
        self.queue
            .iter()
            .map(|b| (b.data.bytes.len() / b.data.format.frame_bytes()) as u64)
            .sum()
    }

    pub(crate) fn byte_offset(&self) -> u64 {
        let frame_bytes = self.frame_bytes() as u64;
        (self.cursor_frames.max(0.0) as u64) * frame_bytes
    }

    pub(crate) fn set_byte_offset(&mut self, bytes: u64) {
        let frame_bytes = self.frame_bytes() as u64;
        if frame_bytes > 0 {
            self.cursor_frames = (bytes / frame_bytes) as f64;
        }
    }

    /// Mix this voice into an interleaved `f32` output buffer.
    ///
    /// Playing voices advance the cursor by `pitch × src_rate / out_rate`
    /// frames per output frame; the end of the queue wraps when looping and
    /// stops the voice otherwise. Paused and stopped voices contribute
    /// nothing and do not move.
    pub(crate) fn render(&mut self, out: &mut [f32], out_channels: usize, out_rate: u32) {
        if self.state != VoiceState::Playing || out_channels == 0 || out_rate == 0 {
            return;
        }
        let total = self.total_frames();
        if total == 0 {
            self.state = VoiceState::Stopped;
            self.cursor_frames = 0.0;
            return;
        }

        let src_rate = self.queue[0].data.sample_rate;
        let step = f64::from(self.pitch.max(0.0))
            * doppler_factor(self.position, self.velocity)
            * f64::from(src_rate)
            / f64::from(out_rate);
        if step <= 0.0 {
            return;
        }
        let gain = self.gain * distance_gain(self.position);

        let frames_out = out.len() / out_channels;
        for frame in 0..frames_out {
            if self.cursor_frames >= total as f64 {
                if self.looping {
                    self.cursor_frames %= total as f64;
                } else {
                    self.state = VoiceState::Stopped;
                    self.cursor_frames = 0.0;
                    break;
                }
            }
            let (left, right) = self.sample_at(self.cursor_frames as u64);
            write_frame(out, frame, out_channels, left * gain, right * gain);
            self.cursor_frames += step;
        }
    }

    /// Decode the sample frame at a queue-wide frame index.
    fn sample_at(&self, frame: u64) -> (f32, f32) {
        let mut remaining = frame;
        for buf in &self.queue {
            let frames = (buf.data.bytes.len() / buf.data.format.frame_bytes()) as u64;
            if remaining < frames {
                return decode_frame(&buf.data.bytes, buf.data.format, remaining as usize);
            }
            remaining -= frames;
        }
        (0.0, 0.0)
    }
}

/// Handle owned by a track; releases the mixer slot on drop.
pub struct Voice {
    pub(crate) shared: Arc<VoiceShared>,
    mixer: Arc<Mixer>,
    id: u64,
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Voice {
    pub(crate) fn new(shared: Arc<VoiceShared>, mixer: Arc<Mixer>, id: u64) -> Self {
        Voice { shared, mixer, id }
    }

    /// Attach uploaded buffers in segment order. Fails if the voice already
    /// has a queue, has left the initial state, or any buffer was never
    /// uploaded.
    pub fn queue(&self, buffers: Vec<Buffer>) -> Result<(), LoadError> {
        let mut ctrl = self.shared.ctrl.lock().unwrap();
        if !ctrl.queue.is_empty() || ctrl.state != VoiceState::Initial {
            return Err(LoadError::QueueFailed);
        }

        let mut queued = Vec::with_capacity(buffers.len());
        for mut buffer in buffers {
            let (Some(slot), Some(data)) = (buffer.slot.take(), buffer.data.take()) else {
                return Err(LoadError::QueueFailed);
            };
            queued.push(QueuedBuffer { data, _slot: slot });
        }
        ctrl.queue = queued;
        Ok(())
    }

    pub fn play(&self) {
        self.shared.ctrl.lock().unwrap().state = VoiceState::Playing;
    }

    pub fn pause(&self) {
        let mut ctrl = self.shared.ctrl.lock().unwrap();
        if ctrl.state == VoiceState::Playing {
            ctrl.state = VoiceState::Paused;
        }
    }

    /// Hard stop: halts playback and rewinds the cursor.
    pub fn stop(&self) {
        let mut ctrl = self.shared.ctrl.lock().unwrap();
        ctrl.state = VoiceState::Stopped;
        ctrl.cursor_frames = 0.0;
    }

    pub fn state(&self) -> VoiceState {
        self.shared.state()
    }

    pub fn byte_offset(&self) -> u64 {
        self.shared.byte_offset()
    }

    pub fn set_byte_offset(&self, bytes: u64) {
        self.shared.set_byte_offset(bytes);
    }

    pub fn set_gain(&self, gain: f32) -> Result<(), LoadError> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(LoadError::ApplyParamFailed { param: "VOLUME" });
        }
        self.shared.ctrl.lock().unwrap().gain = gain;
        Ok(())
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<(), LoadError> {
        if !pitch.is_finite() || pitch < 0.0 {
            return Err(LoadError::ApplyParamFailed { param: "PITCH" });
        }
        self.shared.ctrl.lock().unwrap().pitch = pitch;
        Ok(())
    }

    pub fn set_looping(&self, looping: bool) -> Result<(), LoadError> {
        self.shared.ctrl.lock().unwrap().looping = looping;
        Ok(())
    }

    pub fn set_position(&self, position: [f32; 3]) -> Result<(), LoadError> {
        if position.iter().any(|v| !v.is_finite()) {
            return Err(LoadError::ApplyParamFailed { param: "POSITION" });
        }
        self.shared.ctrl.lock().unwrap().position = position;
        Ok(())
    }

    pub fn set_velocity(&self, velocity: [f32; 3]) -> Result<(), LoadError> {
        if velocity.iter().any(|v| !v.is_finite()) {
            return Err(LoadError::ApplyParamFailed { param: "VELOCITY" });
        }
        self.shared.ctrl.lock().unwrap().velocity = velocity;
        Ok(())
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        self.mixer.release_voice(self.id);
    }
}

/// Inverse-distance attenuation against the fixed listener at the origin.
fn distance_gain(position: [f32; 3]) -> f32 {
    let dist = (position[0] * position[0] + position[1] * position[1] + position[2] * position[2])
        .sqrt();
    1.0 / dist.max(1.0)
}

/// Doppler shift for a moving source against the stationary listener at the
/// origin. Radial speed is clamped well below the speed of sound so a
/// misconfigured velocity cannot blow up the step.
fn doppler_factor(position: [f32; 3], velocity: [f32; 3]) -> f64 {
    const SPEED_OF_SOUND: f32 = 343.3;

    let dist =
        (position[0] * position[0] + position[1] * position[1] + position[2] * position[2]).sqrt();
    if dist <= f32::EPSILON {
        return 1.0;
    }

    // velocity component along listener→source; negative when approaching
    let radial = (position[0] * velocity[0]
        + position[1] * velocity[1]
        + position[2] * velocity[2])
        / dist;
    let radial = radial.clamp(-0.9 * SPEED_OF_SOUND, 0.9 * SPEED_OF_SOUND);
    f64::from(SPEED_OF_SOUND / (SPEED_OF_SOUND + radial))
}

fn decode_frame(bytes: &[u8], format: WaveFormat, frame: usize) -> (f32, f32) {
    let at = frame * format.frame_bytes();
    match format {
        WaveFormat::Mono8 => {
            let s = sample_u8(bytes, at);
            (s, s)
        }
        WaveFormat::Stereo8 => (sample_u8(bytes, at), sample_u8(bytes, at + 1)),
        WaveFormat::Mono16 => {
            let s = sample_i16(bytes, at);
            (s, s)
        }
        WaveFormat::Stereo16 => (sample_i16(bytes, at), sample_i16(bytes, at + 2)),
    }
}

/// 8-bit WAV samples are offset binary around 0x80.
fn sample_u8(bytes: &[u8], at: usize) -> f32 {
    (f32::from(bytes.get(at).copied().unwrap_or(0x80)) - 128.0) / 128.0
}

fn sample_i16(bytes: &[u8], at: usize) -> f32 {
    let lo = bytes.get(at).copied().unwrap_or(0);
    let hi = bytes.get(at + 1).copied().unwrap_or(0);
    f32::from(i16::from_le_bytes([lo, hi])) / 32_768.0
}

/// Map one source frame into the output frame: mono output averages the
/// pair, stereo (and wider) takes L/R into the first two channels.
fn write_frame(out: &mut [f32], frame: usize, channels: usize, left: f32, right: f32) {
    if channels == 1 {
        out[frame] += 0.5 * (left + right);
    } else {
        out[frame * channels] += left;
        out[frame * channels + 1] += right;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(bytes: Vec<u8>, format: WaveFormat, rate: u32) -> QueuedBuffer {
        let counter = Arc::new(AtomicUsize::new(0));
        QueuedBuffer {
            data: UploadedData {
                bytes: bytes.into(),
                format,
                sample_rate: rate,
            },
            _slot: BufferSlot::acquire(&counter, 8).unwrap(),
        }
    }

    fn ctrl_with(queue: Vec<QueuedBuffer>) -> VoiceCtrl {
        VoiceCtrl {
            queue,
            ..VoiceCtrl::default()
        }
    }

    #[test]
    fn decode_mono16_center_and_peaks() {
        let bytes: Vec<u8> = [0i16, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(decode_frame(&bytes, WaveFormat::Mono16, 0), (0.0, 0.0));
        let (l, _) = decode_frame(&bytes, WaveFormat::Mono16, 1);
        assert!((l - (i16::MAX as f32 / 32_768.0)).abs() < 1e-6);
        let (l, r) = decode_frame(&bytes, WaveFormat::Mono16, 2);
        assert_eq!((l, r), (-1.0, -1.0));
    }

    #[test]
    fn decode_mono8_is_offset_binary() {
        let bytes = vec![0x80, 0x00, 0xFF];
        assert_eq!(decode_frame(&bytes, WaveFormat::Mono8, 0), (0.0, 0.0));
        assert_eq!(decode_frame(&bytes, WaveFormat::Mono8, 1), (-1.0, -1.0));
        let (l, _) = decode_frame(&bytes, WaveFormat::Mono8, 2);
        assert!(l > 0.99);
    }

    #[test]
    fn decode_stereo16_splits_channels() {
        let bytes: Vec<u8> = [16_384i16, -16_384i16]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let (l, r) = decode_frame(&bytes, WaveFormat::Stereo16, 0);
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r + 0.5).abs() < 1e-6);
    }

    #[test]
    fn distance_gain_is_clamped_inside_unit_sphere() {
        assert_eq!(distance_gain([0.0, 0.0, 0.0]), 1.0);
        assert_eq!(distance_gain([0.0, 0.0, 1.0]), 1.0);
        assert!((distance_gain([0.0, 0.0, 2.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn doppler_raises_pitch_for_approaching_sources() {
        // source ahead of the listener, moving toward it
        let approaching = doppler_factor([0.0, 0.0, 10.0], [0.0, 0.0, -20.0]);
        assert!(approaching > 1.0);

        let receding = doppler_factor([0.0, 0.0, 10.0], [0.0, 0.0, 20.0]);
        assert!(receding < 1.0);

        assert_eq!(doppler_factor([0.0, 0.0, 10.0], [0.0; 3]), 1.0);
        assert_eq!(doppler_factor([0.0; 3], [0.0, 0.0, 50.0]), 1.0);
    }

    #[test]
    fn byte_offset_round_trips_through_frames() {
        let mut ctrl = ctrl_with(vec![queued(vec![0u8; 400], WaveFormat::Mono16, 44_100)]);
        ctrl.set_byte_offset(100);
        assert_eq!(ctrl.byte_offset(), 100);
        assert_eq!(ctrl.cursor_frames, 50.0);
    }

    #[test]
    fn render_advances_cursor_at_unit_pitch() {
        let mut ctrl = ctrl_with(vec![queued(vec![0u8; 800], WaveFormat::Mono16, 48_000)]);
        ctrl.state = VoiceState::Playing;
        let mut out = vec![0.0f32; 2 * 100];
        ctrl.render(&mut out, 2, 48_000);
        assert_eq!(ctrl.cursor_frames, 100.0);
        assert_eq!(ctrl.state, VoiceState::Playing);
    }

    #[test]
    fn render_stops_unlooped_voice_at_queue_end() {
        let mut ctrl = ctrl_with(vec![queued(vec![0u8; 20], WaveFormat::Mono16, 48_000)]);
        ctrl.state = VoiceState::Playing;
        let mut out = vec![0.0f32; 2 * 64];
        ctrl.render(&mut out, 2, 48_000);
        assert_eq!(ctrl.state, VoiceState::Stopped);
        assert_eq!(ctrl.cursor_frames, 0.0);
    }

    #[test]
    fn render_wraps_looped_voice() {
        let mut ctrl = ctrl_with(vec![queued(vec![0u8; 20], WaveFormat::Mono16, 48_000)]);
        ctrl.state = VoiceState::Playing;
        ctrl.looping = true;
        let mut out = vec![0.0f32; 2 * 64];
        ctrl.render(&mut out, 2, 48_000);
        assert_eq!(ctrl.state, VoiceState::Playing);
        assert!(ctrl.cursor_frames < 10.0);
    }

    #[test]
    fn render_applies_gain() {
        let bytes: Vec<u8> = std::iter::repeat(i16::MAX.to_le_bytes())
            .take(16)
            .flatten()
            .collect();
        let mut ctrl = ctrl_with(vec![queued(bytes, WaveFormat::Mono16, 48_000)]);
        ctrl.state = VoiceState::Playing;
        ctrl.gain = 0.5;
        let mut out = vec![0.0f32; 2 * 4];
        ctrl.render(&mut out, 2, 48_000);
        assert!((out[0] - 0.5 * (i16::MAX as f32 / 32_768.0)).abs() < 1e-3);
    }

    #[test]
    fn paused_voice_renders_silence_without_moving() {
        let mut ctrl = ctrl_with(vec![queued(vec![0xFFu8; 200], WaveFormat::Mono8, 48_000)]);
        ctrl.state = VoiceState::Paused;
        ctrl.cursor_frames = 25.0;
        let mut out = vec![0.0f32; 2 * 32];
        ctrl.render(&mut out, 2, 48_000);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ctrl.cursor_frames, 25.0);
    }

    #[test]
    fn pitch_doubles_cursor_step() {
        let mut ctrl = ctrl_with(vec![queued(vec![0u8; 4_000], WaveFormat::Mono16, 48_000)]);
        ctrl.state = VoiceState::Playing;
        ctrl.pitch = 2.0;
        let mut out = vec![0.0f32; 2 * 100];
        ctrl.render(&mut out, 2, 48_000);
        assert_eq!(ctrl.cursor_frames, 200.0);
    }

    #[test]
    fn cursor_spans_queued_buffers_in_order() {
        let first: Vec<u8> = std::iter::repeat(i16::MAX.to_le_bytes())
            .take(4)
            .flatten()
            .collect();
        let second: Vec<u8> = std::iter::repeat(i16::MIN.to_le_bytes())
            .take(4)
            .flatten()
            .collect();
        let ctrl = ctrl_with(vec![
            queued(first, WaveFormat::Mono16, 48_000),
            queued(second, WaveFormat::Mono16, 48_000),
        ]);
        let (l, _) = ctrl.sample_at(3);
        assert!(l > 0.9);
        let (l, _) = ctrl.sample_at(4);
        assert_eq!(l, -1.0);
    }

    #[test]
    fn buffer_slot_pool_rolls_back_on_exhaustion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = BufferSlot::acquire(&counter, 1);
        assert!(first.is_some());
        assert!(BufferSlot::acquire(&counter, 1).is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        drop(first);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn upload_rejects_misaligned_and_empty_payloads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut buffer = Buffer::new(BufferSlot::acquire(&counter, 4).unwrap());
        assert_eq!(
            buffer.upload(&[0u8; 3], WaveFormat::Stereo16, 44_100),
            Err(LoadError::BufferUploadFailed)
        );
        assert_eq!(
            buffer.upload(&[], WaveFormat::Mono8, 44_100),
            Err(LoadError::BufferUploadFailed)
        );
        assert_eq!(
            buffer.upload(&[0u8; 4], WaveFormat::Stereo16, 0),
            Err(LoadError::BufferUploadFailed)
        );
        assert!(buffer.upload(&[0u8; 4], WaveFormat::Stereo16, 44_100).is_ok());
    }
}
