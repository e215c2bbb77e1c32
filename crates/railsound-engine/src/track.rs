//! A loaded, playable sound track.
//!
//! Construction is fail-soft: a track that cannot be loaded still exists, it
//! just reports `is_playable() == false` and carries a retrievable last
//! error. That keeps device simulations running when a single sound pack
//! entry is broken.
//!
//! Labeled tracks (a `loop`/`stop` marker pair in the file) get the
//! three-segment treatment: the whole queue loops natively, and a 15 ms
//! cursor watcher snaps the cursor back to the loop segment every time it
//! crosses into the stop region, so the start segment plays exactly once
//! and the stop segment only plays after [`SoundTrack::stop`].

use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use crate::context::EngineHandle;
use crate::error::LoadError;
use crate::voice::{Voice, VoiceState};
use crate::wave::{self, ParsedWave, SEGMENT_SLOTS};

/// Cursor-watch period for labeled tracks. Segments are assumed to be at
/// least tens of milliseconds long; see the crate docs for the soft
/// real-time caveat.
const WATCH_PERIOD: Duration = Duration::from_millis(15);

pub const MIN_VOLUME: i32 = 0;
pub const MAX_VOLUME: i32 = 100;
pub const DEF_VOLUME: i32 = 100;
pub const DEF_PITCH: f32 = 1.0;
/// Default source position, one unit in front of the listener.
pub const DEF_POSITION: [f32; 3] = [0.0, 0.0, 1.0];
pub const DEF_VELOCITY: [f32; 3] = [0.0, 0.0, 0.0];

pub struct SoundTrack {
    name: String,
    handle: EngineHandle,
    playable: bool,
    labeled: bool,
    last_error: String,
    voice: Option<Voice>,
    segment_lens: [u64; SEGMENT_SLOTS],
    byte_rate: u32,
    data_len: u32,
    volume: i32,
    pitch: f32,
    looping: bool,
    position: [f32; 3],
    velocity: [f32; 3],
    watcher: Option<Sender<()>>,
}

impl SoundTrack {
    /// Load a track from disk. Never fails hard; check [`is_playable`]
    /// (or [`last_error`]) afterwards.
    ///
    /// [`is_playable`]: SoundTrack::is_playable
    /// [`last_error`]: SoundTrack::last_error
    pub fn load(handle: &EngineHandle, path: impl AsRef<Path>) -> SoundTrack {
        let path = path.as_ref();
        let mut track = SoundTrack::empty(handle, path.display().to_string());
        handle.sink().notify(&format!("Load sound: {}", track.name));
        match read_file(path) {
            Ok(bytes) => track.init_from_bytes(&bytes),
            Err(err) => track.fail(err),
        }
        track
    }

    /// Load a track from bytes supplied by an external resource loader.
    pub fn from_bytes(handle: &EngineHandle, name: impl Into<String>, bytes: &[u8]) -> SoundTrack {
        let mut track = SoundTrack::empty(handle, name.into());
        handle.sink().notify(&format!("Load sound: {}", track.name));
        track.init_from_bytes(bytes);
        track
    }

    fn empty(handle: &EngineHandle, name: String) -> SoundTrack {
        SoundTrack {
            name,
            handle: handle.clone(),
            playable: false,
            labeled: false,
            last_error: String::new(),
            voice: None,
            segment_lens: [0; SEGMENT_SLOTS],
            byte_rate: 0,
            data_len: 0,
            volume: DEF_VOLUME,
            pitch: DEF_PITCH,
            looping: false,
            position: DEF_POSITION,
            velocity: DEF_VELOCITY,
            watcher: None,
        }
    }

    fn init_from_bytes(&mut self, bytes: &[u8]) {
        let parsed = match wave::parse(bytes) {
            Ok(parsed) => parsed,
            Err(err) => return self.fail(err),
        };

        self.notify_loaded(&parsed);
        self.labeled = parsed.labeled;
        self.byte_rate = parsed.fmt.byte_rate;
        self.data_len = parsed.data_len;
        for slot in 0..SEGMENT_SLOTS {
            self.segment_lens[slot] = parsed.segments.len(slot) as u64;
        }

        match self.attach(&parsed) {
            Ok(()) => self.playable = true,
            Err(err) => self.fail(err),
        }
    }

    /// Allocate, upload, and queue the hardware-facing resources, then push
    /// the current parameters onto the voice. The first failure wins.
    fn attach(&mut self, parsed: &ParsedWave) -> Result<(), LoadError> {
        let mut buffers = self
            .handle
            .create_buffers(parsed.segments.non_empty_count())?;
        let voice = self.handle.create_voice()?;

        for (buffer, segment) in buffers.iter_mut().zip(parsed.segments.non_empty()) {
            buffer.upload(segment, parsed.format, parsed.fmt.sample_rate)?;
        }
        voice.queue(buffers)?;

        voice.set_gain(0.01 * self.volume as f32)?;
        voice.set_pitch(self.pitch)?;
        voice.set_looping(self.looping)?;
        voice.set_position(self.position)?;
        voice.set_velocity(self.velocity)?;

        self.voice = Some(voice);
        Ok(())
    }

    fn notify_loaded(&self, parsed: &ParsedWave) {
        let sink = self.handle.sink();
        sink.notify(&format!("File size: {}", parsed.file_len));
        sink.notify(&format!("File data size: {}", parsed.data_len));
        sink.notify(&format!("Byterate: {}", parsed.fmt.byte_rate));
        sink.notify(&format!("Sample rate: {}", parsed.fmt.sample_rate));
        sink.notify(&format!("Num channels: {}", parsed.fmt.channels));
        sink.notify(&format!("Bits per sample: {}", parsed.fmt.bits_per_sample));
        sink.notify(&format!("Bytes per sample: {}", parsed.fmt.block_align));
        sink.notify(&format!(
            "Buffer blocks: {}",
            parsed.segments.non_empty_count()
        ));
        for slot in 0..SEGMENT_SLOTS {
            sink.notify(&format!("Block #{slot} size: {}", parsed.segments.len(slot)));
        }
    }

    fn fail(&mut self, err: LoadError) {
        self.playable = false;
        self.last_error = err.to_string();
        self.handle.sink().error(&self.last_error);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_playable(&self) -> bool {
        self.playable
    }

    /// Whether the file carried usable loop/stop markers.
    pub fn is_labeled(&self) -> bool {
        self.labeled
    }

    /// Byte length of one segment slot of the payload.
    pub fn segment_len(&self, slot: usize) -> u64 {
        self.segment_lens[slot]
    }

    /// Return and clear the last error string.
    pub fn last_error(&mut self) -> String {
        std::mem::take(&mut self.last_error)
    }

    /// Track duration in milliseconds, truncated to two decimal digits of
    /// seconds precision. Used by the sequencer to time the begin→run
    /// transition.
    pub fn duration_ms(&self) -> u64 {
        if !self.playable || self.byte_rate == 0 {
            return 0;
        }
        10 * (100 * u64::from(self.data_len) / u64::from(self.byte_rate))
    }

    pub fn set_volume(&mut self, volume: i32) {
        if !self.playable {
            return;
        }
        self.volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        if let Some(voice) = &self.voice {
            let _ = voice.set_gain(0.01 * self.volume as f32);
        }
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        if !self.playable {
            return;
        }
        self.pitch = pitch.max(0.0);
        if let Some(voice) = &self.voice {
            let _ = voice.set_pitch(self.pitch);
        }
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_loop(&mut self, looping: bool) {
        if !self.playable {
            return;
        }
        self.looping = looping;
        if let Some(voice) = &self.voice {
            let _ = voice.set_looping(looping);
        }
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        if !self.playable {
            return;
        }
        self.position = [x, y, z];
        if let Some(voice) = &self.voice {
            let _ = voice.set_position(self.position);
        }
    }

    pub fn position(&self) -> (f32, f32, f32) {
        (self.position[0], self.position[1], self.position[2])
    }

    pub fn set_velocity(&mut self, x: f32, y: f32, z: f32) {
        if !self.playable {
            return;
        }
        self.velocity = [x, y, z];
        if let Some(voice) = &self.voice {
            let _ = voice.set_velocity(self.velocity);
        }
    }

    pub fn velocity(&self) -> (f32, f32, f32) {
        (self.velocity[0], self.velocity[1], self.velocity[2])
    }

    /// Start (or resume) playback. On a labeled track the cursor watcher
    /// starts before the play command so the first loop pass is already
    /// covered.
    pub fn play(&mut self) {
        if self.is_playing() {
            if let Some(voice) = &self.voice {
                voice.play();
            }
            return;
        }
        if !self.playable {
            return;
        }
        if self.labeled {
            self.start_watcher();
        }
        if let Some(voice) = &self.voice {
            voice.play();
        }
    }

    /// Suspend the voice in place.
    pub fn pause(&mut self) {
        if !self.playable {
            return;
        }
        if let Some(voice) = &self.voice {
            voice.pause();
        }
    }

    /// Stop playback. A labeled track lets its stop segment play out once:
    /// looping is disabled and the cursor jumps to the start+loop boundary.
    /// An unlabeled track stops dead.
    pub fn stop(&mut self) {
        if !self.playable {
            return;
        }
        if self.labeled {
            self.set_loop(false);
            if let Some(voice) = &self.voice {
                voice.set_byte_offset(self.segment_lens[0] + self.segment_lens[1]);
            }
            self.stop_watcher();
        } else if let Some(voice) = &self.voice {
            voice.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.voice_state() == Some(VoiceState::Playing)
    }

    pub fn is_paused(&self) -> bool {
        self.voice_state() == Some(VoiceState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self.voice_state(),
            None | Some(VoiceState::Stopped) | Some(VoiceState::Initial)
        )
    }

    fn voice_state(&self) -> Option<VoiceState> {
        self.voice.as_ref().map(Voice::state)
    }

    /// Current playback cursor in source bytes. Diagnostic; 0 when the
    /// track never became playable.
    pub fn byte_offset(&self) -> u64 {
        self.voice.as_ref().map(Voice::byte_offset).unwrap_or(0)
    }

    /// Spawn the 15 ms cursor watcher. Every tick, a cursor at or past the
    /// start+loop boundary is snapped back to the start boundary, turning
    /// the voice's whole-queue looping into "skip start on repeat".
    fn start_watcher(&mut self) {
        self.stop_watcher();
        let Some(voice) = &self.voice else {
            return;
        };

        let shared = voice.shared.clone();
        let snap_at = self.segment_lens[0] + self.segment_lens[1];
        let snap_to = self.segment_lens[0];
        let (cancel_tx, cancel_rx) = bounded::<()>(1);

        thread::spawn(move || {
            loop {
                match cancel_rx.recv_timeout(WATCH_PERIOD) {
                    Err(RecvTimeoutError::Timeout) => {
                        if shared.byte_offset() >= snap_at {
                            shared.set_byte_offset(snap_to);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        self.watcher = Some(cancel_tx);
    }

    /// Idempotent; dropping the sender disconnects the timer thread.
    fn stop_watcher(&mut self) {
        self.watcher.take();
    }
}

impl Drop for SoundTrack {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.display().to_string()));
    }
    std::fs::read(path).map_err(|_| LoadError::OpenFailed(path.display().to_string()))
}
