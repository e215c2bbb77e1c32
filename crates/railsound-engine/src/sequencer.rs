//! Scripted multi-phase playback.
//!
//! Composes one "begin" track, a list of looping "running" tracks, and one
//! "end" track into the start → looped run → stop script a simulated device
//! (compressor, ventilator, traction motor) follows. The begin → run
//! transition is timer-driven: when `begin()` fires, a one-shot timer armed
//! with the begin track's duration flips the sequencer into the running
//! phase and starts the first running track.
//!
//! The sequencer only uses the public [`SoundTrack`] contract; it knows
//! nothing about file formats or segments.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use crate::context::EngineHandle;
use crate::track::{DEF_PITCH, DEF_VOLUME, SoundTrack};

/// Sequencer phase, advanced by `begin`/`end`/`forced_stop` and the phase
/// timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Beginning,
    Running,
}

pub struct PlaybackSequencer {
    handle: EngineHandle,
    inner: Arc<Mutex<SequencerInner>>,
    timer_cancel: Option<Sender<()>>,
}

struct SequencerInner {
    prepared: bool,
    beginning: bool,
    running: bool,
    current: usize,
    pitch: f32,
    volume: i32,
    begin: Option<SoundTrack>,
    running_tracks: Vec<SoundTrack>,
    end: Option<SoundTrack>,
}

impl SequencerInner {
    fn recompute_prepared(&mut self) {
        self.prepared =
            self.begin.is_some() && self.end.is_some() && !self.running_tracks.is_empty();
    }
}

impl PlaybackSequencer {
    pub fn new(handle: EngineHandle) -> Self {
        PlaybackSequencer {
            handle,
            inner: Arc::new(Mutex::new(SequencerInner {
                prepared: false,
                beginning: false,
                running: false,
                current: 0,
                pitch: DEF_PITCH,
                volume: DEF_VOLUME,
                begin: None,
                running_tracks: Vec::new(),
                end: None,
            })),
            timer_cancel: None,
        }
    }

    /// Assign the begin sound. A track that fails to load is discarded and
    /// the previous assignment (if any) is kept.
    pub fn set_begin(&mut self, path: impl AsRef<Path>) {
        let track = SoundTrack::load(&self.handle, path);
        self.assign_begin(track);
    }

    /// Byte-loader variant of [`set_begin`](Self::set_begin).
    pub fn set_begin_bytes(&mut self, name: &str, bytes: &[u8]) {
        let track = SoundTrack::from_bytes(&self.handle, name, bytes);
        self.assign_begin(track);
    }

    fn assign_begin(&mut self, mut track: SoundTrack) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepared = false;
        if track.is_playable() {
            track.set_volume(inner.volume);
            inner.begin = Some(track);
        } else {
            tracing::warn!(track = track.name(), "begin sound discarded");
        }
        inner.recompute_prepared();
    }

    /// Append one running-phase sound; it loops for as long as it plays.
    pub fn append_running(&mut self, path: impl AsRef<Path>) {
        let track = SoundTrack::load(&self.handle, path);
        self.push_running(track);
    }

    /// Byte-loader variant of [`append_running`](Self::append_running).
    pub fn append_running_bytes(&mut self, name: &str, bytes: &[u8]) {
        let track = SoundTrack::from_bytes(&self.handle, name, bytes);
        self.push_running(track);
    }

    fn push_running(&mut self, mut track: SoundTrack) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepared = false;
        if track.is_playable() {
            track.set_loop(true);
            inner.running_tracks.push(track);
        } else {
            tracing::warn!(track = track.name(), "running sound discarded");
        }
        inner.recompute_prepared();
    }

    /// Replace the whole running-phase list.
    pub fn set_running_list<P: AsRef<Path>>(&mut self, paths: impl IntoIterator<Item = P>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.prepared = false;
            inner.running_tracks.clear();
            inner.current = 0;
        }
        for path in paths {
            self.append_running(path);
        }
    }

    /// Assign the end sound; same discard rule as [`set_begin`](Self::set_begin).
    pub fn set_end(&mut self, path: impl AsRef<Path>) {
        let track = SoundTrack::load(&self.handle, path);
        self.assign_end(track);
    }

    /// Byte-loader variant of [`set_end`](Self::set_end).
    pub fn set_end_bytes(&mut self, name: &str, bytes: &[u8]) {
        let track = SoundTrack::from_bytes(&self.handle, name, bytes);
        self.assign_end(track);
    }

    fn assign_end(&mut self, mut track: SoundTrack) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepared = false;
        if track.is_playable() {
            track.set_volume(inner.volume);
            inner.end = Some(track);
        } else {
            tracing::warn!(track = track.name(), "end sound discarded");
        }
        inner.recompute_prepared();
    }

    /// Start the script: play the begin sound and arm the phase timer with
    /// its duration. No-op unless prepared and currently idle.
    pub fn begin(&mut self) {
        let interval = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.prepared || inner.running || inner.beginning {
                return;
            }
            inner.beginning = true;
            let interval = inner.begin.as_ref().map(SoundTrack::duration_ms).unwrap_or(0);
            if let Some(track) = inner.begin.as_mut() {
                track.play();
            }
            interval
        };

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let shared = self.inner.clone();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) =
                cancel_rx.recv_timeout(Duration::from_millis(interval))
            {
                let mut inner = shared.lock().unwrap();
                // begin() may have been cancelled while we waited for the lock
                if !inner.beginning {
                    return;
                }
                inner.current = 0;
                let pitch = inner.pitch;
                let volume = inner.volume;
                if let Some(track) = inner.running_tracks.get_mut(0) {
                    track.set_pitch(pitch);
                    track.set_volume(volume);
                    track.play();
                }
                inner.beginning = false;
                inner.running = true;
            }
        });
        self.timer_cancel = Some(cancel_tx);
    }

    /// Switch to another running-phase sound. Out-of-range indices and the
    /// current index are ignored. Stop and play are issued back to back; no
    /// crossfade.
    pub fn switch_running(&mut self, index: usize) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            return;
        }
        if index >= inner.running_tracks.len() || index == inner.current {
            return;
        }

        let pitch = inner.pitch;
        let volume = inner.volume;
        let previous = inner.current;

        let next = &mut inner.running_tracks[index];
        next.set_pitch(pitch);
        next.set_volume(volume);
        next.play();

        inner.running_tracks[previous].stop();
        inner.current = index;
    }

    /// Finish the script: play the end sound, stop begin and the active
    /// running sound. Only meaningful while beginning or running.
    pub fn end(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running && !inner.beginning {
            return;
        }
        self.timer_cancel.take();

        if let Some(track) = inner.end.as_mut() {
            track.play();
        }
        if let Some(track) = inner.begin.as_mut() {
            track.stop();
        }
        let current = inner.current;
        if let Some(track) = inner.running_tracks.get_mut(current) {
            track.stop();
        }
        inner.beginning = false;
        inner.running = false;
    }

    /// Abort from any state without playing the end sound.
    pub fn forced_stop(&mut self) {
        self.timer_cancel.take();
        let mut inner = self.inner.lock().unwrap();
        if let Some(track) = inner.begin.as_mut() {
            track.stop();
        }
        for track in &mut inner.running_tracks {
            track.stop();
        }
        inner.beginning = false;
        inner.running = false;
    }

    /// Store the pitch; while running it applies to the active running
    /// track immediately.
    pub fn set_pitch(&mut self, pitch: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.pitch = pitch;
        if inner.running {
            let current = inner.current;
            if let Some(track) = inner.running_tracks.get_mut(current) {
                track.set_pitch(pitch);
            }
        }
    }

    /// Store the volume; while running it applies to the active running
    /// track immediately. Begin/end tracks pick it up on (re)assignment.
    pub fn set_volume(&mut self, volume: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = volume;
        if inner.running {
            let current = inner.current;
            if let Some(track) = inner.running_tracks.get_mut(current) {
                track.set_volume(volume);
            }
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.inner.lock().unwrap().prepared
    }

    pub fn current_index(&self) -> usize {
        self.inner.lock().unwrap().current
    }

    pub fn phase(&self) -> Phase {
        let inner = self.inner.lock().unwrap();
        if inner.running {
            Phase::Running
        } else if inner.beginning {
            Phase::Beginning
        } else {
            Phase::Idle
        }
    }
}

impl Drop for PlaybackSequencer {
    fn drop(&mut self) {
        self.timer_cancel.take();
    }
}
