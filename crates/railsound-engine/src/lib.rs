//! Railsound engine: the playback core of the train-simulation platform.
//!
//! Turns linear-PCM WAV files into seekable, loop-aware sound tracks backed
//! by a shared output device, and sequences them into scripted start →
//! looped run → stop playback.
//!
//! ## Pieces
//! - [`context::AudioContext`]: the one device/stream owner per process;
//!   hands out the [`context::EngineHandle`] every constructor takes.
//! - [`wave`]: the chunk walk that parses the fleet's (frequently
//!   nonstandard) WAV layouts and splits the payload at `loop`/`stop`
//!   markers.
//! - [`track::SoundTrack`]: one loaded sound (buffers, voice, per-track
//!   controls) and the 15 ms cursor watcher that makes a labeled track loop
//!   only its middle segment.
//! - [`sequencer::PlaybackSequencer`]: the timer-driven begin/run/end
//!   script.
//!
//! ## Timing caveat
//! The cursor watcher corrects the voice cursor every 15 ms. Segments
//! shorter than a few watcher periods can slip past the correction; sound
//! packs keep segments at tens of milliseconds or longer. Soft real-time,
//! not a hard guarantee.

pub mod context;
pub mod error;
pub mod events;
mod mixer;
pub mod sequencer;
pub mod track;
mod voice;
pub mod wave;

pub use context::{AudioContext, EngineHandle, Listener};
pub use error::LoadError;
pub use events::{EventSink, NullSink, TracingSink};
pub use sequencer::{Phase, PlaybackSequencer};
pub use track::SoundTrack;
pub use wave::{ParsedWave, SegmentSet, WaveFormat};
