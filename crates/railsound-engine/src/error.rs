//! Track load-failure taxonomy.
//!
//! Every variant marks a single track unusable; none of them is fatal to the
//! process. The display strings double as the retrievable last-error text, so
//! they keep the wire format existing tooling greps for.

use thiserror::Error;

/// A failure while loading a track or attaching it to the output layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The sound file does not exist.
    #[error("NO_SUCH_FILE: {0}")]
    FileNotFound(String),

    /// The sound file exists but could not be opened for reading.
    #[error("CANT_OPEN_FILE_FOR_READING: {0}")]
    OpenFailed(String),

    /// The first chunk id is not `RIFF`.
    #[error("NOT_RIFF_FILE")]
    NotRiffFile,

    /// The RIFF format tag is not `WAVE`.
    #[error("NOT_WAVE_FILE")]
    NotWaveFile,

    /// Bits/channels outside mono8, mono16, stereo8, stereo16.
    #[error("UNKNOWN_AUDIO_FORMAT")]
    UnknownAudioFormat,

    /// The output layer refused to allocate segment buffers.
    #[error("CANT_GENERATE_BUFFER")]
    BufferAllocFailed,

    /// The output layer refused to allocate a playback voice.
    #[error("CANT_GENERATE_SOURCE")]
    SourceAllocFailed,

    /// Segment bytes were rejected at upload (e.g. not frame aligned).
    #[error("CANT_MAKE_BUFFER_DATA")]
    BufferUploadFailed,

    /// Buffers could not be queued onto the voice.
    #[error("CANT_ADD_BUFFER_TO_SOURCE")]
    QueueFailed,

    /// A voice parameter was rejected; `param` names which one.
    #[error("CANT_APPLY_{param}")]
    ApplyParamFailed { param: &'static str },
}
