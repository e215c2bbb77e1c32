use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "railsound", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Master volume 0..100 applied to what gets played
    #[arg(long, default_value_t = 100)]
    pub volume: i32,

    /// Playback rate multiplier
    #[arg(long, default_value_t = 1.0)]
    pub pitch: f32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a single WAV file (labeled files loop until Ctrl-C)
    Play {
        /// Path to the WAV file
        path: PathBuf,

        /// Loop the sound
        #[arg(long)]
        looped: bool,

        /// Seconds to play before stopping (0 = until Ctrl-C)
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },

    /// Load a sound pack directory (sounds.toml) and play one entry
    Pack {
        /// Directory containing sounds.toml
        dir: PathBuf,

        /// Entry to play (play-on-start entries run regardless)
        #[arg(long)]
        name: Option<String>,

        /// Seconds to keep the pack running
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Run a begin → run → end phase script from three WAV files
    Script {
        /// Begin (spin-up) sound
        #[arg(long)]
        begin: PathBuf,

        /// Running-phase sounds, in switch order
        #[arg(long, required = true)]
        running: Vec<PathBuf>,

        /// End (spin-down) sound
        #[arg(long)]
        end: PathBuf,

        /// Seconds to stay in the running phase
        #[arg(long, default_value_t = 5)]
        run_seconds: u64,
    },
}
