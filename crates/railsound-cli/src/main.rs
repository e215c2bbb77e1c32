//! Railsound demo driver.
//!
//! An external caller for the engine, in the shape the simulator uses it:
//! open the context, load tracks (single file, pack directory, or a
//! begin/run/end script), drive them, tear down on Ctrl-C.

mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use railsound_engine::{AudioContext, PlaybackSequencer, SoundTrack, events};
use railsound_manager::SoundManager;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    let _ = ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::Relaxed);
    });

    let ctx = AudioContext::open(events::tracing_sink())?;

    match &args.cmd {
        cli::Command::Play {
            path,
            looped,
            seconds,
        } => {
            let mut track = SoundTrack::load(&ctx.handle(), path);
            let err = track.last_error();
            if !err.is_empty() {
                anyhow::bail!("{err}");
            }
            track.set_volume(args.volume);
            track.set_pitch(args.pitch);
            track.set_loop(*looped);
            track.play();

            wait(&interrupted, *seconds, || track.is_stopped());
            track.stop();
            // labeled tracks play their stop segment out
            wait(&interrupted, 0, || track.is_stopped());
        }
        cli::Command::Pack { dir, name, seconds } => {
            let mut manager = SoundManager::new(ctx.handle());
            let loaded = manager.load_sounds(dir)?;
            tracing::info!(count = loaded, "pack ready");
            if let Some(name) = name {
                manager.set_volume(name, args.volume);
                manager.set_pitch(name, args.pitch);
                manager.play(name);
            }
            wait(&interrupted, *seconds, || false);
        }
        cli::Command::Script {
            begin,
            running,
            end,
            run_seconds,
        } => {
            let mut seq = PlaybackSequencer::new(ctx.handle());
            seq.set_begin(begin);
            seq.set_running_list(running);
            seq.set_end(end);
            if !seq.is_prepared() {
                anyhow::bail!("script sounds failed to load");
            }
            seq.set_volume(args.volume);
            seq.set_pitch(args.pitch);

            seq.begin();
            wait(&interrupted, *run_seconds, || false);

            if interrupted.load(Ordering::Relaxed) {
                seq.forced_stop();
            } else {
                seq.end();
                // let the end sound ring out
                wait(&interrupted, 2, || false);
            }
        }
    }

    ctx.shutdown();
    Ok(())
}

/// Sleep until Ctrl-C, `seconds` elapse (0 = forever), or `done` reports
/// completion.
fn wait(interrupted: &Arc<AtomicBool>, seconds: u64, mut done: impl FnMut() -> bool) {
    let started = std::time::Instant::now();
    loop {
        if interrupted.load(Ordering::Relaxed) || done() {
            return;
        }
        if seconds > 0 && started.elapsed() >= Duration::from_secs(seconds) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
