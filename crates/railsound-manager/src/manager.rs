//! Named sound registry.
//!
//! The device-simulation layer (brake pipe, air distributors, panels)
//! addresses sounds by name and treats the engine as a black box:
//! `play`/`stop`/`set_volume`/`set_pitch` plus the volume-curve helper.
//! Unknown and empty names are ignored; a broken pack entry is skipped at
//! load time and simply never plays.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use railsound_engine::{EngineHandle, SoundTrack};

use crate::config::{CurvePoint, SoundsConfig, curve_volume, sorted_curve};

/// Pitch floor below which a sound is stopped instead of slowed further.
const MIN_AUDIBLE_PITCH: f32 = 0.1;

struct ManagedSound {
    track: SoundTrack,
    max_volume: i32,
    volume_curve: Vec<CurvePoint>,
}

pub struct SoundManager {
    handle: EngineHandle,
    sounds: HashMap<String, ManagedSound>,
}

impl SoundManager {
    pub fn new(handle: EngineHandle) -> Self {
        SoundManager {
            handle,
            sounds: HashMap::new(),
        }
    }

    /// Load `<dir>/sounds.toml` and register every entry that loads
    /// cleanly. Returns the number of registered sounds.
    pub fn load_sounds(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let config_path = dir.join("sounds.toml");
        tracing::info!(path = %config_path.display(), "loading sound config");

        let mut loaded = 0;
        for entry in SoundsConfig::load(&config_path)?.entries() {
            let mut track = SoundTrack::load(&self.handle, dir.join(&entry.path));
            if !track.is_playable() {
                tracing::warn!(
                    name = %entry.name,
                    path = %entry.path,
                    error = %track.last_error(),
                    "sound skipped"
                );
                continue;
            }

            track.set_volume(entry.init_volume.unwrap_or(100));
            track.set_pitch(entry.init_pitch.unwrap_or(1.0));
            track.set_loop(entry.looped.unwrap_or(false));
            if entry.play_on_start.unwrap_or(false) {
                track.play();
            }

            self.sounds.insert(
                entry.name,
                ManagedSound {
                    track,
                    max_volume: entry.max_volume.unwrap_or(100),
                    volume_curve: sorted_curve(entry.volume_curve),
                },
            );
            loaded += 1;
        }

        tracing::info!(count = loaded, "sound pack loaded");
        Ok(loaded)
    }

    /// Register an already-loaded track under a name. Unplayable tracks are
    /// refused.
    pub fn attach(&mut self, name: impl Into<String>, track: SoundTrack, max_volume: i32) {
        if !track.is_playable() {
            return;
        }
        self.sounds.insert(
            name.into(),
            ManagedSound {
                track,
                max_volume,
                volume_curve: Vec::new(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sounds.contains_key(name)
    }

    pub fn play(&mut self, name: &str) {
        if let Some(sound) = self.lookup(name) {
            sound.track.play();
        }
    }

    pub fn stop(&mut self, name: &str) {
        if let Some(sound) = self.lookup(name) {
            sound.track.stop();
        }
    }

    /// Set the volume, clamped to the sound's configured maximum. A
    /// positive volume starts the sound if it is not already playing; zero
    /// or less stops it.
    pub fn set_volume(&mut self, name: &str, volume: i32) {
        let Some(sound) = self.lookup(name) else {
            return;
        };
        sound.track.set_volume(volume.min(sound.max_volume));
        if volume > 0 {
            if !sound.track.is_playing() {
                sound.track.play();
            }
        } else {
            sound.track.stop();
        }
    }

    /// Set the pitch. Below the audibility floor the sound is stopped;
    /// otherwise it starts if it was not playing.
    pub fn set_pitch(&mut self, name: &str, pitch: f32) {
        let Some(sound) = self.lookup(name) else {
            return;
        };
        sound.track.set_pitch(pitch);
        if pitch < MIN_AUDIBLE_PITCH {
            sound.track.stop();
        } else if !sound.track.is_playing() {
            sound.track.play();
        }
    }

    /// Map a physical parameter through the sound's volume curve and apply
    /// the resulting volume directly to the track.
    pub fn volume_curve_step(&mut self, name: &str, param: f32) {
        let Some(sound) = self.lookup(name) else {
            return;
        };
        let volume = curve_volume(&sound.volume_curve, param);
        sound.track.set_volume(volume);
    }

    fn lookup(&mut self, name: &str) -> Option<&mut ManagedSound> {
        if name.is_empty() {
            return None;
        }
        self.sounds.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CurvePoint;
    use railsound_engine::{AudioContext, NullSink};
    use std::sync::Arc;

    // Canonical mono-16 WAV image, enough for a playable track.
    fn test_wav(data_bytes: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_bytes as u32).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&22_050u32.to_le_bytes());
        buf.extend_from_slice(&44_100u32.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data_bytes as u32).to_le_bytes());
        buf.resize(buf.len() + data_bytes, 0);
        buf
    }

    fn manager_with(name: &str, max_volume: i32) -> (AudioContext, SoundManager) {
        let ctx = AudioContext::headless(Arc::new(NullSink));
        let mut manager = SoundManager::new(ctx.handle());
        let track = SoundTrack::from_bytes(&ctx.handle(), name, &test_wav(2000));
        manager.attach(name, track, max_volume);
        (ctx, manager)
    }

    #[test]
    fn unknown_and_empty_names_are_ignored() {
        let (_ctx, mut manager) = manager_with("horn", 100);
        manager.play("");
        manager.play("missing");
        manager.set_volume("missing", 50);
        manager.set_pitch("", 1.0);
        manager.stop("missing");
        assert!(!manager.contains("missing"));
    }

    #[test]
    fn set_volume_clamps_to_configured_maximum() {
        let (_ctx, mut manager) = manager_with("horn", 70);
        manager.set_volume("horn", 100);
        assert_eq!(manager.sounds["horn"].track.volume(), 70);
        manager.set_volume("horn", 40);
        assert_eq!(manager.sounds["horn"].track.volume(), 40);
    }

    #[test]
    fn positive_volume_starts_zero_volume_stops() {
        let (_ctx, mut manager) = manager_with("pump", 100);
        manager.set_volume("pump", 30);
        assert!(manager.sounds["pump"].track.is_playing());

        manager.set_volume("pump", 0);
        assert!(!manager.sounds["pump"].track.is_playing());

        manager.set_volume("pump", -5);
        assert!(!manager.sounds["pump"].track.is_playing());
        assert_eq!(manager.sounds["pump"].track.volume(), 0);
    }

    #[test]
    fn low_pitch_stops_the_sound() {
        let (_ctx, mut manager) = manager_with("motor", 100);
        manager.set_pitch("motor", 1.3);
        assert!(manager.sounds["motor"].track.is_playing());

        manager.set_pitch("motor", 0.05);
        assert!(!manager.sounds["motor"].track.is_playing());
    }

    #[test]
    fn volume_curve_step_maps_parameter_to_volume() {
        let (_ctx, mut manager) = manager_with("brake", 100);
        manager.sounds.get_mut("brake").unwrap().volume_curve = vec![
            CurvePoint {
                threshold: 0.0,
                volume: 0,
            },
            CurvePoint {
                threshold: 0.4,
                volume: 50,
            },
            CurvePoint {
                threshold: 0.9,
                volume: 100,
            },
        ];

        manager.volume_curve_step("brake", 0.6);
        assert_eq!(manager.sounds["brake"].track.volume(), 50);
        manager.volume_curve_step("brake", 1.5);
        assert_eq!(manager.sounds["brake"].track.volume(), 100);
        manager.volume_curve_step("brake", -0.1);
        assert_eq!(manager.sounds["brake"].track.volume(), 0);
    }

    #[test]
    fn attach_refuses_unplayable_tracks() {
        let ctx = AudioContext::headless(Arc::new(NullSink));
        let mut manager = SoundManager::new(ctx.handle());
        let broken = SoundTrack::from_bytes(&ctx.handle(), "broken", &[0u8; 8]);
        manager.attach("broken", broken, 100);
        assert!(!manager.contains("broken"));
    }

    #[test]
    fn load_sounds_reads_pack_from_disk() {
        let dir = std::env::temp_dir().join(format!("railsound-pack-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("horn.wav"), test_wav(2000)).unwrap();
        std::fs::write(
            dir.join("sounds.toml"),
            r#"
                [[sound]]
                name = "horn"
                path = "horn.wav"
                init_volume = 80
                play_on_start = true

                [[sound]]
                name = "ghost"
                path = "missing.wav"
            "#,
        )
        .unwrap();

        let ctx = AudioContext::headless(Arc::new(NullSink));
        let mut manager = SoundManager::new(ctx.handle());
        let loaded = manager.load_sounds(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(loaded, 1);
        assert!(manager.contains("horn"));
        assert!(!manager.contains("ghost"));
        assert_eq!(manager.sounds["horn"].track.volume(), 80);
        assert!(manager.sounds["horn"].track.is_playing());
    }
}
