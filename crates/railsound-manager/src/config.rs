//! Sound pack configuration loading and parsing.
//!
//! A vehicle's sound directory carries a `sounds.toml` describing every
//! named sound: file path, initial and maximum volume, pitch, looping,
//! whether it starts with the simulation, and an optional volume curve
//! mapping a physical parameter (pipe pressure, engine rpm) to a volume.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level sound pack configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct SoundsConfig {
    /// Sound definitions, in file order.
    pub sound: Option<Vec<SoundEntry>>,
}

/// One named sound of the pack.
#[derive(Debug, Deserialize)]
pub struct SoundEntry {
    /// Registry name used by `play`/`stop`/`set_volume`/`set_pitch`.
    pub name: String,
    /// WAV path relative to the pack directory.
    pub path: String,
    /// Volume applied right after load (default 100).
    pub init_volume: Option<i32>,
    /// Upper clamp for `set_volume` on this sound (default 100).
    pub max_volume: Option<i32>,
    /// Pitch applied right after load (default 1.0).
    pub init_pitch: Option<f32>,
    /// Loop flag applied right after load.
    #[serde(rename = "loop")]
    pub looped: Option<bool>,
    /// Start playing as soon as the pack loads.
    pub play_on_start: Option<bool>,
    /// Volume curve points, sorted by threshold after load.
    pub volume_curve: Option<Vec<CurvePoint>>,
}

/// One point of a volume curve: at parameter values at or above
/// `threshold`, `volume` applies (the highest matching point wins).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub threshold: f32,
    pub volume: i32,
}

impl SoundsConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<SoundsConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn entries(self) -> Vec<SoundEntry> {
        self.sound.unwrap_or_default()
    }
}

/// Sort curve points ascending by threshold so lookup can walk them once.
pub fn sorted_curve(points: Option<Vec<CurvePoint>>) -> Vec<CurvePoint> {
    let mut points = points.unwrap_or_default();
    points.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    points
}

/// Highest curve point with `threshold <= param`, or 0 below the first
/// point.
pub fn curve_volume(points: &[CurvePoint], param: f32) -> i32 {
    let mut volume = 0;
    for point in points {
        if param >= point.threshold {
            volume = point.volume;
        } else {
            break;
        }
    }
    volume
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_entry() {
        let raw = r#"
            [[sound]]
            name = "compressor"
            path = "compressor.wav"
            init_volume = 60
            max_volume = 90
            init_pitch = 1.2
            loop = true
            play_on_start = true

            [[sound.volume_curve]]
            threshold = 0.0
            volume = 0

            [[sound.volume_curve]]
            threshold = 0.5
            volume = 70

            [[sound]]
            name = "horn"
            path = "horn.wav"
        "#;

        let cfg = toml::from_str::<SoundsConfig>(raw).unwrap();
        let entries = cfg.entries();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.name, "compressor");
        assert_eq!(first.init_volume, Some(60));
        assert_eq!(first.max_volume, Some(90));
        assert_eq!(first.init_pitch, Some(1.2));
        assert_eq!(first.looped, Some(true));
        assert_eq!(first.play_on_start, Some(true));
        assert_eq!(first.volume_curve.as_ref().unwrap().len(), 2);

        let second = &entries[1];
        assert!(second.init_volume.is_none());
        assert!(second.volume_curve.is_none());
    }

    #[test]
    fn empty_config_yields_no_entries() {
        let cfg = toml::from_str::<SoundsConfig>("").unwrap();
        assert!(cfg.entries().is_empty());
    }

    #[test]
    fn sorted_curve_orders_by_threshold() {
        let points = sorted_curve(Some(vec![
            CurvePoint {
                threshold: 0.8,
                volume: 100,
            },
            CurvePoint {
                threshold: 0.2,
                volume: 30,
            },
        ]));
        assert_eq!(points[0].threshold, 0.2);
        assert_eq!(points[1].threshold, 0.8);
    }

    #[test]
    fn curve_volume_picks_highest_matching_point() {
        let points = vec![
            CurvePoint {
                threshold: 0.0,
                volume: 0,
            },
            CurvePoint {
                threshold: 0.3,
                volume: 40,
            },
            CurvePoint {
                threshold: 0.7,
                volume: 90,
            },
        ];

        assert_eq!(curve_volume(&points, -1.0), 0);
        assert_eq!(curve_volume(&points, 0.0), 0);
        assert_eq!(curve_volume(&points, 0.5), 40);
        assert_eq!(curve_volume(&points, 0.7), 90);
        assert_eq!(curve_volume(&points, 2.0), 90);
    }

    #[test]
    fn curve_volume_is_zero_without_points() {
        assert_eq!(curve_volume(&[], 0.5), 0);
    }
}
