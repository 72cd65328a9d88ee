//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::geo::DistanceFormula;
use crate::position::WatchOptions;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for preferences and the default alarm sound
    pub data_dir: PathBuf,

    /// Default alarm sound, used unless the user picks a file
    pub alarm_sound: PathBuf,

    /// Program used to play sound files
    pub player: String,

    /// Hold a screen wake lock while monitoring
    pub keep_awake: bool,

    /// Fixes older than this are never used for arming decisions
    pub max_staleness: Duration,

    /// Per-fix timeout of the position subscription
    pub fix_timeout: Duration,

    pub distance_formula: DistanceFormula,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("GEOFENCE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("geofence-alarm")
            }
        };

        let alarm_sound = lookup("GEOFENCE_ALARM_SOUND")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("default-alarm.wav"));

        let player = lookup("GEOFENCE_PLAYER").unwrap_or_else(|| "paplay".to_string());

        let keep_awake = match lookup("GEOFENCE_KEEP_AWAKE") {
            Some(v) => parse_bool(&v).context("GEOFENCE_KEEP_AWAKE")?,
            None => false,
        };

        let defaults = WatchOptions::default();
        let max_staleness = millis(&lookup, "GEOFENCE_MAX_STALENESS_MS", defaults.max_staleness)?;
        let fix_timeout = millis(&lookup, "GEOFENCE_FIX_TIMEOUT_MS", defaults.timeout)?;

        let distance_formula = match lookup("GEOFENCE_DISTANCE") {
            Some(v) => v
                .parse::<DistanceFormula>()
                .map_err(|e| anyhow!("GEOFENCE_DISTANCE: {e}"))?,
            None => DistanceFormula::default(),
        };

        Ok(Self {
            data_dir,
            alarm_sound,
            player,
            keep_awake,
            max_staleness,
            fix_timeout,
            distance_formula,
        })
    }

    /// Path of the preference file
    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    /// Position subscription options derived from this configuration
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: true,
            max_staleness: self.max_staleness,
            timeout: self.fix_timeout,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        Some(v) => {
            let ms: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a number of milliseconds"))?;
            if ms == 0 {
                return Err(anyhow!("{key} must be greater than zero"));
            }
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[("HOME", "/home/alice")])).unwrap();
        assert_eq!(
            config.data_dir,
            PathBuf::from("/home/alice/.local/share/geofence-alarm")
        );
        assert!(config.alarm_sound.ends_with("default-alarm.wav"));
        assert!(config.prefs_path().ends_with("preferences.json"));
        assert_eq!(config.player, "paplay");
        assert!(!config.keep_awake);
        assert_eq!(config.watch_options(), WatchOptions::default());
        assert_eq!(config.distance_formula, DistanceFormula::Haversine);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("GEOFENCE_DATA_DIR", "/var/lib/geofence"),
            ("GEOFENCE_KEEP_AWAKE", "yes"),
            ("GEOFENCE_MAX_STALENESS_MS", "5000"),
            ("GEOFENCE_DISTANCE", "cosines"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/geofence"));
        assert!(config.keep_awake);
        assert_eq!(config.max_staleness, Duration::from_secs(5));
        assert_eq!(config.distance_formula, DistanceFormula::Cosines);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("HOME", "/root"),
            ("GEOFENCE_FIX_TIMEOUT_MS", "soon"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("HOME", "/root"),
            ("GEOFENCE_KEEP_AWAKE", "maybe"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("HOME", "/root"),
            ("GEOFENCE_FIX_TIMEOUT_MS", "0"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("HOME", "/root"),
            ("GEOFENCE_MAX_STALENESS_MS", "0"),
        ]))
        .is_err());
    }
}
