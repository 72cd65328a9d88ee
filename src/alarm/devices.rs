//! Device capabilities used by the actuator
//!
//! Audio playback, vibration and screen wake lock are each reached through
//! a narrow trait. The concrete types here target a Linux desktop host:
//! a player process for audio, the terminal bell standing in for a
//! vibration motor, and `systemd-inhibit` for the wake lock.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors from the alarm's side effects. These are logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("audio playback failed: {0}")]
    Audio(String),

    #[error("vibration failed: {0}")]
    Vibration(String),

    #[error("wake lock failed: {0}")]
    WakeLock(String),
}

/// What the alarm plays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AudioSource {
    /// The configured built-in alarm sound
    #[default]
    Default,
    /// A user-supplied sound file
    File(PathBuf),
}

impl std::fmt::Display for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSource::Default => write!(f, "default"),
            AudioSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Audio playback capability
pub trait AudioOutput: Send {
    fn play(&mut self, source: &AudioSource, looping: bool) -> Result<(), ActuatorError>;
    fn pause(&mut self);
    fn reset_position(&mut self);
}

/// Vibration capability. Shared with the repeat timer task.
pub trait Vibrator: Send + Sync {
    /// Run one on/off pattern, starting with an "on" segment
    fn vibrate(&self, pattern: &[Duration]) -> Result<(), ActuatorError>;
    /// Stop any pattern in flight
    fn cancel(&self);
}

/// Screen wake lock capability
pub trait WakeLock: Send {
    fn acquire(&mut self) -> Result<Box<dyn HeldLock>, ActuatorError>;
}

/// An acquired wake lock
pub trait HeldLock: Send {
    fn release(self: Box<Self>);
}

/// Plays sound files by running an external player program
pub struct CommandPlayer {
    program: String,
    default_sound: PathBuf,
    playback: Option<CancellationToken>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, default_sound: PathBuf) -> Self {
        Self {
            program: program.into(),
            default_sound,
            playback: None,
        }
    }

    fn resolve(&self, source: &AudioSource) -> PathBuf {
        match source {
            AudioSource::Default => self.default_sound.clone(),
            AudioSource::File(path) => path.clone(),
        }
    }

    fn spawn_player(program: &str, path: &Path) -> std::io::Result<Child> {
        Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

impl AudioOutput for CommandPlayer {
    fn play(&mut self, source: &AudioSource, looping: bool) -> Result<(), ActuatorError> {
        let path = self.resolve(source);
        if !path.is_file() {
            return Err(ActuatorError::Audio(format!(
                "sound file not found: {}",
                path.display()
            )));
        }

        self.pause();

        let child = Self::spawn_player(&self.program, &path)
            .map_err(|e| ActuatorError::Audio(format!("{}: {e}", self.program)))?;

        let token = CancellationToken::new();
        tokio::spawn(run_playback(
            self.program.clone(),
            path.clone(),
            child,
            looping,
            token.clone(),
        ));
        self.playback = Some(token);

        info!(path = %path.display(), looping, "alarm audio playing");
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(token) = self.playback.take() {
            token.cancel();
            debug!("alarm audio paused");
        }
    }

    fn reset_position(&mut self) {
        // Every spawned player starts at the beginning of the file
    }
}

/// Keep the player running until cancelled, restarting it when looping
async fn run_playback(
    program: String,
    path: PathBuf,
    mut child: Child,
    looping: bool,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                if let Err(e) = child.kill().await {
                    debug!(?e, "player already exited");
                }
                return;
            }
            status = child.wait() => match status {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(%status, "player exited with failure, giving up");
                    return;
                }
                Err(e) => {
                    warn!(?e, "failed to wait for player");
                    return;
                }
            }
        }

        if !looping {
            return;
        }

        child = match CommandPlayer::spawn_player(&program, &path) {
            Ok(child) => child,
            Err(e) => {
                warn!(?e, %program, "failed to restart player");
                return;
            }
        };
    }
}

/// Rings the terminal bell in place of a vibration motor
#[derive(Debug, Default)]
pub struct TerminalBell;

impl Vibrator for TerminalBell {
    fn vibrate(&self, pattern: &[Duration]) -> Result<(), ActuatorError> {
        use std::io::Write;

        let pattern_ms: Vec<u64> = pattern.iter().map(|d| d.as_millis() as u64).collect();
        debug!(?pattern_ms, "vibrate");

        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| ActuatorError::Vibration(e.to_string()))
    }

    fn cancel(&self) {}
}

/// Screen wake lock held through a `systemd-inhibit` child process
pub struct InhibitLock {
    program: String,
}

impl InhibitLock {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for InhibitLock {
    fn default() -> Self {
        Self::new("systemd-inhibit")
    }
}

impl WakeLock for InhibitLock {
    fn acquire(&mut self) -> Result<Box<dyn HeldLock>, ActuatorError> {
        let child = Command::new(&self.program)
            .args([
                "--what=idle",
                "--who=geofence-alarm",
                "--why=Monitoring destination geofence",
                "--mode=block",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActuatorError::WakeLock(format!("{}: {e}", self.program)))?;

        info!(pid = ?child.id(), "wake lock acquired");
        Ok(Box::new(InhibitGuard { child }))
    }
}

/// Dropping the guard kills the inhibitor; the runtime reaps it
struct InhibitGuard {
    child: Child,
}

impl HeldLock for InhibitGuard {
    fn release(mut self: Box<Self>) {
        match self.child.start_kill() {
            Ok(()) => info!("wake lock released"),
            Err(e) => warn!(?e, "inhibitor already exited, wake lock was not held"),
        }
    }
}
