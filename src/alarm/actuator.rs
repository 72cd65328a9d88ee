//! Alarm actuator
//!
//! Owns the side effects of an arrival: looping audio, a repeating
//! vibration pattern and an optional wake lock. Every sub-effect is best
//! effort; a failure is logged and the others still run.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::devices::{AudioOutput, AudioSource, HeldLock, Vibrator, WakeLock};

/// The interface the geofence controller drives
pub trait Alarm: Send {
    /// Keep the screen awake while monitoring, if opted in
    fn keep_awake(&mut self);
    /// Sound the alarm
    fn start(&mut self, source: &AudioSource);
    /// Silence everything and release the wake lock. No-op when idle.
    fn stop(&mut self);
}

/// Vibration on/off durations and repeat interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VibrationPolicy {
    /// Fired once, immediately on start
    pub initial: Vec<Duration>,
    /// Fired every `interval` until stopped
    pub repeat: Vec<Duration>,
    pub interval: Duration,
}

impl Default for VibrationPolicy {
    fn default() -> Self {
        let ms = Duration::from_millis;
        Self {
            initial: vec![ms(1000), ms(500), ms(1000)],
            repeat: vec![ms(800), ms(400), ms(800)],
            interval: Duration::from_secs(4),
        }
    }
}

pub struct Actuator {
    audio: Box<dyn AudioOutput>,
    vibrator: Arc<dyn Vibrator>,
    wake_lock: Box<dyn WakeLock>,
    policy: VibrationPolicy,
    /// Whether the user opted in to the screen wake lock
    keep_awake: bool,
    held_lock: Option<Box<dyn HeldLock>>,
    /// The single repeat timer; replaced, never accumulated
    vibration_timer: Option<CancellationToken>,
    sounding: bool,
}

impl Actuator {
    pub fn new(
        audio: Box<dyn AudioOutput>,
        vibrator: Arc<dyn Vibrator>,
        wake_lock: Box<dyn WakeLock>,
        keep_awake: bool,
    ) -> Self {
        Self {
            audio,
            vibrator,
            wake_lock,
            policy: VibrationPolicy::default(),
            keep_awake,
            held_lock: None,
            vibration_timer: None,
            sounding: false,
        }
    }

    #[cfg(test)]
    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    #[cfg(test)]
    pub fn vibration_active(&self) -> bool {
        self.vibration_timer.is_some()
    }

    #[cfg(test)]
    pub fn holds_wake_lock(&self) -> bool {
        self.held_lock.is_some()
    }

    fn start_vibration(&mut self) {
        if let Some(previous) = self.vibration_timer.take() {
            previous.cancel();
            debug!("replacing vibration timer");
        }

        if let Err(e) = self.vibrator.vibrate(&self.policy.initial) {
            warn!(error = %e, "vibration unavailable");
            return;
        }

        let token = CancellationToken::new();
        let first_tick = tokio::time::Instant::now() + self.policy.interval;
        tokio::spawn(repeat_vibration(
            Arc::clone(&self.vibrator),
            self.policy.repeat.clone(),
            first_tick,
            self.policy.interval,
            token.clone(),
        ));
        self.vibration_timer = Some(token);
    }

    fn acquire_wake_lock(&mut self) {
        if !self.keep_awake || self.held_lock.is_some() {
            return;
        }

        match self.wake_lock.acquire() {
            Ok(lock) => self.held_lock = Some(lock),
            Err(e) => warn!(error = %e, "continuing without wake lock"),
        }
    }
}

impl Alarm for Actuator {
    fn keep_awake(&mut self) {
        self.acquire_wake_lock();
    }

    fn start(&mut self, source: &AudioSource) {
        info!(%source, "alarm starting");

        if let Err(e) = self.audio.play(source, true) {
            warn!(error = %e, "alarm audio failed");
        }
        self.start_vibration();
        self.acquire_wake_lock();

        self.sounding = true;
    }

    fn stop(&mut self) {
        self.audio.pause();
        self.audio.reset_position();

        if let Some(timer) = self.vibration_timer.take() {
            timer.cancel();
        }
        self.vibrator.cancel();

        if let Some(lock) = self.held_lock.take() {
            lock.release();
        }

        if self.sounding {
            info!("alarm stopped");
        }
        self.sounding = false;
    }
}

async fn repeat_vibration(
    vibrator: Arc<dyn Vibrator>,
    pattern: Vec<Duration>,
    first_tick: tokio::time::Instant,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = vibrator.vibrate(&pattern) {
                    warn!(error = %e, "repeat vibration failed");
                }
            }
        }
    }
}
