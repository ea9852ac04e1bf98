//! Alert sounds for new notifications.
//!
//! Browsers refuse to play audio until the user has interacted with the
//! page, so playback sits behind a one-way latch: the first gesture plays a
//! near-silent clip and, if that works, unlocks alerts for the rest of the
//! view's life.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioGate {
    Locked,
    Unlocked,
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no dashboard is listening for sounds")]
    NoListener,
}

/// Fire-and-forget playback of a sound URL.
pub trait AudioPlayer: Send + Sync + 'static {
    fn play(&self, url: &str) -> Result<(), AudioError>;
}

pub struct AudioAlerts {
    gate: Mutex<AudioGate>,
    player: Arc<dyn AudioPlayer>,
    alert_url: String,
    unlock_url: String,
}

impl AudioAlerts {
    pub fn new(player: Arc<dyn AudioPlayer>, alert_url: String, unlock_url: String) -> Self {
        Self {
            gate: Mutex::new(AudioGate::Locked),
            player,
            alert_url,
            unlock_url,
        }
    }

    pub fn gate(&self) -> AudioGate {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle a user gesture. Once unlocked, further gestures are ignored.
    pub fn on_gesture(&self) -> AudioGate {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if *gate == AudioGate::Unlocked {
            return AudioGate::Unlocked;
        }

        match self.player.play(&self.unlock_url) {
            Ok(()) => {
                *gate = AudioGate::Unlocked;
                tracing::info!("Audio alerts unlocked");
            }
            Err(e) => tracing::debug!("Audio unlock attempt failed: {}", e),
        }
        *gate
    }

    /// Request one alert sound. Suppressed (not queued) while locked; playback
    /// errors are swallowed. Returns whether playback was handed off.
    pub fn request_alert(&self) -> bool {
        if self.gate() == AudioGate::Locked {
            tracing::debug!("Audio alert suppressed: playback not unlocked yet");
            return false;
        }

        match self.player.play(&self.alert_url) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("Audio alert dropped: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SoundEvent {
    pub url: String,
    pub requested_at: DateTime<Utc>,
}

/// Player that forwards sounds to the dashboards connected to a view's
/// sound stream. Playing fails when no dashboard is connected.
pub struct SoundChannel {
    tx: broadcast::Sender<SoundEvent>,
}

impl SoundChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SoundEvent> {
        self.tx.subscribe()
    }
}

impl AudioPlayer for SoundChannel {
    fn play(&self, url: &str) -> Result<(), AudioError> {
        self.tx
            .send(SoundEvent {
                url: url.to_string(),
                requested_at: Utc::now(),
            })
            .map(|_| ())
            .map_err(|_| AudioError::NoListener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::RecordingPlayer;

    fn alerts(player: Arc<RecordingPlayer>) -> AudioAlerts {
        AudioAlerts::new(player, "alert.mp3".into(), "silence.mp3".into())
    }

    #[test]
    fn locked_suppresses_without_queueing() {
        let player = Arc::new(RecordingPlayer::default());
        let audio = alerts(player.clone());

        assert!(!audio.request_alert());
        assert!(!audio.request_alert());
        assert_eq!(audio.on_gesture(), AudioGate::Unlocked);

        // Only the unlock clip; nothing was replayed after unlocking.
        assert_eq!(player.played(), vec!["silence.mp3"]);
        assert!(audio.request_alert());
        assert_eq!(player.played(), vec!["silence.mp3", "alert.mp3"]);
    }

    #[test]
    fn unlock_happens_once() {
        let player = Arc::new(RecordingPlayer::default());
        let audio = alerts(player.clone());
        audio.on_gesture();
        audio.on_gesture();
        audio.on_gesture();
        assert_eq!(player.played(), vec!["silence.mp3"]);
    }

    #[test]
    fn failed_unlock_stays_locked_and_failed_alerts_are_swallowed() {
        let player = Arc::new(RecordingPlayer::default());
        player.set_failing(true);
        let audio = alerts(player.clone());

        assert_eq!(audio.on_gesture(), AudioGate::Locked);

        player.set_failing(false);
        assert_eq!(audio.on_gesture(), AudioGate::Unlocked);

        player.set_failing(true);
        assert!(!audio.request_alert());
        assert_eq!(audio.gate(), AudioGate::Unlocked);
    }

    #[tokio::test]
    async fn sound_channel_requires_a_listener() {
        let channel = SoundChannel::new(4);
        assert!(matches!(channel.play("x.mp3"), Err(AudioError::NoListener)));

        let mut rx = channel.subscribe();
        channel.play("x.mp3").unwrap();
        assert_eq!(rx.recv().await.unwrap().url, "x.mp3");
    }
}
