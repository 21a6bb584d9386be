//! Self-healing when the radio stops framing and only prints console text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use meshlink_frame::wakeup_burst;
use meshlink_transport::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::Outbound;
use crate::error::{Result, SessionError};
use crate::handshake::config_nonce;
use crate::session::{lock, pause, Shared};

/// Decides when a byte stream has lost protocol sync. At most one recovery
/// runs at a time.
#[derive(Debug)]
pub(crate) struct RecoveryMonitor {
    silence: Duration,
    in_flight: AtomicBool,
}

impl RecoveryMonitor {
    pub(crate) fn new(silence: Duration) -> Self {
        Self {
            silence,
            in_flight: AtomicBool::new(false),
        }
    }

    /// `last_frame_at` is `None` until the first frame of the connection;
    /// `text_runs` counts console text runs since the last frame.
    pub(crate) fn should_trigger(
        &self,
        last_frame_at: Option<Instant>,
        text_runs: u32,
        initializing: bool,
        now: Instant,
    ) -> bool {
        let Some(last) = last_frame_at else {
            return false;
        };
        !initializing
            && text_runs > 0
            && !self.in_flight.load(Ordering::Acquire)
            && now.saturating_duration_since(last) > self.silence
    }

    /// Claim the single recovery slot.
    pub(crate) fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl<T: Transport> Shared<T> {
    /// Wake the radio and re-request its configuration, then report whether
    /// frames came back. Never fails outward.
    pub(crate) async fn recover(&self, cancel: &CancellationToken) {
        match self.recovery_attempt(cancel).await {
            Ok(()) => {
                let runs = lock(&self.assembler).text_runs();
                if runs == 0 {
                    info!("recovery succeeded, frames are flowing again");
                } else {
                    warn!(text_runs = runs, "still receiving only text after recovery");
                }
            }
            Err(SessionError::Cancelled) => {}
            Err(err) => warn!(error = %err, "recovery attempt failed"),
        }
        self.recovery.finish();
    }

    async fn recovery_attempt(&self, cancel: &CancellationToken) -> Result<()> {
        let config = &self.config;
        self.write_raw(cancel, &wakeup_burst(config.recovery_wakeup_len))
            .await?;
        pause(cancel, config.recovery_wakeup_wait).await?;

        let nonce = config_nonce();
        info!(nonce, "re-requesting configuration to restore framing");
        self.send(cancel, &Outbound::WantConfig { nonce }).await?;
        pause(cancel, config.recovery_settle).await
    }
}
