//! Initialization sequence run after the link comes up.

use std::time::Duration;

use meshlink_frame::wakeup_burst;
use meshlink_transport::Transport;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::Outbound;
use crate::error::{Anomaly, Result, SessionError};
use crate::event::{SessionEvent, SessionState};
use crate::radio::MAX_CHANNELS;
use crate::reconcile::ReconcileOutcome;
use crate::session::{pause, Shared};

/// What one initialization run achieved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitReport {
    /// The radio signalled the end of its configuration dump in time.
    pub config_complete: bool,
    /// The node count settled before the backlog ceiling.
    pub backlog_drained: bool,
    pub nodes: usize,
    /// Channel slots reported during the bulk phase.
    pub channels: usize,
    pub elapsed: Duration,
    /// `None` when reconciliation was not needed or not possible.
    pub reconcile: Option<ReconcileOutcome>,
    #[serde(skip)]
    pub anomalies: Vec<Anomaly>,
}

/// Fresh non-zero id for a configuration request.
pub(crate) fn config_nonce() -> u32 {
    rand::random::<u32>().max(1)
}

impl<T: Transport> Shared<T> {
    /// Steps 2–9 of initialization. Step 1 (clearing) happens in `connect`.
    pub(crate) async fn initialize(&self, cancel: &CancellationToken) -> Result<InitReport> {
        let started = Instant::now();
        let config = &self.config;
        let mut anomalies = Vec::new();

        pause(cancel, config.settle_delay).await?;

        if self.transport.needs_framing() {
            debug!(len = config.wakeup_len, "sending wakeup burst");
            self.write_raw(cancel, &wakeup_burst(config.wakeup_len))
                .await?;
            pause(cancel, config.wakeup_wait).await?;
        }

        let nonce = config_nonce();
        info!(nonce, "requesting configuration");
        self.send(cancel, &Outbound::WantConfig { nonce }).await?;

        let config_complete = self.wait_config_complete(cancel).await?;
        if !config_complete {
            let anomaly = Anomaly::HandshakeTimeout {
                phase: "configuration dump",
                waited: config.config_complete_timeout,
            };
            warn!(%anomaly, "continuing with partial configuration");
            anomalies.push(anomaly);
        }

        let backlog_drained = self.wait_backlog(cancel).await?;
        if !backlog_drained {
            let anomaly = Anomaly::HandshakeTimeout {
                phase: "node backlog",
                waited: config.backlog_timeout,
            };
            info!(%anomaly, "treating node backlog as drained");
            anomalies.push(anomaly);
        }

        let (nodes, channels, own_num) = {
            let mut data = self.data();
            data.initializing = false;
            (data.nodes.len(), data.channels.len(), data.own_num)
        };
        info!(nodes, channels, "configuration collected");
        if channels == 0 {
            warn!("no channels received during configuration dump");
        }

        self.replay(cancel).await?;
        if !self.transition(cancel, SessionState::Ready) {
            return Err(SessionError::Cancelled);
        }

        let reconcile = match own_num {
            Some(node) if channels < MAX_CHANNELS as usize => {
                match self.reconcile(cancel, node).await {
                    Ok(outcome) => {
                        if !outcome.missing.is_empty() {
                            anomalies.push(Anomaly::ChannelIncomplete {
                                missing: outcome.missing.clone(),
                            });
                        }
                        Some(outcome)
                    }
                    Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                    Err(err) => {
                        warn!(error = %err, "channel reconciliation aborted");
                        None
                    }
                }
            }
            Some(_) => {
                info!("all channel slots received during configuration dump");
                None
            }
            None => {
                warn!("own node number unknown, skipping channel reconciliation");
                None
            }
        };

        Ok(InitReport {
            config_complete,
            backlog_drained,
            nodes,
            channels,
            elapsed: started.elapsed(),
            reconcile,
            anomalies,
        })
    }

    /// Poll for the config-complete marker until the ceiling.
    async fn wait_config_complete(&self, cancel: &CancellationToken) -> Result<bool> {
        let started = Instant::now();
        loop {
            let complete = self.data().config_complete;
            if complete {
                debug!(after = ?started.elapsed(), "configuration complete");
                return Ok(true);
            }
            if started.elapsed() >= self.config.config_complete_timeout {
                return Ok(false);
            }
            pause(cancel, self.config.config_poll_interval).await?;
        }
    }

    /// Wait until the node count stops changing.
    ///
    /// Stability only counts once at least one node is known, so a radio that
    /// has not started streaming yet gets the full ceiling.
    async fn wait_backlog(&self, cancel: &CancellationToken) -> Result<bool> {
        let started = Instant::now();
        let mut last = 0;
        let mut stable = 0;
        loop {
            pause(cancel, self.config.backlog_poll_interval).await?;
            let count = self.data().nodes.len();
            if count > 0 && count == last {
                stable += 1;
                if stable >= self.config.backlog_stable_polls {
                    debug!(nodes = count, after = ?started.elapsed(), "node backlog settled");
                    return Ok(true);
                }
            } else {
                stable = 0;
                last = count;
            }
            if started.elapsed() >= self.config.backlog_timeout {
                return Ok(false);
            }
        }
    }

    /// Hand the collected snapshot to the sink: nodes, own identity,
    /// enabled channels, radio config.
    async fn replay(&self, cancel: &CancellationToken) -> Result<()> {
        let (nodes, identity, channels, lora) = {
            let data = self.data();
            (
                data.nodes.values().cloned().collect::<Vec<_>>(),
                data.identity.clone(),
                data.channel_infos(),
                data.lora.clone(),
            )
        };
        let batch = self.config.replay_batch.max(1);

        for (i, node) in nodes.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            self.emit(SessionEvent::NodeUpdated(node));
            if i % batch == batch - 1 {
                pause(cancel, self.config.replay_yield).await?;
            }
        }

        if let Some(identity) = identity {
            debug!(node = %identity.id, "identity resolved");
            self.emit_all(cancel, vec![SessionEvent::IdentityResolved(identity)]);
        }

        for channel in channels {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            self.emit(SessionEvent::ChannelUpdated(channel));
            pause(cancel, self.config.channel_replay_pacing).await?;
        }

        if let Some(lora) = lora {
            self.emit_all(cancel, vec![SessionEvent::RadioConfigUpdated(lora)]);
        }
        Ok(())
    }
}
