//! Per-slot channel requests for radios that skip channels in their dump.

use std::collections::BTreeSet;

use meshlink_transport::Transport;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::Outbound;
use crate::error::{Anomaly, Result};
use crate::radio::{node_id, NodeNum, MAX_CHANNELS};
use crate::session::{pause, Shared};

/// Slots not yet confirmed, in ascending order.
pub fn missing_slots(confirmed: &BTreeSet<u32>) -> Vec<u32> {
    (0..MAX_CHANNELS)
        .filter(|i| !confirmed.contains(i))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub confirmed: Vec<u32>,
    /// Accepted as absent for this connection.
    pub missing: Vec<u32>,
    pub rounds: u32,
    pub requests: u32,
}

impl<T: Transport> Shared<T> {
    pub(crate) async fn request_channel(
        &self,
        cancel: &CancellationToken,
        node: NodeNum,
        index: u32,
    ) -> Result<()> {
        debug!(index, node = %node_id(node), "requesting channel");
        let packet_id = rand::random();
        self.send(
            cancel,
            &Outbound::ChannelRequest {
                node,
                index,
                packet_id,
            },
        )
        .await
    }

    /// Request every unconfirmed slot, paced, for a bounded number of rounds.
    pub(crate) async fn reconcile(
        &self,
        cancel: &CancellationToken,
        node: NodeNum,
    ) -> Result<ReconcileOutcome> {
        let config = &self.config;
        let mut rounds = 0;
        let mut requests = 0;

        while rounds < config.reconcile_rounds {
            let missing = missing_slots(&self.data().confirmed);
            if missing.is_empty() {
                break;
            }
            rounds += 1;
            info!(
                round = rounds,
                of = config.reconcile_rounds,
                ?missing,
                "requesting missing channels"
            );
            for index in missing {
                self.request_channel(cancel, node, index).await?;
                requests += 1;
                pause(cancel, config.channel_request_pacing).await?;
            }
            pause(cancel, config.reconcile_round_wait).await?;

            let confirmed = self.data().confirmed.clone();
            info!(round = rounds, ?confirmed, count = confirmed.len(), "channel responses so far");
        }

        let confirmed = self.data().confirmed.clone();
        let missing = missing_slots(&confirmed);
        if missing.is_empty() {
            info!(rounds, "all channel slots confirmed");
        } else {
            let anomaly = Anomaly::ChannelIncomplete {
                missing: missing.clone(),
            };
            warn!(%anomaly, rounds, "accepting missing channels as absent");
        }
        Ok(ReconcileOutcome {
            confirmed: confirmed.into_iter().collect(),
            missing,
            rounds,
            requests,
        })
    }
}
