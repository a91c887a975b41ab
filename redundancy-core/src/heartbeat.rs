//! Heartbeat Subsystem: the periodic publish side of `tracker/heartbeat`.
//!
//! Grounded on `discovery.rs`'s announce task (spawn-once-on-start, tick on
//! a fixed interval) and `HeartbeatWtr` from original_source, which simply
//! rewrites its own key on a timer. The subscriber side of this subsystem is
//! `membership::MembershipTable::observe_heartbeat`, invoked directly by
//! `coordinator::Coordinator::observe_heartbeat` as inbound samples arrive;
//! there's no separate subscriber type to keep here.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::debug;

use crate::types::{HeartbeatMsg, PeerId};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(250);

/// Publish our own heartbeat on `period`, until `shutdown` reports true.
pub async fn run_heartbeat_publisher(
    tx: mpsc::Sender<HeartbeatMsg>,
    own_id: PeerId,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let msg = HeartbeatMsg { source: own_id };
                if tx.send(msg).await.is_err() {
                    debug!("heartbeat publisher: channel closed, stopping");
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
