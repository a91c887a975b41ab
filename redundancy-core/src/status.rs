//! Human-readable role table logging.
//!
//! Grounded on `printMyState`/`updateLedStatus` in original_source's
//! `redundancyLayer.cxx`, which dumped the local role table and lit a status
//! LED whenever the coordinator reached a steady role. Physical LEDs are out
//! of scope here; this module keeps the "log the whole table on every
//! settle" habit and expresses it as a structured `tracing` line instead of
//! bytes written to a peripheral.

use tracing::info;

use crate::membership::MembershipTable;
use crate::types::Role;

/// Log the full ordinal-ordered role table, as `printMyState` did on every
/// call into `VoteResults`/`SteadyState`.
pub fn log_role_table(table: &MembershipTable) {
    let mut line = String::new();
    for ord in 0..table.peer_count() {
        let slot = table.peer_at(ord);
        line.push_str(&format!("[{ord}] {:?}={} ", slot.id, slot.role));
    }

    info!(
        own_role = %table.own_slot().role,
        own_ordinal = table.own_ordinal(),
        peer_count = table.peer_count(),
        "role table settled: {}",
        line.trim_end()
    );

    if table.own_slot().role == Role::Primary {
        info!("status: PRIMARY — authority gate armed at strength 30");
    }
}
