//! Coordinator State Machine.
//!
//! Structurally grounded on `election::run_election_loop` and `Election::tick`
//! (a tokio::select! over a fixed-period ticker plus an inbound channel); the
//! domain logic driving each transition comes from original_source's
//! `redundancyLayer.cxx`, whose actual top-level loop never shipped in the
//! retrieved sources — only the per-event handlers (`HeartbeatRdr::handler`,
//! `VoteRdr::handler`, `assessVoteResults`) did. This module is the new code
//! that calls them in the order the `SM_States` enum documents.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::authority::AuthorityGate;
use crate::membership::{HeartbeatOutcome, MembershipTable};
use crate::status::log_role_table;
use crate::transport::Transport;
use crate::types::{Ballot, CoordinatorState, HeartbeatMsg, PeerId};
use crate::vote::{apply_ballot, cast_ballot};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);
/// Default §4.4 ensemble size: `Initialize` moves to `Prevote` the moment
/// this many peers are known, without waiting out the full window.
const EXPECTED_PEER_COUNT: usize = 3;

pub struct Coordinator {
    table: Arc<Mutex<MembershipTable>>,
    state: CoordinatorState,
    authority: AuthorityGate,
    /// Sink for the authority gate's current strength — the transport's
    /// ownership arbiter on `tracker/servo_control`. Re-pushed every time
    /// `authority` is recomputed so the downstream publisher's tiebreaker
    /// always reflects our latest role.
    strength_sink: Arc<dyn Transport>,
}

impl Coordinator {
    pub fn new(table: Arc<Mutex<MembershipTable>>, transport: Arc<dyn Transport>) -> Self {
        Coordinator {
            table,
            state: CoordinatorState::Initialize,
            authority: AuthorityGate::new(),
            strength_sink: transport,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn authority(&self) -> &AuthorityGate {
        &self.authority
    }

    /// Recompute the authority gate from `role` and push its strength onto
    /// the transport's ownership arbiter in the same step — the gate is
    /// never allowed to drift from what the downstream publisher advertises.
    fn update_authority(&mut self, role: crate::types::Role) {
        self.authority.update(role);
        self.strength_sink.set_ownership_strength(self.authority.current_strength());
    }

    /// Advance the state machine by one 1s tick. Returns a ballot to publish
    /// when this tick causes a (re)vote.
    pub async fn tick(&mut self) -> Option<Ballot> {
        let mut table = self.table.lock().await;

        match self.state {
            CoordinatorState::Initialize => {
                let window_elapsed = table.tick_ten_second_window();
                let ensemble_complete = table.peer_count() >= EXPECTED_PEER_COUNT;
                if window_elapsed || ensemble_complete {
                    info!(
                        "moving to prevote with {} peer(s) ({})",
                        table.peer_count(),
                        if ensemble_complete { "ensemble complete" } else { "window elapsed" }
                    );
                    self.state = CoordinatorState::Prevote;
                }
                None
            }

            CoordinatorState::Prevote => {
                // One tick of pause before `Vote` actually casts: gives
                // staggered peers time to ingest each other's durable
                // ballots first, so none misclassifies itself as a late
                // joiner (§4.4).
                table.clear_ballot_state();
                self.state = CoordinatorState::Vote;
                None
            }

            CoordinatorState::Vote => {
                // Reached either from `Prevote`'s one-tick pause above, or
                // from `check_liveness`/`observe_heartbeat` pushing the
                // state back here from `SteadyState`; cast and move on.
                let ballot = cast_ballot(&mut table);
                self.state = CoordinatorState::WaitVotesIn;
                Some(ballot)
            }

            CoordinatorState::WaitVotesIn => {
                // §4.4: compared against the *live* `peer_count`, not a
                // snapshot taken when the round started — a peer that
                // heartbeats in mid-round (via `observe_heartbeat`, which
                // runs regardless of coordinator state) must still get a
                // ballot counted before the round can close, or its
                // never-voted-for slot reaches `assess_vote_results` with an
                // all-zero tally.
                if table.votes_in() >= table.peer_count() {
                    table.assess_vote_results();
                    self.state = CoordinatorState::VoteResults;
                }
                None
            }

            CoordinatorState::VoteResults => {
                if table.validate_own_ordinal() {
                    table.set_was_operational(true);
                    self.update_authority(table.own_slot().role);
                    log_role_table(&table);
                    self.state = CoordinatorState::SteadyState;
                } else {
                    error!(
                        "ordinal invariant violated: own_ordinal={}",
                        table.own_ordinal()
                    );
                    self.state = CoordinatorState::Error;
                }
                None
            }

            CoordinatorState::SteadyState => {
                self.check_liveness(&mut table);
                None
            }

            CoordinatorState::Shutdown => None,

            CoordinatorState::Error => {
                self.authority.disable();
                self.strength_sink.set_ownership_strength(0);
                self.state = CoordinatorState::Shutdown;
                None
            }
        }
    }

    /// Once-per-second §4.4 liveness scan: any non-self slot whose
    /// `heartbeat_credits` are still zero after the just-closed 1 s
    /// observation window (≥4 heartbeats expected at the 250 ms publish
    /// period) is declared lost. Every slot's credits are zeroed at the end
    /// of the scan regardless of outcome, starting the next window fresh.
    fn check_liveness(&mut self, table: &mut MembershipTable) -> bool {
        let mut lost_ordinal = None;

        for ord in 0..table.peer_count() {
            if ord == table.own_ordinal() {
                continue;
            }
            if table.peer_at(ord).heartbeat_deadline_count == 0 {
                lost_ordinal = Some(ord);
                break;
            }
        }

        table.zero_heartbeat_credits();

        if let Some(ord) = lost_ordinal {
            warn!("peer at ordinal {} missed heartbeat deadline, dropping", ord);
            table.drop_peer(ord);
            table.set_was_operational(true);
            self.update_authority(table.own_slot().role);
            self.state = CoordinatorState::Vote;
            true
        } else {
            false
        }
    }

    /// Fold an inbound heartbeat sample into the table and, if it revealed a
    /// brand new peer while we were steady, force a revote next tick.
    pub async fn observe_heartbeat(&mut self, msg: HeartbeatMsg) {
        if msg.source == self.table.lock().await.own_id() {
            return;
        }
        let mut table = self.table.lock().await;
        match table.observe_heartbeat(msg.source) {
            HeartbeatOutcome::Inserted => {
                if self.state == CoordinatorState::SteadyState {
                    table.set_was_operational(true);
                    self.state = CoordinatorState::Vote;
                }
            }
            HeartbeatOutcome::Known | HeartbeatOutcome::TableFull => {}
        }
    }

    /// Apply an inbound ballot, logging and dropping anything the Vote
    /// Subsystem rejects rather than propagating it as fatal.
    pub async fn observe_ballot(&mut self, ballot: Ballot) {
        let mut table = self.table.lock().await;
        match apply_ballot(&ballot, &mut table, self.state) {
            Ok(outcome) => {
                tracing::debug!("ballot from {:?} applied: {:?}", ballot.source, outcome);
            }
            Err(reason) => {
                warn!("ballot from {:?} rejected: {}", ballot.source, reason);
            }
        }
    }
}

/// Run the coordinator's tick loop alongside inbound heartbeat and ballot
/// channels, in the shape of `election::run_election_loop`.
pub async fn run_coordinator_loop(
    mut coordinator: Coordinator,
    tick_period: Duration,
    outbound_ballots: mpsc::Sender<Ballot>,
    mut inbound_heartbeats: mpsc::Receiver<HeartbeatMsg>,
    mut inbound_ballots: mpsc::Receiver<Ballot>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> CoordinatorState {
    let mut ticker = interval(tick_period);
    let mut reached_error = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(ballot) = coordinator.tick().await {
                    let _ = outbound_ballots.send(ballot).await;
                }
                if coordinator.state() == CoordinatorState::Error {
                    reached_error = true;
                }
                if coordinator.state() == CoordinatorState::Shutdown {
                    break;
                }
            }

            Some(hb) = inbound_heartbeats.recv() => {
                coordinator.observe_heartbeat(hb).await;
            }

            Some(ballot) = inbound_ballots.recv() => {
                coordinator.observe_ballot(ballot).await;
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown signal received");
                    coordinator.state = CoordinatorState::Shutdown;
                    break;
                }
            }
        }
    }

    if reached_error {
        CoordinatorState::Error
    } else {
        CoordinatorState::Shutdown
    }
}
