//! Identity & Membership Table.
//!
//! Tracks up to three peers ordered by id, the ordinal of "this" peer within
//! that order, and the per-peer vote tallies used by the Vote Subsystem.
//! Grounded on `RedundancyDb` (original_source `redundancyLayer.hpp`/`.cxx`):
//! `slots[0]` always holds this peer's own state, mirroring
//! `array_tracker_states[0]`; `sorted` is the ordered-pointer array
//! (`ordered_array_tracker_state_ptrs`), here indices into `slots` rather
//! than raw pointers so the borrow checker can reason about it.

use crate::error::CoreError;
use crate::types::{PeerId, Role};

const TEN_SEC_TICKS: u32 = 10;

/// Per-peer bookkeeping: heartbeat health, assigned role, and this round's
/// vote tally for that peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerSlot {
    pub id: PeerId,
    pub role: Role,
    pub heartbeat_deadline_count: u32,
    pub operational: bool,
    pub inconsistent_vote: bool,
    /// votes[r] = number of ballots declaring this peer for role r
    pub votes: [u32; 3],
    pub voted: bool,
}

impl PeerSlot {
    fn empty() -> Self {
        PeerSlot {
            id: PeerId::NULL,
            role: Role::Unassigned,
            heartbeat_deadline_count: 0,
            operational: false,
            inconsistent_vote: false,
            votes: [0; 3],
            voted: false,
        }
    }
}

/// Result of folding a heartbeat sample into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// A peer we already track; its deadline counter was bumped.
    Known,
    /// A previously-unseen peer, inserted into a free slot.
    Inserted,
    /// Table already has three peers; heartbeat dropped.
    TableFull,
}

pub struct MembershipTable {
    own_id: PeerId,
    slots: [PeerSlot; 3],
    /// slots[sorted[i]] is the peer at ordinal i (0 = lowest id).
    sorted: [usize; 3],
    /// Index into `sorted` identifying this peer's own ordinal.
    own_ordinal: usize,
    peer_count: usize,
    votes_in: usize,
    is_new_peer: bool,
    late_joiner: bool,
    was_operational: bool,
    ten_sec_ticks: u32,
    /// Window length (in ticks) that `reset_ten_second_window` restores,
    /// overridable via `set_initialize_ticks`.
    initialize_window_ticks: u32,
}

impl MembershipTable {
    pub fn new(own_id: PeerId) -> Self {
        let mut slots = [PeerSlot::empty(), PeerSlot::empty(), PeerSlot::empty()];
        slots[0].id = own_id;
        slots[0].operational = true;

        MembershipTable {
            own_id,
            slots,
            sorted: [0, 1, 2],
            own_ordinal: 0,
            peer_count: 1,
            votes_in: 1,
            is_new_peer: true,
            late_joiner: false,
            was_operational: false,
            ten_sec_ticks: TEN_SEC_TICKS,
            initialize_window_ticks: TEN_SEC_TICKS,
        }
    }

    pub fn own_id(&self) -> PeerId {
        self.own_id
    }

    pub fn own_ordinal(&self) -> usize {
        self.own_ordinal
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    pub fn is_new_peer(&self) -> bool {
        self.is_new_peer
    }

    pub fn set_new_peer(&mut self, v: bool) {
        self.is_new_peer = v;
    }

    pub fn is_late_joiner(&self) -> bool {
        self.late_joiner
    }

    pub fn set_late_joiner(&mut self, v: bool) {
        self.late_joiner = v;
    }

    pub fn was_operational(&self) -> bool {
        self.was_operational
    }

    pub fn set_was_operational(&mut self, v: bool) {
        self.was_operational = v;
    }

    pub fn votes_in(&self) -> usize {
        self.votes_in
    }

    pub fn inc_votes_in(&mut self) {
        self.votes_in += 1;
    }

    /// Peer at ordinal `ord` (0-based), in id order.
    pub fn peer_at(&self, ord: usize) -> &PeerSlot {
        &self.slots[self.sorted[ord]]
    }

    pub(crate) fn peer_at_mut(&mut self, ord: usize) -> &mut PeerSlot {
        &mut self.slots[self.sorted[ord]]
    }

    /// Zero every physical slot's `heartbeat_credits`, closing out one §4.4
    /// liveness observation window so the next one starts from zero.
    pub fn zero_heartbeat_credits(&mut self) {
        for slot in &mut self.slots {
            slot.heartbeat_deadline_count = 0;
        }
    }

    pub fn own_slot(&self) -> &PeerSlot {
        self.peer_at(self.own_ordinal)
    }

    pub(crate) fn own_slot_mut(&mut self) -> &mut PeerSlot {
        self.peer_at_mut(self.own_ordinal)
    }

    /// Find the ordinal of a peer by id, among the first `peer_count` slots.
    pub fn find_ordinal(&self, id: PeerId) -> Option<usize> {
        (0..self.peer_count).find(|&ord| self.peer_at(ord).id == id)
    }

    /// Countdown used during `Initialize`: ten ticks of the 1s coordinator
    /// clock. Returns true once it reaches zero.
    pub fn tick_ten_second_window(&mut self) -> bool {
        self.ten_sec_ticks -= 1;
        self.ten_sec_ticks == 0
    }

    pub fn reset_ten_second_window(&mut self) {
        self.ten_sec_ticks = self.initialize_window_ticks;
    }

    /// Override the `Initialize` countdown, e.g. from `CoordinatorConfig`'s
    /// `initialize_window` expressed in ticks of the configured tick period.
    /// Takes effect immediately, including on a window already in progress,
    /// and is the length every subsequent `reset_ten_second_window` restores.
    pub fn set_initialize_ticks(&mut self, ticks: u32) {
        self.initialize_window_ticks = ticks.max(1);
        self.ten_sec_ticks = self.initialize_window_ticks;
    }

    /// Own role strength, per the {Primary:30, Secondary:20, Tertiary:10,
    /// Unassigned:0} ladder used for downstream ownership arbitration.
    pub fn own_strength(&self) -> u32 {
        self.own_slot().role.ownership_strength()
    }

    /// Invariant 1 (sketch): the slot `sorted[own_ordinal]` must be this
    /// peer's own slot. A mismatch indicates the sort/promotion bookkeeping
    /// has drifted and the coordinator should treat it as fatal.
    pub fn validate_own_ordinal(&self) -> bool {
        self.own_slot().id == self.own_id
    }

    /// Fold a heartbeat sample into the table: bump the deadline counter for
    /// a known peer, or claim a free slot for a new one. Mirrors
    /// `HeartbeatRdr::handler`.
    pub fn observe_heartbeat(&mut self, id: PeerId) -> HeartbeatOutcome {
        for ord in 0..self.peer_count {
            if self.peer_at(ord).id == id {
                self.peer_at_mut(ord).heartbeat_deadline_count += 1;
                return HeartbeatOutcome::Known;
            }
        }

        if self.peer_count >= 3 {
            return HeartbeatOutcome::TableFull;
        }

        self.peer_count += 1;
        self.reset_ten_second_window();

        for &idx in &self.sorted {
            if self.slots[idx].id.is_null() {
                self.slots[idx].id = id;
                self.slots[idx].operational = true;
                self.slots[idx].heartbeat_deadline_count = 1;
                break;
            }
        }
        self.resort();
        self.is_new_peer = true;
        HeartbeatOutcome::Inserted
    }

    /// Insert a peer directly (used by tests and by durable-ballot ingestion
    /// when a peer's existence is learned from a vote before its heartbeat
    /// arrives). Returns an error if the table is already full.
    pub fn insert_peer(&mut self, id: PeerId) -> Result<(), CoreError> {
        if self.peer_count >= 3 {
            return Err(CoreError::TableFull);
        }
        if self.find_ordinal(id).is_some() {
            return Err(CoreError::DuplicatePeer(id));
        }
        match self.observe_heartbeat(id) {
            HeartbeatOutcome::Inserted => Ok(()),
            _ => unreachable!("checked above"),
        }
    }

    /// Two-pass bubble sort of the ordered pointer array by id, tracking
    /// `own_ordinal` through every swap. Grounded verbatim on
    /// `RedundancyDb::sortSaveGuids`.
    pub fn resort(&mut self) {
        for _ in 0..2 {
            for i in 0..2 {
                let a = self.sorted[i];
                let b = self.sorted[i + 1];
                if self.slots[a].id > self.slots[b].id {
                    self.sorted.swap(i, i + 1);
                    if self.own_ordinal == i {
                        self.own_ordinal = i + 1;
                    } else if self.own_ordinal == i + 1 {
                        self.own_ordinal = i;
                    }
                }
            }
        }
    }

    /// Drop the peer at ordinal `ord`: zero its slot, shrink `peer_count`,
    /// resort, and promote every peer ranked below the lost one. Grounded on
    /// `RedundancyDb::lostTracker`.
    pub fn drop_peer(&mut self, ord: usize) {
        let lost_role = self.peer_at(ord).role;

        {
            let slot = self.peer_at_mut(ord);
            slot.id = PeerId::NULL;
            slot.role = Role::Unassigned;
            slot.inconsistent_vote = true;
            slot.operational = false;
        }

        self.peer_count -= 1;
        self.resort();
        self.is_new_peer = false;

        for i in 0..3 {
            let slot = &mut self.slots[self.sorted[i]];
            if (slot.role as u8) > (lost_role as u8) && slot.role != Role::Unassigned {
                slot.role = slot.role.promoted();
            }
        }
    }

    /// Clear every peer's vote tally and `voted` flag ahead of a fresh
    /// round, resetting `votes_in` to 1 (our own, implicit, vote).
    /// Grounded on `RedundancyDb::clearVotes`.
    pub fn clear_ballot_state(&mut self) {
        for i in 0..3 {
            let slot = &mut self.slots[self.sorted[i]];
            slot.votes = [0; 3];
            slot.voted = false;
        }
        self.votes_in = 1;
    }

    /// Clear only the `voted` flags (used when moving states without a full
    /// tally reset). Grounded on `RedundancyDb::clearIvoted`.
    pub fn clear_voted_flags(&mut self) {
        for ord in 0..self.peer_count {
            self.peer_at_mut(ord).voted = false;
        }
    }

    /// For each peer, the winning role is whichever got the largest tally;
    /// per §4.1 the slot is marked `inconsistent_vote` when that winning
    /// tally is less than `peer_count` — not unanimous, including the
    /// degenerate case where no ballot ever named this peer for any role at
    /// all (winning tally 0). Grounded on `RedundancyDb::assessVoteResults`.
    pub fn assess_vote_results(&mut self) {
        for ord in 0..self.peer_count {
            let mut largest_idx = 0usize;
            let mut largest_tally = 0u32;

            for role_idx in 0..self.peer_count {
                let tally = self.peer_at(ord).votes[role_idx];
                if tally > largest_tally {
                    largest_tally = tally;
                    largest_idx = role_idx;
                }
            }

            let slot = self.peer_at_mut(ord);
            slot.inconsistent_vote = (largest_tally as usize) < self.peer_count;
            slot.role = Role::from_ordinal(largest_idx);
        }
        self.clear_ballot_state();
    }

    /// Self-consistency check over the current (not-yet-published) tally:
    /// every role's vote count across peers must sum to exactly
    /// `peer_count`, with each individual count either 0 or `peer_count`.
    /// Grounded on `RedundancyDb::validateBallot`; kept as a diagnostic, not
    /// wired into the hot path (the original never called it either).
    pub fn validate_ballot_consistency(&self) -> bool {
        let mut tally = [0u32; 3];
        for ord in 0..self.peer_count {
            for role_idx in 0..3 {
                let v = self.peer_at(ord).votes[role_idx];
                if v as usize == self.peer_count || v == 0 {
                    tally[role_idx] = v;
                }
            }
        }
        tally.iter().sum::<u32>() as usize == self.peer_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> PeerId {
        let mut b = [0u8; 16];
        b[0] = byte;
        PeerId(b)
    }

    #[test]
    fn starts_as_sole_operational_peer() {
        let table = MembershipTable::new(id(5));
        assert_eq!(table.peer_count(), 1);
        assert_eq!(table.own_ordinal(), 0);
        assert!(table.validate_own_ordinal());
    }

    #[test]
    fn heartbeat_inserts_and_resorts_by_id() {
        let mut table = MembershipTable::new(id(5));
        assert_eq!(table.observe_heartbeat(id(2)), HeartbeatOutcome::Inserted);
        assert_eq!(table.peer_count(), 2);
        // id(2) < id(5) so it should now be ordinal 0, pushing us to 1.
        assert_eq!(table.own_ordinal(), 1);
        assert!(table.validate_own_ordinal());
        assert_eq!(table.peer_at(0).id, id(2));
    }

    #[test]
    fn duplicate_heartbeat_bumps_deadline_counter_only() {
        let mut table = MembershipTable::new(id(5));
        table.observe_heartbeat(id(2));
        let before = table.peer_at(0).heartbeat_deadline_count;
        assert_eq!(table.observe_heartbeat(id(2)), HeartbeatOutcome::Known);
        assert_eq!(table.peer_at(0).heartbeat_deadline_count, before + 1);
        assert_eq!(table.peer_count(), 2);
    }

    #[test]
    fn fourth_peer_is_rejected() {
        let mut table = MembershipTable::new(id(1));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(3));
        assert_eq!(table.observe_heartbeat(id(4)), HeartbeatOutcome::TableFull);
        assert_eq!(table.peer_count(), 3);
    }

    #[test]
    fn losing_primary_promotes_secondary_and_tertiary() {
        let mut table = MembershipTable::new(id(1));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(3));
        // Manually assign roles as a fresh-election ballot would.
        for ord in 0..3 {
            let role = Role::from_ordinal(ord);
            let slot_idx = table.sorted[ord];
            table.slots[slot_idx].role = role;
        }
        // Primary is ordinal 0 here (lowest id).
        table.drop_peer(0);
        assert_eq!(table.peer_count(), 2);
        // The old Secondary (now ordinal 0 post-resort) should be Primary.
        assert_eq!(table.peer_at(0).role, Role::Primary);
        assert_eq!(table.peer_at(1).role, Role::Secondary);
    }

    #[test]
    fn assess_vote_results_picks_unanimous_winner_and_flags_split_vote() {
        let mut table = MembershipTable::new(id(1));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(3));

        // Peer 0 gets a clean unanimous Primary vote (3,0,0).
        table.slots[table.sorted[0]].votes = [3, 0, 0];
        // Peer 1 has a split vote: not unanimous.
        table.slots[table.sorted[1]].votes = [0, 2, 1];
        // Peer 2 unanimous Tertiary.
        table.slots[table.sorted[2]].votes = [0, 0, 3];

        table.assess_vote_results();

        assert_eq!(table.peer_at(0).role, Role::Primary);
        assert!(!table.peer_at(0).inconsistent_vote);
        assert_eq!(table.peer_at(1).role, Role::Secondary);
        assert!(table.peer_at(1).inconsistent_vote);
        assert_eq!(table.peer_at(2).role, Role::Tertiary);
        assert!(!table.peer_at(2).inconsistent_vote);
        // Tally is cleared after assessment.
        assert_eq!(table.peer_at(0).votes, [0, 0, 0]);
        assert_eq!(table.votes_in(), 1);
    }

    /// §4.1 literal rule: a slot with no winning tally at all (no ballot ever
    /// named it for any role) has winning tally 0, which is `< peer_count`
    /// for any ensemble of two or more — so it must come out inconsistent,
    /// not a consistent `Primary` from `largest_idx`'s zero initializer.
    #[test]
    fn assess_vote_results_flags_an_all_zero_tally_as_inconsistent() {
        let mut table = MembershipTable::new(id(1));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(3));

        table.slots[table.sorted[0]].votes = [2, 0, 0];
        table.slots[table.sorted[1]].votes = [0, 2, 0];
        // Peer 2 never got a single ballot naming it for any role.
        table.slots[table.sorted[2]].votes = [0, 0, 0];

        table.assess_vote_results();

        assert_eq!(table.peer_at(2).role, Role::Primary);
        assert!(table.peer_at(2).inconsistent_vote);
    }

    #[test]
    fn own_strength_reflects_assigned_role() {
        let mut table = MembershipTable::new(id(9));
        table.slots[table.sorted[table.own_ordinal()]].role = Role::Secondary;
        assert_eq!(table.own_strength(), 20);
    }
}
