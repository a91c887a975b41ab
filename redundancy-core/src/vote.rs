//! Vote Subsystem: ballot construction, validation and application.
//!
//! Grounded on `VoteWtr::vote` and `VoteRdr::handler` in original_source's
//! `redundancyLayer.cxx`. The wire shape is `types::Ballot`; this module only
//! ever touches a `MembershipTable`, so it stays transport-agnostic.

use crate::error::{BallotApplied, BallotRejectReason};
use crate::membership::MembershipTable;
use crate::types::{Ballot, CoordinatorState, PeerId, Role};

/// Build this peer's ballot and fold its own vote into the table, exactly as
/// `VoteWtr::vote` reads its own just-written sample back to register its
/// vote locally (since the transport never delivers our own publication back
/// to us).
pub fn cast_ballot(table: &mut MembershipTable) -> Ballot {
    let peer_count = table.peer_count();

    if !table.was_operational() && !table.is_late_joiner() {
        // Fresh election: assign roles in ascending-id order.
        for ord in 0..peer_count {
            let role = Role::from_ordinal(ord);
            table.peer_at_mut(ord).role = role;
        }
    } else if table.is_late_joiner() && peer_count == 3 && table.own_slot().role == Role::Secondary {
        // Late-joiner edge case: staggered durable ingest can leave this
        // peer's own role at Secondary (set from one incumbent ballot)
        // when a second incumbent ballot arriving later should have moved
        // it to Tertiary. Force Tertiary and discard the stale self-vote at
        // the Secondary tally. A normal revote participant (`was_operational`
        // but not a late joiner) falls through untouched — its role was
        // already settled by a prior round, not by durable ingest.
        table.own_slot_mut().role = Role::Tertiary;
        table.own_slot_mut().votes[Role::Secondary as usize] = 0;
    }
    table.set_late_joiner(false);

    let mut ballot = Ballot {
        source: table.own_id(),
        peer_count,
        primary: PeerId::NULL,
        secondary: PeerId::NULL,
        tertiary: PeerId::NULL,
    };

    for ord in 0..peer_count {
        let slot = table.peer_at(ord);
        match slot.role {
            Role::Primary => ballot.primary = slot.id,
            Role::Secondary => ballot.secondary = slot.id,
            Role::Tertiary => ballot.tertiary = slot.id,
            Role::Unassigned => {}
        }
    }

    // Self-apply: increment each peer's tally for whatever role we just
    // assigned it (equivalent to reading the sample we wrote back).
    for ord in 0..peer_count {
        let role_idx = table.peer_at(ord).role as usize;
        if role_idx < 3 {
            table.peer_at_mut(ord).votes[role_idx] += 1;
        }
    }
    table.own_slot_mut().voted = true;

    ballot
}

/// Validate an incoming ballot against the membership table before applying
/// it. Grounded on the three checks `VoteRdr::handler` performs before its
/// state-dependent switch: known source, no duplicate vote from that source,
/// and a self-consistent, fully-known declared role set.
pub fn validate_ballot(ballot: &Ballot, table: &MembershipTable) -> Result<(), BallotRejectReason> {
    let source_ord = table
        .find_ordinal(ballot.source)
        .ok_or(BallotRejectReason::UnknownSource)?;

    if table.peer_at(source_ord).voted {
        return Err(BallotRejectReason::DuplicateBallot);
    }

    let mut declared = Vec::with_capacity(ballot.peer_count);
    for role_idx in 0..ballot.peer_count {
        let pid = ballot.role_id(Role::from_ordinal(role_idx));
        if pid.is_null() {
            return Err(BallotRejectReason::NullInDeclaredRange);
        }
        if declared.contains(&pid) {
            return Err(BallotRejectReason::SelfInconsistent);
        }
        declared.push(pid);
    }

    for pid in &declared {
        if table.find_ordinal(*pid).is_none() {
            return Err(BallotRejectReason::PhantomPeer);
        }
    }

    Ok(())
}

/// Apply a validated ballot to the table. The effect depends entirely on the
/// coordinator's current state, per the switch in `VoteRdr::handler`:
///
/// - `Initialize`/`Prevote`: the ballot is a durable incumbent report from a
///   system already running; adopt its roles unanimously and slot ourselves
///   into the next free role.
/// - `Vote`/`WaitVotesIn`: the normal case, just tally.
/// - `VoteResults`/`SteadyState`: a late joiner; assign it the next free
///   role by count rather than trusting its self-declared role, and don't
///   re-open voting.
/// - `Shutdown`/`Error`: ignored.
pub fn apply_ballot(
    ballot: &Ballot,
    table: &mut MembershipTable,
    state: CoordinatorState,
) -> Result<BallotApplied, BallotRejectReason> {
    validate_ballot(ballot, table)?;

    if let Some(source_ord) = table.find_ordinal(ballot.source) {
        table.peer_at_mut(source_ord).voted = true;
    }

    match state {
        CoordinatorState::Initialize | CoordinatorState::Prevote => {
            for role_idx in 0..ballot.peer_count {
                let pid = ballot.role_id(Role::from_ordinal(role_idx));
                if let Some(ord) = table.find_ordinal(pid) {
                    table.peer_at_mut(ord).votes[role_idx] = ballot.peer_count as u32;
                    table.peer_at_mut(ord).role = Role::from_ordinal(role_idx);
                }
            }

            let own_role_idx = ballot.peer_count;
            table.own_slot_mut().role = Role::from_ordinal(own_role_idx);
            if own_role_idx < 3 {
                table.own_slot_mut().votes[own_role_idx] = ballot.peer_count as u32;
            }
            table.inc_votes_in();
            table.set_late_joiner(true);
            Ok(BallotApplied::IncumbentAdopted)
        }

        CoordinatorState::Vote | CoordinatorState::WaitVotesIn => {
            for role_idx in 0..ballot.peer_count {
                let pid = ballot.role_id(Role::from_ordinal(role_idx));
                for ord in 0..ballot.peer_count {
                    if table.peer_at(ord).id == pid {
                        table.peer_at_mut(ord).votes[role_idx] += 1;
                    }
                }
            }
            table.inc_votes_in();
            Ok(BallotApplied::Tallied)
        }

        CoordinatorState::VoteResults | CoordinatorState::SteadyState => {
            if table.is_new_peer() {
                table.set_new_peer(false);
                if let Some(db_idx) = table.find_ordinal(ballot.source) {
                    table.peer_at_mut(db_idx).role = Role::from_ordinal(table.peer_count() - 1);
                }
                table.clear_ballot_state();
                Ok(BallotApplied::LateJoinerSlotted)
            } else {
                Ok(BallotApplied::Ignored)
            }
        }

        CoordinatorState::Shutdown | CoordinatorState::Error => Ok(BallotApplied::Ignored),
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
    fn fresh_election_assigns_roles_in_ascending_id_order() {
        let mut table = MembershipTable::new(id(5));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(9));

        let ballot = cast_ballot(&mut table);
        assert_eq!(ballot.peer_count, 3);
        assert_eq!(ballot.primary, id(2));
        assert_eq!(ballot.secondary, id(5));
        assert_eq!(ballot.tertiary, id(9));
    }

    #[test]
    fn ballot_from_unknown_peer_is_rejected() {
        let table = MembershipTable::new(id(5));
        let ballot = Ballot {
            source: id(99),
            peer_count: 1,
            primary: id(5),
            secondary: PeerId::NULL,
            tertiary: PeerId::NULL,
        };
        assert_eq!(
            validate_ballot(&ballot, &table),
            Err(BallotRejectReason::UnknownSource)
        );
    }

    #[test]
    fn late_joiner_forced_to_tertiary_when_table_is_full() {
        let mut table = MembershipTable::new(id(5));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(9));
        table.set_late_joiner(true);
        // Simulate a staggered durable ingest that settled on Secondary from
        // the first incumbent ballot, with a stale tally left behind.
        table.own_slot_mut().role = Role::Secondary;
        table.own_slot_mut().votes[Role::Secondary as usize] = 2;

        let ballot = cast_ballot(&mut table);
        assert_eq!(ballot.tertiary, table.own_id());
        assert_eq!(table.own_slot().votes[Role::Secondary as usize], 0);
    }

    #[test]
    fn incumbent_revote_keeps_its_settled_role_when_a_third_peer_joins() {
        // 0x02 and 0x03 are steady (Primary, Secondary); 0x01 heartbeats in,
        // forcing a revote. 0x02 must NOT be demoted to Tertiary just
        // because `peer_count` now reads 3 — that force only applies to an
        // actual late joiner's own durable-ingest correction.
        let mut table = MembershipTable::new(id(2));
        table.observe_heartbeat(id(3));
        table.own_slot_mut().role = Role::Primary;
        table.peer_at_mut(1).role = Role::Secondary;
        table.set_was_operational(true);
        table.clear_ballot_state();

        table.observe_heartbeat(id(1)); // third peer joins, peer_count -> 3

        let ballot = cast_ballot(&mut table);
        assert_eq!(table.own_slot().role, Role::Primary);
        assert_eq!(ballot.primary, id(2));
    }

    #[test]
    fn normal_tally_accumulates_across_multiple_ballots() {
        let mut table = MembershipTable::new(id(1));
        table.observe_heartbeat(id(2));
        table.observe_heartbeat(id(3));
        for ord in 0..3 {
            let role = Role::from_ordinal(ord);
            table.peer_at_mut(ord).role = role;
        }
        table.clear_ballot_state();

        let ballot = Ballot {
            source: id(2),
            peer_count: 3,
            primary: id(1),
            secondary: id(2),
            tertiary: id(3),
        };
        let outcome = apply_ballot(&ballot, &mut table, CoordinatorState::Vote).unwrap();
        assert_eq!(outcome, BallotApplied::Tallied);
        assert_eq!(table.peer_at(0).votes[Role::Primary as usize], 1);
    }

    /// Drive three independent `MembershipTable`s through a full cold-boot
    /// round by hand (each peer casts, and its ballot is applied to the
    /// other two), matching spec.md §8 Scenario A's literal outcome.
    #[test]
    fn three_peer_cold_boot_elects_roles_in_ascending_id_order() {
        let mut t1 = MembershipTable::new(id(1));
        let mut t2 = MembershipTable::new(id(2));
        let mut t3 = MembershipTable::new(id(3));
        for t in [&mut t1, &mut t2, &mut t3] {
            t.insert_peer(id(1)).ok();
            t.insert_peer(id(2)).ok();
            t.insert_peer(id(3)).ok();
        }

        let b1 = cast_ballot(&mut t1);
        let b2 = cast_ballot(&mut t2);
        let b3 = cast_ballot(&mut t3);

        apply_ballot(&b2, &mut t1, CoordinatorState::Vote).unwrap();
        apply_ballot(&b3, &mut t1, CoordinatorState::Vote).unwrap();
        apply_ballot(&b1, &mut t2, CoordinatorState::Vote).unwrap();
        apply_ballot(&b3, &mut t2, CoordinatorState::Vote).unwrap();
        apply_ballot(&b1, &mut t3, CoordinatorState::Vote).unwrap();
        apply_ballot(&b2, &mut t3, CoordinatorState::Vote).unwrap();

        for t in [&mut t1, &mut t2, &mut t3] {
            assert_eq!(t.votes_in(), 3);
            t.assess_vote_results();
            assert_eq!(t.find_ordinal(id(1)).map(|o| t.peer_at(o).role), Some(Role::Primary));
            assert_eq!(t.find_ordinal(id(2)).map(|o| t.peer_at(o).role), Some(Role::Secondary));
            assert_eq!(t.find_ordinal(id(3)).map(|o| t.peer_at(o).role), Some(Role::Tertiary));
            assert!(!t.peer_at(0).inconsistent_vote);
        }
        assert_eq!(t1.own_strength(), 30);
        assert_eq!(t2.own_strength(), 20);
        assert_eq!(t3.own_strength(), 10);
    }

    /// From Scenario A's steady state, drop the Primary on the two survivors
    /// and revote: each promotes itself one rung, matching spec.md §8
    /// Scenario B's literal outcome (`0x02`→Primary/30, `0x03`→Secondary/20).
    #[test]
    fn primary_loss_promotes_survivors_and_revote_restores_unanimity() {
        let mut t2 = MembershipTable::new(id(2));
        let mut t3 = MembershipTable::new(id(3));
        for t in [&mut t2, &mut t3] {
            t.insert_peer(id(1)).ok();
            t.insert_peer(id(3)).ok();
            t.insert_peer(id(2)).ok();
        }
        for t in [&mut t2, &mut t3] {
            for ord in 0..3 {
                let role = Role::from_ordinal(ord);
                t.peer_at_mut(ord).role = role;
            }
            t.set_was_operational(true);
        }

        let ord1_in_t2 = t2.find_ordinal(id(1)).unwrap();
        t2.drop_peer(ord1_in_t2);
        let ord1_in_t3 = t3.find_ordinal(id(1)).unwrap();
        t3.drop_peer(ord1_in_t3);

        assert_eq!(t2.own_slot().role, Role::Primary);
        assert_eq!(t3.find_ordinal(id(2)).map(|o| t3.peer_at(o).role), Some(Role::Primary));
        assert_eq!(t2.find_ordinal(id(3)).map(|o| t2.peer_at(o).role), Some(Role::Secondary));
        assert_eq!(t3.own_slot().role, Role::Secondary);

        t2.clear_ballot_state();
        t3.clear_ballot_state();
        let b2 = cast_ballot(&mut t2);
        let b3 = cast_ballot(&mut t3);
        apply_ballot(&b3, &mut t2, CoordinatorState::Vote).unwrap();
        apply_ballot(&b2, &mut t3, CoordinatorState::Vote).unwrap();

        for t in [&mut t2, &mut t3] {
            assert_eq!(t.votes_in(), 2);
            t.assess_vote_results();
            assert!(!t.peer_at(0).inconsistent_vote);
        }
        assert_eq!(t2.own_strength(), 30);
        assert_eq!(t3.own_strength(), 20);
    }

    /// spec.md §8 Scenario E: a ballot that names the same peer for two
    /// roles is self-inconsistent and must be rejected outright, leaving
    /// `votes_in` untouched so the round stays in `WaitVotesIn`.
    #[test]
    fn self_inconsistent_ballot_is_rejected_and_does_not_advance_votes_in() {
        let mut table = MembershipTable::new(id(3));
        table.observe_heartbeat(id(1));
        table.observe_heartbeat(id(2));
        table.clear_ballot_state();
        let votes_in_before = table.votes_in();

        let ballot = Ballot {
            source: id(2),
            peer_count: 2,
            primary: id(1),
            secondary: id(1),
            tertiary: PeerId::NULL,
        };

        assert_eq!(
            validate_ballot(&ballot, &table),
            Err(BallotRejectReason::SelfInconsistent)
        );
        assert_eq!(
            apply_ballot(&ballot, &mut table, CoordinatorState::WaitVotesIn),
            Err(BallotRejectReason::SelfInconsistent)
        );
        assert_eq!(table.votes_in(), votes_in_before);
        assert!(!table.peer_at(table.find_ordinal(id(2)).unwrap()).voted);
    }

    #[test]
    fn late_arrival_during_steady_state_gets_next_free_role() {
        let mut table = MembershipTable::new(id(1));
        table.peer_at_mut(0).role = Role::Primary;
        table.observe_heartbeat(id(9)); // sets is_new_peer = true
        let ballot = Ballot {
            source: id(9),
            peer_count: 2,
            primary: id(1),
            secondary: id(9),
            tertiary: PeerId::NULL,
        };
        let outcome =
            apply_ballot(&ballot, &mut table, CoordinatorState::SteadyState).unwrap();
        assert_eq!(outcome, BallotApplied::LateJoinerSlotted);
        let ord = table.find_ordinal(id(9)).unwrap();
        assert_eq!(table.peer_at(ord).role, Role::Secondary);
    }
}
