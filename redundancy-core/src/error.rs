//! Error types for the redundancy core.

use crate::types::PeerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("membership table full (capacity 3)")]
    TableFull,

    #[error("peer {0:?} already present")]
    DuplicatePeer(PeerId),

    #[error("ordinal invariant violated: own_ordinal={0}")]
    OrdinalInvariantViolated(usize),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("mDNS discovery error: {0}")]
    Discovery(#[from] mdns_sd::Error),

    #[error("wire format error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Why a ballot was rejected by [`crate::vote::validate_ballot`].
///
/// Mirrors the five `goto bad_vote` paths of the vote reader this module is
/// grounded on: an unknown source, a source that already voted, a
/// self-inconsistent declaration (duplicate or null guid among the declared
/// roles), and a declared peer that isn't in the membership table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallotRejectReason {
    UnknownSource,
    DuplicateBallot,
    SelfInconsistent,
    PhantomPeer,
    NullInDeclaredRange,
}

impl std::fmt::Display for BallotRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BallotRejectReason::UnknownSource => "ballot from unknown peer",
            BallotRejectReason::DuplicateBallot => "peer already voted this round",
            BallotRejectReason::SelfInconsistent => "ballot declares a duplicate peer",
            BallotRejectReason::PhantomPeer => "ballot declares a peer not in the membership table",
            BallotRejectReason::NullInDeclaredRange => "ballot declares a null peer within its own peer_count",
        };
        write!(f, "{s}")
    }
}

/// Outcome of successfully applying a validated ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallotApplied {
    /// Tally updated, still waiting on more votes.
    Tallied,
    /// Durable incumbent ballot ingested (late joiner path).
    IncumbentAdopted,
    /// Late joiner slotted into the next free role after results were final.
    LateJoinerSlotted,
    /// Ballot ignored per the state table (e.g. received during Shutdown/Error).
    Ignored,
}
