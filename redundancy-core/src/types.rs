//! Wire types for the tracker redundancy protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 16-byte peer identifier.
///
/// Assigned from the transport's binding handle (see `transport::UdpTransport::bind`),
/// the same role a DDS instance handle plays in the system this protocol was modeled
/// on: peers never choose their own id, they observe whatever the transport gives them
/// and compare ids to order themselves.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 16]);

impl PeerId {
    /// The sentinel id meaning "no peer" — all bits set, so it sorts last.
    pub const NULL: PeerId = PeerId([0xff; 16]);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn random() -> Self {
        let uuid = uuid::Uuid::new_v4();
        PeerId(*uuid.as_bytes())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PeerId(NULL)")
        } else {
            write!(f, "PeerId({})", uuid::Uuid::from_bytes(self.0))
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Role a peer holds in the triple-redundant set.
///
/// Numeric order matters: it is used directly as an index into vote tallies and
/// as an array offset when promoting peers after a loss, exactly as the
/// `Role` enum this was modeled on (`PRIMARY=0, SECONDARY, TERTIARY, UNASSIGNED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    Primary = 0,
    Secondary = 1,
    Tertiary = 2,
    Unassigned = 3,
}

impl Role {
    /// Role one step up the ladder (used when a higher-ranked peer is lost).
    pub fn promoted(self) -> Role {
        match self {
            Role::Secondary => Role::Primary,
            Role::Tertiary => Role::Secondary,
            Role::Primary | Role::Unassigned => self,
        }
    }

    pub fn from_ordinal(ordinal: usize) -> Role {
        match ordinal {
            0 => Role::Primary,
            1 => Role::Secondary,
            2 => Role::Tertiary,
            _ => Role::Unassigned,
        }
    }

    /// Ownership strength this role carries on the arbitrated servo topic.
    pub fn ownership_strength(self) -> u32 {
        match self {
            Role::Primary => 30,
            Role::Secondary => 20,
            Role::Tertiary => 10,
            Role::Unassigned => 0,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Primary => "Primary",
            Role::Secondary => "Secondary",
            Role::Tertiary => "Tertiary",
            Role::Unassigned => "Not Voted Yet",
        };
        write!(f, "{s}")
    }
}

/// State of the coordinator's tick-driven state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Initialize,
    Prevote,
    Vote,
    WaitVotesIn,
    VoteResults,
    SteadyState,
    Shutdown,
    Error,
}

/// A ballot as published on `tracker/vote`.
///
/// `peer_count` is the number of non-null roles the source is declaring (1, 2 or
/// 3); `primary`/`secondary`/`tertiary` are `PeerId::NULL` for any role the
/// source isn't declaring a peer for yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub source: PeerId,
    pub peer_count: usize,
    pub primary: PeerId,
    pub secondary: PeerId,
    pub tertiary: PeerId,
}

impl Ballot {
    pub fn role_id(&self, role: Role) -> PeerId {
        match role {
            Role::Primary => self.primary,
            Role::Secondary => self.secondary,
            Role::Tertiary => self.tertiary,
            Role::Unassigned => PeerId::NULL,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Heartbeat published on `tracker/heartbeat`, 250ms period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMsg {
    pub source: PeerId,
}

impl HeartbeatMsg {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Downstream servo command, gated by the Authority Gate before publication
/// on `tracker/servo_control`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoCommand {
    pub pan: f32,
    pub tilt: f32,
    pub frequency: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_is_all_ones() {
        assert!(PeerId::NULL.is_null());
        assert_eq!(PeerId::NULL.0, [0xff; 16]);
    }

    #[test]
    fn role_promotion_steps_up_one_rung() {
        assert_eq!(Role::Tertiary.promoted(), Role::Secondary);
        assert_eq!(Role::Secondary.promoted(), Role::Primary);
        assert_eq!(Role::Primary.promoted(), Role::Primary);
        assert_eq!(Role::Unassigned.promoted(), Role::Unassigned);
    }

    #[test]
    fn ownership_strength_matches_role_ladder() {
        assert_eq!(Role::Primary.ownership_strength(), 30);
        assert_eq!(Role::Secondary.ownership_strength(), 20);
        assert_eq!(Role::Tertiary.ownership_strength(), 10);
        assert_eq!(Role::Unassigned.ownership_strength(), 0);
    }

    #[test]
    fn ballot_round_trips_through_json() {
        let ballot = Ballot {
            source: PeerId::random(),
            peer_count: 2,
            primary: PeerId::random(),
            secondary: PeerId::random(),
            tertiary: PeerId::NULL,
        };
        let bytes = ballot.to_bytes().unwrap();
        let parsed = Ballot::from_bytes(&bytes).unwrap();
        assert_eq!(ballot, parsed);
    }
}
