//! Authority Gate: the single choke point between "what role did the vote
//! assign us" and "are we allowed to publish downstream commands".
//!
//! A gate, not a second source of truth — it only ever reads the ownership
//! strength the membership table already computed and turns that into an
//! enabled/disabled bit the downstream command writer polls before
//! publishing on `tracker/servo_control`.

use crate::types::Role;
use tracing::info;

#[derive(Debug)]
pub struct AuthorityGate {
    enabled: bool,
    strength: u32,
}

impl AuthorityGate {
    pub fn new() -> Self {
        AuthorityGate {
            enabled: false,
            strength: 0,
        }
    }

    /// Re-evaluate authority from the role the coordinator currently holds.
    /// `Unassigned` always disables; any assigned role enables, with its
    /// ownership strength carried along for the transport's arbitration.
    pub fn update(&mut self, role: Role) {
        let strength = role.ownership_strength();
        let was_enabled = self.enabled;
        self.strength = strength;
        self.enabled = role != Role::Unassigned;

        if self.enabled && !was_enabled {
            info!("authority gate enabled, role={:?} strength={}", role, strength);
        } else if !self.enabled && was_enabled {
            info!("authority gate disabled");
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.strength = 0;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_strength(&self) -> u32 {
        self.strength
    }
}

impl Default for AuthorityGate {
    fn default() -> Self {
        Self::new()
    }
}
