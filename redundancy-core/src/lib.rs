//! Triple-redundant peer coordination core.
//!
//! Three peers track each other over heartbeat and vote topics and converge
//! on a Primary/Secondary/Tertiary assignment, with downstream commands
//! gated to whichever peer currently holds Primary. See `coordinator` for
//! the state machine tying the rest of these modules together.

pub mod authority;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod membership;
pub mod status;
pub mod transport;
pub mod types;
pub mod vote;

pub use authority::AuthorityGate;
pub use config::NodeConfig;
pub use coordinator::{run_coordinator_loop, Coordinator};
pub use error::CoreError;
pub use membership::MembershipTable;
pub use transport::{Transport, UdpTransport};
pub use types::{Ballot, CoordinatorState, HeartbeatMsg, PeerId, Role, ServoCommand};
