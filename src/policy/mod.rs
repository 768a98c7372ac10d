//! Hot-reloadable mutation policy.
//!
//! - `rule`: policy rules and immutable snapshots
//! - `store`: the live snapshot, atomic swaps and subscriber fan-out
//! - `coordinator`: the single-slot reload handshake

pub mod coordinator;
pub mod rule;
pub mod store;

pub use coordinator::{
    PolicySource, ReloadHandle, ReloadRequest, reload_channel, run_reload_loop,
};
pub use rule::{PolicyRule, PolicySnapshot};
pub use store::{PolicyStore, Subscriber};
